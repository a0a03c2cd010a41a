// bucketrestore/src/errors.rs
use std::path::PathBuf;

use thiserror::Error;

use crate::bucket::Malformed;

/// Failures scoped to a single bucket. None of these abort a run; the
/// orchestrator turns each one into a `RestoreResult`.
#[derive(Error, Debug)]
pub enum BucketError {
    #[error("Malformed bucket name '{name}': {reason}")]
    Malformed { name: String, reason: &'static str },

    #[error("Failed to resolve bucket {name} from {locator}: {reason}")]
    Resolve {
        name: String,
        locator: String,
        reason: String,
    },

    #[error("Integrity check failed for {name}: {reason}")]
    Integrity { name: String, reason: String },

    #[error("Relocation of {name} failed: {reason}")]
    Relocation { name: String, reason: String },

    #[error("Rebuild of {name} failed: {reason}")]
    Rebuild { name: String, reason: String },

    #[error("Bucket {0} was not started because the run was cancelled")]
    Cancelled(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<Malformed> for BucketError {
    fn from(malformed: Malformed) -> Self {
        BucketError::Malformed {
            name: malformed.name,
            reason: malformed.reason,
        }
    }
}

impl BucketError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BucketError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn resolve(name: &str, locator: impl ToString, reason: impl ToString) -> Self {
        BucketError::Resolve {
            name: name.to_string(),
            locator: locator.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BucketError>;
