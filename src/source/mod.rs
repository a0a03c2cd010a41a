// bucketrestore/src/source/mod.rs
//! Archive backends. The orchestrator only sees [`BucketSource`]; which
//! implementation backs it is decided once from configuration.
pub(crate) mod local;
pub(crate) mod object_store;
pub(crate) mod s3;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use crate::config::ArchiveSource;
use crate::errors::BucketError;

pub use local::LocalArchive;
pub use object_store::ObjectArchive;

/// Where a candidate bucket lives before it is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Path(PathBuf),
    /// Key prefix (ending in `/`) shared by every object of the bucket.
    ObjectPrefix(String),
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Path(path) => write!(f, "{}", path.display()),
            Locator::ObjectPrefix(prefix) => write!(f, "object prefix {}", prefix),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketFootprint {
    pub bytes: u64,
    pub files: u64,
}

impl BucketFootprint {
    pub fn add_file(&mut self, bytes: u64) {
        self.bytes += bytes;
        self.files += 1;
    }

    pub fn human_size(&self) -> String {
        const KB: f64 = 1024.0;
        const MB: f64 = KB * 1024.0;
        const GB: f64 = MB * 1024.0;
        let bytes = self.bytes as f64;
        if bytes < MB {
            format!("{:.1} KB", bytes / KB)
        } else if bytes < GB {
            format!("{:.1} MB", bytes / MB)
        } else {
            format!("{:.1} GB", bytes / GB)
        }
    }
}

/// One listed candidate: the raw directory/segment name plus where to find it.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    pub raw_name: String,
    pub locator: Locator,
    /// Filled when the listing already knows sizes (object stores).
    pub footprint: Option<BucketFootprint>,
}

#[derive(Debug)]
enum Origin {
    Archive,
    Downloaded { _scratch: TempDir },
}

/// A bucket bound to a local directory that is ready to be relocated.
/// Downloaded copies live in a scratch directory that is removed when the
/// resolution is dropped, whatever happened to the bucket.
#[derive(Debug)]
pub struct BucketResolution {
    path: PathBuf,
    origin: Origin,
}

impl BucketResolution {
    pub fn in_archive(path: PathBuf) -> Self {
        BucketResolution {
            path,
            origin: Origin::Archive,
        }
    }

    pub fn downloaded(path: PathBuf, scratch: TempDir) -> Self {
        BucketResolution {
            path,
            origin: Origin::Downloaded { _scratch: scratch },
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scratch copies may be moved; archive directories are only ever read.
    pub fn is_scratch_copy(&self) -> bool {
        matches!(self.origin, Origin::Downloaded { .. })
    }
}

#[async_trait]
pub trait BucketSource: Send + Sync {
    fn describe(&self) -> String;

    /// Full listing of candidate buckets. An error here means the archive
    /// itself is unreachable and is fatal for the run.
    async fn list(&self) -> Result<Vec<SourceEntry>>;

    async fn resolve(&self, entry: &SourceEntry) -> std::result::Result<BucketResolution, BucketError>;

    async fn measure(&self, entry: &SourceEntry) -> Result<BucketFootprint> {
        entry
            .footprint
            .with_context(|| format!("No size information for {}", entry.raw_name))
    }
}

pub async fn build_source(source: &ArchiveSource, scratch_dir: Option<&Path>) -> Result<Arc<dyn BucketSource>> {
    match source {
        ArchiveSource::Local(root) => Ok(Arc::new(LocalArchive::new(root.clone()))),
        ArchiveSource::ObjectStore(store_config) => {
            let store = s3::S3ObjectStore::connect(store_config)
                .await
                .with_context(|| format!("Object store s3://{} is not reachable", store_config.bucket_name))?;
            Ok(Arc::new(ObjectArchive::new(
                Arc::new(store),
                store_config.folder_prefix.clone(),
                scratch_dir.map(Path::to_path_buf),
            )))
        }
    }
}
