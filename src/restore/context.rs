// bucketrestore/src/restore/context.rs
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use super::summary::RestoreResult;
use crate::config::RestoreConfig;
use crate::integrity::IntegrityChecker;
use crate::relocate::Relocator;
use crate::source::BucketSource;

/// Everything one restore invocation shares between its workers.
pub struct RunContext {
    pub config: RestoreConfig,
    pub source: Arc<dyn BucketSource>,
    pub relocator: Relocator,
    pub integrity: Option<IntegrityChecker>,
    pub cancel: CancellationToken,
    results: Mutex<Vec<RestoreResult>>,
}

impl RunContext {
    pub fn new(config: RestoreConfig, source: Arc<dyn BucketSource>, cancel: CancellationToken) -> Self {
        RunContext {
            relocator: Relocator::new(config.destination_root.clone()),
            integrity: config.integrity.clone().map(IntegrityChecker::new),
            config,
            source,
            cancel,
            results: Mutex::new(Vec::new()),
        }
    }

    pub fn record(&self, result: RestoreResult) {
        // A poisoned lock only means another worker panicked mid-push; the
        // vector itself is still usable.
        let mut results = self.results.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        results.push(result);
    }

    pub fn has_result_for(&self, name: &str) -> bool {
        let results = self.results.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        results.iter().any(|r| r.name == name)
    }

    pub fn take_results(&self) -> Vec<RestoreResult> {
        let mut results = self.results.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *results)
    }
}
