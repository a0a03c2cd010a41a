// bucketrestore/src/integrity/mod.rs
use std::path::Path;

use crate::config::IntegrityConfig;
use crate::external;

/// Minimum number of `rawdata/` entries for a bucket without `l2Hash*`
/// files to still be worth checking.
const MIN_RAWDATA_ENTRIES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityOutcome {
    Pass,
    Fail(String),
    /// The bucket carries no integrity metadata; it proceeds unchecked.
    NotChecked(String),
}

/// Wraps the external verification command. Never errors: every problem,
/// including a spawn failure or timeout, is a `Fail`.
#[derive(Debug, Clone)]
pub struct IntegrityChecker {
    config: IntegrityConfig,
}

impl IntegrityChecker {
    pub fn new(config: IntegrityConfig) -> Self {
        IntegrityChecker { config }
    }

    pub async fn check(&self, bucket_path: &Path, name: &str) -> IntegrityOutcome {
        if let Some(reason) = missing_integrity_data(bucket_path).await {
            return IntegrityOutcome::NotChecked(reason);
        }

        let args = external::render_args(&self.config.command, Some(bucket_path), Some(name));
        let report = match external::run(&self.config.command, &args).await {
            Ok(report) => report,
            Err(failure) => return IntegrityOutcome::Fail(format!("integrity command {}", failure)),
        };

        let output = report.combined_output();
        if !report.success {
            return IntegrityOutcome::Fail(format!("integrity command exited with {}: {}", report.status, output));
        }

        match &self.config.output_pattern {
            None => IntegrityOutcome::Pass,
            Some(pattern) => match pattern.captures(&output) {
                None => IntegrityOutcome::Fail(format!("unparseable integrity output: {}", output)),
                Some(caps) => match caps.name("failed").map(|m| m.as_str().parse::<u64>()) {
                    Some(Ok(0)) | None => IntegrityOutcome::Pass,
                    Some(Ok(failed)) => IntegrityOutcome::Fail(format!("{} integrity check(s) failed: {}", failed, output)),
                    Some(Err(_)) => IntegrityOutcome::Fail(format!("unparseable integrity output: {}", output)),
                },
            },
        }
    }
}

/// Buckets frozen without hash files have nothing to verify against.
async fn missing_integrity_data(bucket_path: &Path) -> Option<String> {
    let rawdata = bucket_path.join("rawdata");
    let mut entries = tokio::fs::read_dir(&rawdata).await.ok()?;

    let mut count = 0usize;
    let mut has_hash = false;
    while let Ok(Some(entry)) = entries.next_entry().await {
        count += 1;
        if entry.file_name().to_string_lossy().starts_with("l2Hash") {
            has_hash = true;
        }
    }

    if !has_hash && count < MIN_RAWDATA_ENTRIES {
        Some(format!("rawdata has no l2Hash files and only {} entries", count))
    } else {
        None
    }
}
