// bucketrestore/src/restore/summary.rs
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestoreStatus {
    /// Newly relocated, or found already present at the destination.
    Restored,
    SkippedOutOfRange,
    SkippedMalformed,
    FailedIntegrity,
    FailedRelocation,
    /// Relocated, but the per-bucket rebuild command failed.
    FailedRebuild,
    /// Not started because the run was interrupted.
    Cancelled,
}

impl RestoreStatus {
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            RestoreStatus::FailedIntegrity | RestoreStatus::FailedRelocation | RestoreStatus::FailedRebuild
        )
    }

    pub fn is_skip(self) -> bool {
        matches!(
            self,
            RestoreStatus::SkippedOutOfRange | RestoreStatus::SkippedMalformed | RestoreStatus::Cancelled
        )
    }

    fn marker(self) -> &'static str {
        if self.is_failure() {
            "❌"
        } else if self.is_skip() {
            "⚠️"
        } else {
            "✓"
        }
    }
}

impl fmt::Display for RestoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RestoreStatus::Restored => "restored",
            RestoreStatus::SkippedOutOfRange => "skipped (out of range)",
            RestoreStatus::SkippedMalformed => "skipped (malformed name)",
            RestoreStatus::FailedIntegrity => "failed integrity check",
            RestoreStatus::FailedRelocation => "failed relocation",
            RestoreStatus::FailedRebuild => "failed rebuild",
            RestoreStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreResult {
    pub name: String,
    pub status: RestoreStatus,
    pub detail: String,
}

impl RestoreResult {
    pub fn new(name: impl Into<String>, status: RestoreStatus, detail: impl Into<String>) -> Self {
        RestoreResult {
            name: name.into(),
            status,
            detail: detail.into(),
        }
    }
}

/// Outcome of one restore invocation. Never persisted; printing it and the
/// process exit status are the only output.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Sorted by bucket name.
    pub results: Vec<RestoreResult>,
    pub total_seen: usize,
    pub restored: usize,
    pub skipped: usize,
    pub failed: usize,
    pub interrupted: bool,
    pub restart_failure: Option<String>,
}

impl RunSummary {
    pub fn from_results(mut results: Vec<RestoreResult>, interrupted: bool) -> Self {
        results.sort_by(|a, b| a.name.cmp(&b.name));
        let restored = results.iter().filter(|r| r.status == RestoreStatus::Restored).count();
        let skipped = results.iter().filter(|r| r.status.is_skip()).count();
        let failed = results.iter().filter(|r| r.status.is_failure()).count();
        RunSummary {
            total_seen: results.len(),
            results,
            restored,
            skipped,
            failed,
            interrupted,
            restart_failure: None,
        }
    }

    pub fn count(&self, status: RestoreStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    #[cfg(test)]
    pub fn status_of(&self, name: &str) -> Option<RestoreStatus> {
        self.results.iter().find(|r| r.name == name).map(|r| r.status)
    }

    /// No failed bucket, no interruption, and no failed restart.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && !self.interrupted && self.restart_failure.is_none()
    }

    pub fn print(&self) {
        println!("\n📋 Restore results:");
        for result in &self.results {
            if result.detail.is_empty() {
                println!("{} {}: {}", result.status.marker(), result.name, result.status);
            } else {
                println!("{} {}: {} ({})", result.status.marker(), result.name, result.status, result.detail);
            }
        }
        println!(
            "\nTotal seen: {}, restored: {}, skipped: {}, failed: {}",
            self.total_seen, self.restored, self.skipped, self.failed
        );
        if self.interrupted {
            println!("⚠️ Run was interrupted; {} bucket(s) were not started.", self.count(RestoreStatus::Cancelled));
        }
        if let Some(reason) = &self.restart_failure {
            println!("❌ Restart failed: {}", reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, status: RestoreStatus) -> RestoreResult {
        RestoreResult::new(name, status, "")
    }

    #[test]
    fn counts_partition_every_status() {
        let summary = RunSummary::from_results(
            vec![
                result("db_5_6_1", RestoreStatus::FailedRebuild),
                result("db_1_2_1", RestoreStatus::Restored),
                result("bad", RestoreStatus::SkippedMalformed),
                result("db_3_4_1", RestoreStatus::SkippedOutOfRange),
                result("db_7_8_1", RestoreStatus::Cancelled),
                result("db_9_9_1", RestoreStatus::FailedIntegrity),
                result("db_9_9_2", RestoreStatus::FailedRelocation),
            ],
            true,
        );
        assert_eq!(summary.total_seen, 7);
        assert_eq!(summary.restored, 1);
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.restored + summary.skipped + summary.failed, summary.total_seen);
        assert!(!summary.is_success());
    }

    #[test]
    fn results_are_sorted_by_name() {
        let summary = RunSummary::from_results(
            vec![result("db_9_9_1", RestoreStatus::Restored), result("db_1_1_1", RestoreStatus::Restored)],
            false,
        );
        let names: Vec<&str> = summary.results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["db_1_1_1", "db_9_9_1"]);
        assert_eq!(summary.status_of("db_9_9_1"), Some(RestoreStatus::Restored));
    }

    #[test]
    fn skips_alone_are_a_success() {
        let summary = RunSummary::from_results(
            vec![
                result("db_1_2_1", RestoreStatus::SkippedOutOfRange),
                result("junk", RestoreStatus::SkippedMalformed),
            ],
            false,
        );
        assert!(summary.is_success());
        assert!(RunSummary::default().is_success());
    }

    #[test]
    fn restart_failure_is_not_a_success() {
        let mut summary = RunSummary::from_results(vec![result("db_1_2_1", RestoreStatus::Restored)], false);
        summary.restart_failure = Some("exit status: 1".to_string());
        assert!(!summary.is_success());
    }
}
