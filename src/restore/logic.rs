// bucketrestore/src/restore/logic.rs
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::context::RunContext;
use super::summary::{RestoreResult, RestoreStatus, RunSummary};
use crate::bucket::BucketIdentifier;
use crate::config::{CommandSpec, RestoreConfig};
use crate::errors::{self, BucketError};
use crate::external;
use crate::integrity::IntegrityOutcome;
use crate::relocate::{RelocationOutcome, Transfer};
use crate::source::{self, BucketSource, SourceEntry};

/// Opens the configured archive, wires Ctrl-C to the run's cancellation
/// token and drives the restore.
pub async fn perform_restore_orchestration(restore_config: &RestoreConfig) -> Result<RunSummary> {
    println!("🔄 Starting bucket restore orchestration...");
    let source = source::build_source(&restore_config.source, restore_config.scratch_dir.as_deref())
        .await
        .context("Failed to open the bucket archive")?;
    println!("Archive: {}", source.describe());
    println!("Destination: {}", restore_config.destination_root.display());
    let basis = restore_config.time_basis;
    println!(
        "Window: {} .. {} ({:?} time), up to {} bucket(s) at a time",
        basis.format_epoch(restore_config.window.oldest.max(0) as u64),
        basis.format_epoch(restore_config.window.newest.max(0) as u64),
        basis,
        restore_config.max_concurrent_buckets
    );

    let cancel = CancellationToken::new();
    let interrupt_watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\n⚠️ Interrupt received: finishing in-flight buckets, starting no new ones...");
                cancel.cancel();
            }
        })
    };

    let summary = run_restore(restore_config.clone(), source, cancel).await;
    interrupt_watcher.abort();
    summary
}

/// List, parse, filter, then restore the surviving buckets on a bounded
/// worker pool. Only destination or listing problems return `Err`; every
/// per-bucket problem ends up in the summary.
pub(crate) async fn run_restore(
    config: RestoreConfig,
    source: Arc<dyn BucketSource>,
    cancel: CancellationToken,
) -> Result<RunSummary> {
    let ctx = Arc::new(RunContext::new(config, source, cancel));
    ctx.relocator
        .prepare()
        .await
        .context("Destination directory is not usable")?;

    let entries = ctx
        .source
        .list()
        .await
        .with_context(|| format!("Failed to list buckets in {}", ctx.source.describe()))?;
    println!("Found {} candidate bucket(s).", entries.len());
    let listed = entries.len();

    let mut malformed_count = 0;
    let mut candidates = Vec::new();
    for entry in entries {
        match BucketIdentifier::parse(&entry.raw_name) {
            Err(malformed) => {
                tracing::warn!(bucket = %entry.raw_name, reason = malformed.reason, "Skipping malformed bucket name");
                malformed_count += 1;
                ctx.record(failure_result(&entry.raw_name, malformed.into()));
            }
            Ok(id) if !ctx.config.window.overlaps(&id) => {
                tracing::debug!(bucket = %id, "Bucket is outside the restore window");
                ctx.record(RestoreResult::new(id.original_name(), RestoreStatus::SkippedOutOfRange, ""));
            }
            Ok(id) => candidates.push((entry, id)),
        }
    }
    if listed > 0 && malformed_count == listed {
        tracing::warn!(
            archive = %ctx.source.describe(),
            "No listed name is a bucket name; the archive prefix may point one level above the buckets"
        );
    }
    println!("{} bucket(s) overlap the restore window.", candidates.len());

    let permits = Arc::new(Semaphore::new(ctx.config.max_concurrent_buckets));
    let mut workers = JoinSet::new();
    let mut started = Vec::new();
    for (entry, id) in candidates {
        let permit = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => None,
            permit = Arc::clone(&permits).acquire_owned() => {
                Some(permit.context("Bucket worker pool closed unexpectedly")?)
            }
        };
        let Some(permit) = permit else {
            let name = id.original_name().to_string();
            ctx.record(failure_result(&name, BucketError::Cancelled(name.clone())));
            continue;
        };

        started.push(id.original_name().to_string());
        let ctx = Arc::clone(&ctx);
        workers.spawn(async move {
            let result = process_bucket(&ctx, &entry, &id).await;
            ctx.record(result);
            drop(permit);
        });
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Bucket worker stopped unexpectedly");
        }
    }
    for name in started {
        if !ctx.has_result_for(&name) {
            let error = BucketError::Relocation {
                name: name.clone(),
                reason: "bucket worker stopped unexpectedly".to_string(),
            };
            ctx.record(failure_result(&name, error));
        }
    }

    let interrupted = ctx.cancel.is_cancelled();
    let mut summary = RunSummary::from_results(ctx.take_results(), interrupted);

    if let Some(restart) = &ctx.config.restart {
        if interrupted {
            println!("⚠️ Run was interrupted; not invoking the restart command.");
        } else {
            summary.restart_failure = run_restart(restart).await.err();
        }
    }

    Ok(summary)
}

async fn process_bucket(ctx: &RunContext, entry: &SourceEntry, id: &BucketIdentifier) -> RestoreResult {
    let name = id.original_name();
    match restore_bucket(ctx, entry, name).await {
        Ok(detail) => {
            tracing::info!(bucket = %name, %detail, "Bucket restored");
            RestoreResult::new(name, RestoreStatus::Restored, detail)
        }
        Err(e) => {
            tracing::error!(bucket = %name, error = %e, "Bucket restore failed");
            failure_result(name, e)
        }
    }
}

/// resolve -> check -> relocate -> rebuild for one in-range bucket.
async fn restore_bucket(ctx: &RunContext, entry: &SourceEntry, name: &str) -> errors::Result<String> {
    if ctx.relocator.is_present(name).await {
        return Ok(format!(
            "already present at {}",
            ctx.relocator.destination_for(name).display()
        ));
    }

    let resolution = ctx.source.resolve(entry).await?;

    if let Some(checker) = &ctx.integrity {
        match checker.check(resolution.path(), name).await {
            IntegrityOutcome::Pass => tracing::info!(bucket = %name, "Integrity check passed"),
            IntegrityOutcome::NotChecked(reason) => {
                tracing::info!(bucket = %name, %reason, "No integrity metadata; relocating unchecked");
            }
            IntegrityOutcome::Fail(reason) => {
                return Err(BucketError::Integrity {
                    name: name.to_string(),
                    reason,
                });
            }
        }
    }

    let transfer = if resolution.is_scratch_copy() {
        Transfer::Move
    } else {
        Transfer::Copy
    };
    let outcome = ctx.relocator.relocate(resolution.path(), name, transfer).await;
    // Scratch downloads go away here, whatever the outcome.
    drop(resolution);

    let destination = match outcome {
        RelocationOutcome::Done(path) => path,
        RelocationOutcome::AlreadyPresent(path) => {
            return Ok(format!("already present at {}", path.display()));
        }
        RelocationOutcome::Failed(reason) => {
            return Err(BucketError::Relocation {
                name: name.to_string(),
                reason,
            });
        }
    };

    if let Some(rebuild) = &ctx.config.rebuild {
        rebuild_bucket(rebuild, &destination, name).await?;
    }

    Ok(format!("restored to {}", destination.display()))
}

async fn rebuild_bucket(spec: &CommandSpec, destination: &Path, name: &str) -> errors::Result<()> {
    let args = external::render_args(spec, Some(destination), Some(name));
    let failure = |reason: String| BucketError::Rebuild {
        name: name.to_string(),
        reason,
    };
    let report = external::run(spec, &args)
        .await
        .map_err(|e| failure(format!("rebuild command {}", e)))?;
    if !report.success {
        return Err(failure(format!(
            "rebuild command exited with {}: {}",
            report.status,
            report.combined_output()
        )));
    }
    tracing::info!(bucket = %name, "Bucket rebuilt");
    Ok(())
}

async fn run_restart(spec: &CommandSpec) -> std::result::Result<(), String> {
    println!("🔁 Running restart command: {}", spec.program.display());
    let args = external::render_args(spec, None, None);
    match external::run(spec, &args).await {
        Ok(report) if report.success => {
            println!("✓ Restart command completed.");
            Ok(())
        }
        Ok(report) => Err(format!("exited with {}: {}", report.status, report.combined_output())),
        Err(failure) => Err(failure.to_string()),
    }
}

/// The single place where a per-bucket error becomes a result record.
fn failure_result(name: &str, error: BucketError) -> RestoreResult {
    let status = match &error {
        BucketError::Malformed { .. } => RestoreStatus::SkippedMalformed,
        BucketError::Integrity { .. } => RestoreStatus::FailedIntegrity,
        BucketError::Rebuild { .. } => RestoreStatus::FailedRebuild,
        BucketError::Cancelled(_) => RestoreStatus::Cancelled,
        BucketError::Resolve { .. } | BucketError::Relocation { .. } | BucketError::Io { .. } => {
            RestoreStatus::FailedRelocation
        }
    };
    RestoreResult::new(name, status, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::{RestoreWindow, TimeBasis};
    use crate::config::{ArchiveSource, IntegrityConfig};
    use crate::source::LocalArchive;
    use crate::source::ObjectArchive;
    use crate::source::object_store::fake::DirObjectStore;
    use std::fs;
    use std::path::PathBuf;
    use std::time::Duration;

    // 2021-01-02 00:00:00 .. 2021-01-03 00:00:00 UTC
    const OLDEST: i64 = 1609545600;
    const NEWEST: i64 = 1609632000;
    const IN_RANGE: &str = "wineventlog_1609459200_1609545600_9988";
    const IN_RANGE_REVERSED: &str = "db_1609600000_1609550000_12";
    const OUT_OF_RANGE: &str = "db_1612137600_1612224000_1";

    fn seed_bucket(root: &Path, name: &str) -> anyhow::Result<()> {
        let bucket = root.join(name);
        fs::create_dir_all(bucket.join("rawdata"))?;
        fs::write(bucket.join("rawdata").join("journal.zst"), format!("journal of {name}"))?;
        fs::write(bucket.join("rawdata").join("l2Hash_0_0.dat"), "hash")?;
        fs::write(bucket.join("Hosts.data"), "hosts")?;
        Ok(())
    }

    fn restore_config(archive: &Path, destination: &Path) -> anyhow::Result<RestoreConfig> {
        Ok(RestoreConfig {
            source: ArchiveSource::Local(archive.to_path_buf()),
            destination_root: destination.to_path_buf(),
            window: RestoreWindow::new(OLDEST, NEWEST)?,
            time_basis: TimeBasis::Utc,
            max_concurrent_buckets: 2,
            scratch_dir: None,
            integrity: None,
            rebuild: None,
            restart: None,
        })
    }

    fn sh(script: String) -> CommandSpec {
        CommandSpec {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script, "hook".to_string(), "{bucket}".to_string()],
            timeout: Duration::from_secs(10),
        }
    }

    async fn restore_local(config: RestoreConfig, archive: &Path) -> anyhow::Result<RunSummary> {
        let source: Arc<dyn BucketSource> = Arc::new(LocalArchive::new(archive.to_path_buf()));
        run_restore(config, source, CancellationToken::new()).await
    }

    fn names_in(dir: &Path) -> anyhow::Result<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(dir)?
            .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<std::io::Result<_>>()?;
        names.sort();
        Ok(names)
    }

    #[tokio::test]
    async fn restores_only_valid_in_range_buckets() -> anyhow::Result<()> {
        let archive = tempfile::tempdir()?;
        let thawed = tempfile::tempdir()?;
        seed_bucket(archive.path(), IN_RANGE)?;
        seed_bucket(archive.path(), OUT_OF_RANGE)?;
        seed_bucket(archive.path(), "not_a_bucket")?;

        let summary = restore_local(restore_config(archive.path(), thawed.path())?, archive.path()).await?;

        assert_eq!(summary.total_seen, 3);
        assert_eq!(summary.count(RestoreStatus::Restored), 1);
        assert_eq!(summary.count(RestoreStatus::SkippedOutOfRange), 1);
        assert_eq!(summary.count(RestoreStatus::SkippedMalformed), 1);
        assert_eq!(summary.status_of(IN_RANGE), Some(RestoreStatus::Restored));
        assert!(summary.is_success());
        assert_eq!(names_in(thawed.path())?, vec![IN_RANGE]);
        assert_eq!(
            fs::read_to_string(thawed.path().join(IN_RANGE).join("rawdata/journal.zst"))?,
            format!("journal of {IN_RANGE}")
        );
        assert!(archive.path().join(IN_RANGE).is_dir(), "archive must not be modified");
        Ok(())
    }

    #[tokio::test]
    async fn reversed_bounds_are_restored() -> anyhow::Result<()> {
        let archive = tempfile::tempdir()?;
        let thawed = tempfile::tempdir()?;
        seed_bucket(archive.path(), IN_RANGE_REVERSED)?;

        let summary = restore_local(restore_config(archive.path(), thawed.path())?, archive.path()).await?;
        assert_eq!(summary.status_of(IN_RANGE_REVERSED), Some(RestoreStatus::Restored));
        Ok(())
    }

    #[tokio::test]
    async fn second_run_reports_already_restored() -> anyhow::Result<()> {
        let archive = tempfile::tempdir()?;
        let thawed = tempfile::tempdir()?;
        seed_bucket(archive.path(), IN_RANGE)?;
        seed_bucket(archive.path(), IN_RANGE_REVERSED)?;
        let config = restore_config(archive.path(), thawed.path())?;

        let first = restore_local(config.clone(), archive.path()).await?;
        let after_first = names_in(thawed.path())?;
        let second = restore_local(config, archive.path()).await?;

        assert_eq!(first.restored, 2);
        assert_eq!(second.restored, 2);
        assert_eq!(second.failed, 0);
        assert!(second.results.iter().all(|r| r.detail.starts_with("already present")));
        assert_eq!(names_in(thawed.path())?, after_first);
        Ok(())
    }

    #[tokio::test]
    async fn many_buckets_with_small_pool() -> anyhow::Result<()> {
        let archive = tempfile::tempdir()?;
        let thawed = tempfile::tempdir()?;
        let names: Vec<String> = (0..9).map(|i| format!("db_1609550000_1609560000_{i}")).collect();
        for name in &names {
            seed_bucket(archive.path(), name)?;
        }
        let mut config = restore_config(archive.path(), thawed.path())?;
        config.max_concurrent_buckets = 3;

        let summary = restore_local(config, archive.path()).await?;
        assert_eq!(summary.restored, 9);
        assert_eq!(names_in(thawed.path())?, names);
        Ok(())
    }

    #[tokio::test]
    async fn missing_archive_is_fatal() -> anyhow::Result<()> {
        let thawed = tempfile::tempdir()?;
        let missing = thawed.path().join("no-such-archive");
        let result = restore_local(restore_config(&missing, &thawed.path().join("out"))?, &missing).await;
        assert!(result.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_run_starts_nothing() -> anyhow::Result<()> {
        let archive = tempfile::tempdir()?;
        let thawed = tempfile::tempdir()?;
        seed_bucket(archive.path(), IN_RANGE)?;
        seed_bucket(archive.path(), OUT_OF_RANGE)?;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let source: Arc<dyn BucketSource> = Arc::new(LocalArchive::new(archive.path().to_path_buf()));
        let summary = run_restore(restore_config(archive.path(), thawed.path())?, source, cancel).await?;

        assert!(summary.interrupted);
        assert!(!summary.is_success());
        assert_eq!(summary.status_of(IN_RANGE), Some(RestoreStatus::Cancelled));
        assert_eq!(summary.status_of(OUT_OF_RANGE), Some(RestoreStatus::SkippedOutOfRange));
        assert!(names_in(thawed.path())?.is_empty());
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn interrupt_lets_in_flight_bucket_finish() -> anyhow::Result<()> {
        let archive = tempfile::tempdir()?;
        let thawed = tempfile::tempdir()?;
        let names: Vec<String> = (0..3).map(|i| format!("db_1609550000_1609560000_{i}")).collect();
        for name in &names {
            seed_bucket(archive.path(), name)?;
        }
        let mut config = restore_config(archive.path(), thawed.path())?;
        config.max_concurrent_buckets = 1;
        config.integrity = Some(IntegrityConfig {
            command: sh("sleep 1".to_string()),
            output_pattern: None,
        });

        let cancel = CancellationToken::new();
        let trigger = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                cancel.cancel();
            })
        };
        let source: Arc<dyn BucketSource> = Arc::new(LocalArchive::new(archive.path().to_path_buf()));
        let summary = run_restore(config, source, cancel).await?;
        trigger.await?;

        assert!(summary.interrupted);
        assert!(!summary.is_success());
        assert_eq!(summary.status_of(&names[0]), Some(RestoreStatus::Restored));
        assert_eq!(summary.status_of(&names[1]), Some(RestoreStatus::Cancelled));
        assert_eq!(summary.status_of(&names[2]), Some(RestoreStatus::Cancelled));
        assert_eq!(names_in(thawed.path())?, vec![names[0].clone()]);
        assert_eq!(
            fs::read_to_string(thawed.path().join(&names[0]).join("Hosts.data"))?,
            "hosts"
        );
        Ok(())
    }

    #[tokio::test]
    async fn object_store_buckets_are_downloaded_and_scratch_removed() -> anyhow::Result<()> {
        let store_root = tempfile::tempdir()?;
        let scratch = tempfile::tempdir()?;
        let thawed = tempfile::tempdir()?;
        seed_bucket(&store_root.path().join("wineventlog"), IN_RANGE)?;
        seed_bucket(&store_root.path().join("wineventlog"), OUT_OF_RANGE)?;

        let source: Arc<dyn BucketSource> = Arc::new(ObjectArchive::new(
            Arc::new(DirObjectStore::new(store_root.path())),
            Some("wineventlog".to_string()),
            Some(scratch.path().to_path_buf()),
        ));
        let mut config = restore_config(store_root.path(), thawed.path())?;
        config.scratch_dir = Some(scratch.path().to_path_buf());

        let summary = run_restore(config, source, CancellationToken::new()).await?;
        assert_eq!(summary.status_of(IN_RANGE), Some(RestoreStatus::Restored));
        assert_eq!(summary.status_of(OUT_OF_RANGE), Some(RestoreStatus::SkippedOutOfRange));
        assert_eq!(names_in(thawed.path())?, vec![IN_RANGE]);
        assert_eq!(fs::read_to_string(thawed.path().join(IN_RANGE).join("Hosts.data"))?, "hosts");
        assert!(names_in(scratch.path())?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn failed_download_is_a_relocation_failure() -> anyhow::Result<()> {
        let store_root = tempfile::tempdir()?;
        let scratch = tempfile::tempdir()?;
        let thawed = tempfile::tempdir()?;
        seed_bucket(store_root.path(), IN_RANGE)?;
        let mut store = DirObjectStore::new(store_root.path());
        store.fail_downloads_of = Some("journal.zst".to_string());

        let source: Arc<dyn BucketSource> = Arc::new(ObjectArchive::new(
            Arc::new(store),
            None,
            Some(scratch.path().to_path_buf()),
        ));
        let summary = run_restore(
            restore_config(store_root.path(), thawed.path())?,
            source,
            CancellationToken::new(),
        )
        .await?;

        assert_eq!(summary.status_of(IN_RANGE), Some(RestoreStatus::FailedRelocation));
        assert!(!summary.is_success());
        assert!(names_in(thawed.path())?.is_empty());
        assert!(names_in(scratch.path())?.is_empty());
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn integrity_failure_keeps_bucket_out_of_destination() -> anyhow::Result<()> {
        let archive = tempfile::tempdir()?;
        let thawed = tempfile::tempdir()?;
        let bad = "db_1609550000_1609560000_bad";
        seed_bucket(archive.path(), IN_RANGE)?;
        seed_bucket(archive.path(), bad)?;
        let mut config = restore_config(archive.path(), thawed.path())?;
        config.integrity = Some(IntegrityConfig {
            command: sh("case \"$1\" in *_bad) echo 'slice hash mismatch'; exit 1;; esac".to_string()),
            output_pattern: None,
        });

        let summary = restore_local(config, archive.path()).await?;
        assert_eq!(summary.status_of(IN_RANGE), Some(RestoreStatus::Restored));
        assert_eq!(summary.status_of(bad), Some(RestoreStatus::FailedIntegrity));
        assert_eq!(summary.failed, 1);
        assert!(!summary.is_success());
        assert_eq!(names_in(thawed.path())?, vec![IN_RANGE]);
        let detail = summary.results.iter().find(|r| r.name == bad).map(|r| r.detail.as_str());
        assert!(detail.is_some_and(|d| d.contains("slice hash mismatch")), "{detail:?}");
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rebuild_failure_keeps_relocated_bucket() -> anyhow::Result<()> {
        let archive = tempfile::tempdir()?;
        let thawed = tempfile::tempdir()?;
        seed_bucket(archive.path(), IN_RANGE)?;
        let mut config = restore_config(archive.path(), thawed.path())?;
        config.rebuild = Some(sh("exit 2".to_string()));

        let summary = restore_local(config, archive.path()).await?;
        assert_eq!(summary.status_of(IN_RANGE), Some(RestoreStatus::FailedRebuild));
        assert!(thawed.path().join(IN_RANGE).is_dir());
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn restart_runs_once_per_run() -> anyhow::Result<()> {
        let archive = tempfile::tempdir()?;
        let thawed = tempfile::tempdir()?;
        let marker = tempfile::tempdir()?;
        let marker_file = marker.path().join("restarts");
        for i in 0..4 {
            seed_bucket(archive.path(), &format!("db_1609550000_1609560000_{i}"))?;
        }
        let mut config = restore_config(archive.path(), thawed.path())?;
        config.max_concurrent_buckets = 4;
        config.rebuild = Some(sh("test -d \"$1\"".to_string()));
        config.restart = Some(sh(format!("echo restarted >> '{}'", marker_file.display())));

        let summary = restore_local(config, archive.path()).await?;
        assert!(summary.is_success());
        assert_eq!(summary.restored, 4);
        assert_eq!(fs::read_to_string(&marker_file)?.lines().count(), 1);
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn restart_failure_is_reported() -> anyhow::Result<()> {
        let archive = tempfile::tempdir()?;
        let thawed = tempfile::tempdir()?;
        seed_bucket(archive.path(), IN_RANGE)?;
        let mut config = restore_config(archive.path(), thawed.path())?;
        config.restart = Some(sh("echo 'splunkd did not start' >&2; exit 1".to_string()));

        let summary = restore_local(config, archive.path()).await?;
        assert_eq!(summary.failed, 0);
        assert!(summary.restart_failure.as_deref().is_some_and(|r| r.contains("splunkd did not start")));
        assert!(!summary.is_success());
        assert!(thawed.path().join(IN_RANGE).is_dir(), "restart failure must not undo relocations");
        Ok(())
    }
}
