// bucketrestore/src/dedupe/mod.rs
//! Clean-up of replicated buckets (`rb_*`) whose origin bucket (`db_*`) with
//! the same range and id is also in the archive.
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::bucket::BucketIdentifier;
use crate::config::{AppConfig, DedupeAction, DedupeConfig, OperationConfig};
use crate::relocate::{RelocationOutcome, Relocator, Transfer};
use crate::source::{BucketSource, LocalArchive, Locator};

const ORIGIN_PREFIX: &str = "db";
const REPLICA_PREFIX: &str = "rb";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Duplicate {
    pub name: String,
    pub path: PathBuf,
    pub origin: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuplicateScan {
    pub total_seen: usize,
    pub originals: usize,
    pub duplicates: Vec<Duplicate>,
    pub singles: usize,
    pub malformed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub handled: usize,
    pub kept: usize,
    pub failed: Vec<String>,
}

pub async fn run_dedupe_flow(app_config: &AppConfig) -> Result<()> {
    let dedupe_config = match &app_config.operation {
        Some(OperationConfig::Dedupe(cfg)) => cfg,
        _ => anyhow::bail!("Dedupe operation selected but no dedupe configuration found."),
    };

    let report = perform_dedupe(dedupe_config).await?;
    println!(
        "Duplicates handled: {}, left in place: {}, failed: {}",
        report.handled,
        report.kept,
        report.failed.len()
    );
    if !report.failed.is_empty() {
        anyhow::bail!(
            "{} duplicate bucket(s) could not be cleaned up: {}",
            report.failed.len(),
            report.failed.join(", ")
        );
    }
    Ok(())
}

async fn perform_dedupe(config: &DedupeConfig) -> Result<CleanupReport> {
    println!("🔍 Looking for replicated duplicates in {}...", config.archive_root.display());
    let archive = LocalArchive::new(config.archive_root.clone());
    let entries = archive
        .list()
        .await
        .with_context(|| format!("Failed to list buckets in {}", archive.describe()))?;

    let scan = find_duplicates(entries.into_iter().filter_map(|entry| match entry.locator {
        Locator::Path(path) => Some((entry.raw_name, path)),
        Locator::ObjectPrefix(_) => None,
    }));
    println!(
        "Buckets found: {} (origin with replica: {}, replicated duplicates: {}, single: {}, malformed: {})",
        scan.total_seen,
        scan.originals,
        scan.duplicates.len(),
        scan.singles,
        scan.malformed
    );

    match &config.action {
        DedupeAction::Show => {
            for duplicate in &scan.duplicates {
                println!("  {} (origin {})", duplicate.name, duplicate.origin);
            }
            Ok(CleanupReport {
                kept: scan.duplicates.len(),
                ..CleanupReport::default()
            })
        }
        DedupeAction::Remove => Ok(remove_duplicates(&scan.duplicates).await),
        DedupeAction::Move(target) => move_duplicates(&scan.duplicates, target.clone()).await,
    }
}

/// Groups valid buckets by `(start, end, id)`. Within a group holding an
/// origin bucket every replica is a duplicate.
pub(crate) fn find_duplicates(buckets: impl IntoIterator<Item = (String, PathBuf)>) -> DuplicateScan {
    let mut scan = DuplicateScan::default();
    let mut groups: BTreeMap<(u64, u64, String), Vec<(BucketIdentifier, PathBuf)>> = BTreeMap::new();

    for (name, path) in buckets {
        scan.total_seen += 1;
        match BucketIdentifier::parse(&name) {
            Ok(id) => groups
                .entry((id.start, id.end, id.id.clone()))
                .or_default()
                .push((id, path)),
            Err(malformed) => {
                tracing::warn!(bucket = %name, reason = malformed.reason, "Ignoring malformed bucket name");
                scan.malformed += 1;
            }
        }
    }

    for members in groups.into_values() {
        let origin = members
            .iter()
            .find(|(id, _)| id.prefix == ORIGIN_PREFIX)
            .map(|(id, _)| id.original_name().to_string());
        let Some(origin) = origin else {
            scan.singles += members.len();
            continue;
        };

        let mut replicas = 0;
        for (id, path) in &members {
            if id.prefix == REPLICA_PREFIX {
                replicas += 1;
                scan.duplicates.push(Duplicate {
                    name: id.original_name().to_string(),
                    path: path.clone(),
                    origin: origin.clone(),
                });
            }
        }
        if replicas > 0 {
            scan.originals += 1;
            scan.singles += members.len() - replicas - 1;
        } else {
            scan.singles += members.len();
        }
    }
    scan
}

async fn remove_duplicates(duplicates: &[Duplicate]) -> CleanupReport {
    println!("🗑️ Removing {} duplicate bucket(s)...", duplicates.len());
    let mut report = CleanupReport::default();
    for duplicate in duplicates {
        match tokio::fs::remove_dir_all(&duplicate.path).await {
            Ok(()) => {
                println!("✓ Removed {}", duplicate.name);
                report.handled += 1;
            }
            Err(e) => {
                tracing::error!(bucket = %duplicate.name, error = %e, "Failed to remove duplicate bucket");
                report.failed.push(duplicate.name.clone());
            }
        }
    }
    report
}

/// Copies each duplicate to `target` and deletes the archive copy once the
/// new one is in place.
async fn move_duplicates(duplicates: &[Duplicate], target: PathBuf) -> Result<CleanupReport> {
    println!("📦 Moving {} duplicate bucket(s) to {}...", duplicates.len(), target.display());
    let relocator = Relocator::new(target);
    relocator.prepare().await.context("Dedupe move_to directory is not usable")?;

    let mut report = CleanupReport::default();
    for duplicate in duplicates {
        match relocator.relocate(&duplicate.path, &duplicate.name, Transfer::Copy).await {
            RelocationOutcome::Done(destination) => match tokio::fs::remove_dir_all(&duplicate.path).await {
                Ok(()) => {
                    println!("✓ Moved {} to {}", duplicate.name, destination.display());
                    report.handled += 1;
                }
                Err(e) => {
                    tracing::error!(bucket = %duplicate.name, error = %e, "Copied duplicate but could not remove the original");
                    report.failed.push(duplicate.name.clone());
                }
            },
            RelocationOutcome::AlreadyPresent(destination) => {
                println!(
                    "⚠️ {} already exists at {}; leaving the archive copy in place",
                    duplicate.name,
                    destination.display()
                );
                report.kept += 1;
            }
            RelocationOutcome::Failed(reason) => {
                tracing::error!(bucket = %duplicate.name, %reason, "Failed to move duplicate bucket");
                report.failed.push(duplicate.name.clone());
            }
        }
    }
    Ok(report)
}
