// bucketrestore/src/discover/logic.rs
use anyhow::{Context, Result};

use crate::bucket::{BucketIdentifier, TimeBasis};
use crate::config::DiscoverConfig;
use crate::source::{self, BucketFootprint, BucketSource, SourceEntry};

const TABLE_WIDTH: usize = 112;

/// Oldest and newest decoded instants across the valid buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateRange {
    pub total_seen: usize,
    pub valid: usize,
    pub malformed: Vec<String>,
    pub oldest: Option<u64>,
    pub newest: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ListedBucket {
    pub id: BucketIdentifier,
    /// `None` when the bucket could not be measured.
    pub footprint: Option<BucketFootprint>,
}

pub async fn perform_range_discovery(config: &DiscoverConfig) -> Result<DateRange> {
    let source = source::build_source(&config.source, config.scratch_dir.as_deref())
        .await
        .context("Failed to open the bucket archive")?;
    println!("🔍 Scanning {} for bucket dates...", source.describe());
    let entries = list_entries(source.as_ref()).await?;
    let range = date_range(&entries);
    print_range(&range, config.time_basis);
    Ok(range)
}

pub async fn perform_bucket_listing(config: &DiscoverConfig) -> Result<Vec<ListedBucket>> {
    let source = source::build_source(&config.source, config.scratch_dir.as_deref())
        .await
        .context("Failed to open the bucket archive")?;
    println!("🔍 Listing buckets in {}...", source.describe());
    let listing = collect_listing(source.as_ref()).await?;
    print_listing(&listing, config.time_basis);
    Ok(listing)
}

async fn list_entries(source: &dyn BucketSource) -> Result<Vec<SourceEntry>> {
    source
        .list()
        .await
        .with_context(|| format!("Failed to list buckets in {}", source.describe()))
}

pub(crate) fn date_range(entries: &[SourceEntry]) -> DateRange {
    let mut range = DateRange {
        total_seen: entries.len(),
        ..DateRange::default()
    };
    for entry in entries {
        match BucketIdentifier::parse(&entry.raw_name) {
            Ok(id) => {
                let (lo, hi) = id.bounds();
                range.valid += 1;
                range.oldest = Some(range.oldest.map_or(lo, |o| o.min(lo)));
                range.newest = Some(range.newest.map_or(hi, |n| n.max(hi)));
            }
            Err(malformed) => {
                tracing::warn!(bucket = %entry.raw_name, reason = malformed.reason, "Ignoring malformed bucket name");
                range.malformed.push(entry.raw_name.clone());
            }
        }
    }
    range
}

/// Valid buckets with their footprint, sorted by ascending start.
pub(crate) async fn collect_listing(source: &dyn BucketSource) -> Result<Vec<ListedBucket>> {
    let entries = list_entries(source).await?;
    let mut listing = Vec::new();
    for entry in entries {
        let id = match BucketIdentifier::parse(&entry.raw_name) {
            Ok(id) => id,
            Err(malformed) => {
                tracing::debug!(bucket = %entry.raw_name, reason = malformed.reason, "Not listing malformed bucket");
                continue;
            }
        };
        let footprint = match source.measure(&entry).await {
            Ok(footprint) => Some(footprint),
            Err(e) => {
                tracing::warn!(bucket = %entry.raw_name, error = %e, "Could not measure bucket");
                None
            }
        };
        listing.push(ListedBucket { id, footprint });
    }
    listing.sort_by(|a, b| {
        a.id.bounds()
            .0
            .cmp(&b.id.bounds().0)
            .then_with(|| a.id.original_name().cmp(b.id.original_name()))
    });
    Ok(listing)
}

fn print_range(range: &DateRange, basis: TimeBasis) {
    match (range.oldest, range.newest) {
        (Some(oldest), Some(newest)) => {
            println!("✓ {} valid bucket(s) out of {}.", range.valid, range.total_seen);
            println!("Oldest date: {} ({})", basis.format_epoch(oldest), oldest);
            println!("Newest date: {} ({})", basis.format_epoch(newest), newest);
        }
        _ => println!("⚠️ No valid buckets found ({} entries listed).", range.total_seen),
    }
    if !range.malformed.is_empty() {
        println!("⚠️ {} malformed bucket name(s) ignored.", range.malformed.len());
    }
}

fn print_listing(listing: &[ListedBucket], basis: TimeBasis) {
    println!("{}", "=".repeat(TABLE_WIDTH));
    println!(
        "{:<50} {:<20} {:<20} {:<12} {:<8}",
        "Bucket Name", "Start Date", "End Date", "Size", "Files"
    );
    println!("{}", "-".repeat(TABLE_WIDTH));

    let mut total = BucketFootprint::default();
    for bucket in listing {
        let (lo, hi) = bucket.id.bounds();
        let (size, files) = match &bucket.footprint {
            Some(footprint) => {
                total.bytes += footprint.bytes;
                total.files += footprint.files;
                (footprint.human_size(), footprint.files.to_string())
            }
            None => ("?".to_string(), "?".to_string()),
        };
        println!(
            "{:<50} {:<20} {:<20} {:<12} {:<8}",
            bucket.id.original_name(),
            basis.format_epoch(lo),
            basis.format_epoch(hi),
            size,
            files
        );
    }

    println!("{}", "-".repeat(TABLE_WIDTH));
    println!(
        "Total buckets found: {} ({}, {} files)",
        listing.len(),
        total.human_size(),
        total.files
    );
    println!("{}", "=".repeat(TABLE_WIDTH));
}
