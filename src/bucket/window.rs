// bucketrestore/src/bucket/window.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::Deserialize;

use super::identifier::BucketIdentifier;

/// Textual format of window bounds and of every timestamp we print.
pub const WINDOW_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Timezone in which window bounds are read and decoded ranges are shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeBasis {
    #[default]
    Local,
    Utc,
}

impl TimeBasis {
    pub fn parse_timestamp(&self, text: &str) -> Result<i64> {
        let naive = NaiveDateTime::parse_from_str(text.trim(), WINDOW_TIME_FORMAT).with_context(|| {
            format!("Invalid date '{}'. Expected format: '{}'", text, WINDOW_TIME_FORMAT)
        })?;
        match self {
            TimeBasis::Utc => Ok(naive.and_utc().timestamp()),
            // A wall-clock time repeated by a DST fall-back resolves to its
            // first occurrence; one skipped by spring-forward does not exist.
            TimeBasis::Local => Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.timestamp())
                .with_context(|| format!("Date '{}' does not exist in the local timezone", text)),
        }
    }

    pub fn format_epoch(&self, epoch: u64) -> String {
        let Some(utc) = i64::try_from(epoch).ok().and_then(|secs| DateTime::from_timestamp(secs, 0)) else {
            return epoch.to_string();
        };
        match self {
            TimeBasis::Utc => utc.format(WINDOW_TIME_FORMAT).to_string(),
            TimeBasis::Local => utc.with_timezone(&Local).format(WINDOW_TIME_FORMAT).to_string(),
        }
    }
}

/// Inclusive `[oldest, newest]` restore window in epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreWindow {
    pub oldest: i64,
    pub newest: i64,
}

impl RestoreWindow {
    pub fn new(oldest: i64, newest: i64) -> Result<Self> {
        if oldest > newest {
            anyhow::bail!(
                "Restore window is inverted: oldest ({}) is after newest ({})",
                oldest,
                newest
            );
        }
        Ok(RestoreWindow { oldest, newest })
    }

    pub fn parse(oldest: &str, newest: &str, basis: TimeBasis) -> Result<Self> {
        let oldest_epoch = basis
            .parse_timestamp(oldest)
            .context("Failed to parse oldest_time")?;
        let newest_epoch = basis
            .parse_timestamp(newest)
            .context("Failed to parse newest_time")?;
        RestoreWindow::new(oldest_epoch, newest_epoch)
            .with_context(|| format!("Invalid restore window '{}' .. '{}'", oldest, newest))
    }

    /// True when the bucket's normalized interval touches the window.
    /// Both ends are inclusive.
    pub fn overlaps(&self, bucket: &BucketIdentifier) -> bool {
        let (lo, hi) = bucket.bounds();
        i128::from(lo) <= i128::from(self.newest) && i128::from(hi) >= i128::from(self.oldest)
    }
}
