// bucketrestore/src/bucket/identifier.rs
use std::fmt;

use thiserror::Error;

const FIELD_SEPARATOR: char = '_';
const EXPECTED_FIELDS: usize = 4;

/// A bucket name that does not decompose into
/// `{prefix}_{startEpoch}_{endEpoch}_{randomId}`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed bucket name '{name}': {reason}")]
pub struct Malformed {
    pub name: String,
    pub reason: &'static str,
}

/// Structured view of a bucket directory name.
///
/// `start` and `end` are kept exactly as encoded. Archives written by
/// Splunk store the newest bound first, so the two may be reversed or equal;
/// use [`BucketIdentifier::bounds`] for ordered comparisons.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketIdentifier {
    pub prefix: String,
    pub start: u64,
    pub end: u64,
    pub id: String,
    original_name: String,
}

impl BucketIdentifier {
    /// Strict parse: exactly four non-empty fields, the middle two made of
    /// ASCII digits only. Names with more fields are rejected rather than
    /// re-joined into the prefix.
    pub fn parse(name: &str) -> Result<Self, Malformed> {
        let malformed = |reason| Malformed {
            name: name.to_string(),
            reason,
        };

        let fields: Vec<&str> = name.split(FIELD_SEPARATOR).collect();
        if fields.len() != EXPECTED_FIELDS {
            return Err(malformed("expected exactly four '_' separated fields"));
        }
        if fields.iter().any(|f| f.is_empty()) {
            return Err(malformed("empty field"));
        }

        let start = parse_epoch(fields[1]).ok_or_else(|| malformed("start epoch is not a non-negative integer"))?;
        let end = parse_epoch(fields[2]).ok_or_else(|| malformed("end epoch is not a non-negative integer"))?;

        Ok(BucketIdentifier {
            prefix: fields[0].to_string(),
            start,
            end,
            id: fields[3].to_string(),
            original_name: name.to_string(),
        })
    }

    /// The full name as found in the archive. Restored buckets keep it so
    /// downstream re-indexing recognizes them.
    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    /// `(min(start, end), max(start, end))`
    pub fn bounds(&self) -> (u64, u64) {
        (self.start.min(self.end), self.start.max(self.end))
    }
}

impl fmt::Display for BucketIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original_name)
    }
}

// `u64::from_str` accepts a leading '+', which is not a valid epoch field.
fn parse_epoch(field: &str) -> Option<u64> {
    if !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}
