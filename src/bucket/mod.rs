// bucketrestore/src/bucket/mod.rs
pub(crate) mod identifier;
pub(crate) mod window;

pub use identifier::{BucketIdentifier, Malformed};
pub use window::{RestoreWindow, TimeBasis};
