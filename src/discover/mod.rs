// bucketrestore/src/discover/mod.rs
//! Read-only views of an archive: the overall date range, or a per-bucket
//! table. Nothing is relocated.
mod logic;

use anyhow::Result;
use crate::config::{AppConfig, OperationConfig};

pub async fn run_discover_flow(app_config: &AppConfig) -> Result<()> {
    match &app_config.operation {
        Some(OperationConfig::Discover(cfg)) => {
            logic::perform_range_discovery(cfg).await?;
        }
        Some(OperationConfig::List(cfg)) => {
            logic::perform_bucket_listing(cfg).await?;
        }
        _ => anyhow::bail!("Discovery selected but no discovery configuration found."),
    }
    Ok(())
}
