mod context;
mod logic;
pub(crate) mod summary;

use anyhow::Result;
use crate::config::AppConfig;

pub use summary::RunSummary;

/// Public entry point for the restore process.
pub async fn run_restore_flow(app_config: &AppConfig) -> Result<RunSummary> {
    let restore_config = match &app_config.operation {
        Some(crate::config::OperationConfig::Restore(cfg)) => cfg,
        _ => anyhow::bail!("Restore operation selected but no restore configuration found."),
    };

    let summary = logic::perform_restore_orchestration(restore_config).await?;
    summary.print();
    Ok(summary)
}
