//! Frozen Bucket Restore Tool
//!
//! Restores archived time-partitioned buckets into a live index directory,
//! and inspects or cleans up the archive they come from.

// bucketrestore/src/main.rs
mod bucket;
mod config;
mod dedupe;
mod discover;
mod errors;
mod external;
mod integrity;
mod relocate;
mod restore;
mod source;
mod telemetry;

use anyhow::{Context, Result};
use config::{
    AppConfig, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH, OperationConfig, load_dedupe_config_from_json,
    load_discover_config_from_json, load_restore_config_from_json,
};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    telemetry::init();

    match run_app().await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    let config_path = env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut app_config = AppConfig::load_from_json(&config_path)
        .with_context(|| format!("Failed to load application configuration from {}", config_path.display()))?;

    let args: Vec<String> = env::args().collect();
    let choice = if args.len() > 1 {
        args[1].trim().to_string()
    } else {
        prompt_choice()?
    };

    match choice.as_str() {
        "1" | "restore" => {
            println!("🚀 Starting Restore Process...");
            let restore_config =
                load_restore_config_from_json(&app_config.raw_json_config, app_config.object_store.as_ref())
                    .context("Failed to load restore configuration from JSON")?;
            app_config.operation = Some(OperationConfig::Restore(restore_config));
            let summary = restore::run_restore_flow(&app_config)
                .await
                .context("Restore process failed")?;
            if !summary.is_success() {
                anyhow::bail!(
                    "Restore finished with {} failed bucket(s){}{}",
                    summary.failed,
                    if summary.interrupted { ", interrupted" } else { "" },
                    if summary.restart_failure.is_some() { ", restart failed" } else { "" }
                );
            }
        }
        "2" | "discover" => {
            println!("🔍 Starting Discovery...");
            let discover_config =
                load_discover_config_from_json(&app_config.raw_json_config, app_config.object_store.as_ref())
                    .context("Failed to load discovery configuration from JSON")?;
            app_config.operation = Some(OperationConfig::Discover(discover_config));
            discover::run_discover_flow(&app_config)
                .await
                .context("Discovery failed")?;
        }
        "3" | "list" => {
            println!("📋 Listing Buckets...");
            let discover_config =
                load_discover_config_from_json(&app_config.raw_json_config, app_config.object_store.as_ref())
                    .context("Failed to load discovery configuration from JSON")?;
            app_config.operation = Some(OperationConfig::List(discover_config));
            discover::run_discover_flow(&app_config)
                .await
                .context("Bucket listing failed")?;
        }
        "4" | "dedupe" => {
            println!("🧹 Starting Duplicate Cleanup...");
            let dedupe_config = load_dedupe_config_from_json(&app_config.raw_json_config)
                .context("Failed to load dedupe configuration from JSON")?;
            app_config.operation = Some(OperationConfig::Dedupe(dedupe_config));
            dedupe::run_dedupe_flow(&app_config)
                .await
                .context("Duplicate cleanup failed")?;
        }
        _ => {
            println!("❌ Invalid choice. Please enter '1' (restore), '2' (discover), '3' (list) or '4' (dedupe).");
            anyhow::bail!("Invalid operation choice");
        }
    }
    Ok(())
}

/// Prompts the user to select an operation.
fn prompt_choice() -> Result<String> {
    use std::io::{Write, stdin, stdout};

    println!("Select an operation:");
    println!("1. Restore buckets in the configured window (or type 'restore')");
    println!("2. Show oldest/newest bucket dates (or type 'discover')");
    println!("3. List buckets with sizes (or type 'list')");
    println!("4. Clean up replicated duplicates (or type 'dedupe')");
    print!("Enter your choice: ");
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin().read_line(&mut input).context("Failed to read user input")?;
    Ok(input.trim().to_string())
}
