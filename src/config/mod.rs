// bucketrestore/src/config/mod.rs
use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bucket::{RestoreWindow, TimeBasis};
use crate::source::s3::parse_s3_uri;

pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const CONFIG_PATH_ENV: &str = "BUCKETRESTORE_CONFIG";

const DEFAULT_CONCURRENCY: usize = 1;
const MAX_CONCURRENCY: usize = 16;
const DEFAULT_INTEGRITY_TIMEOUT_SECS: u64 = 600;
const DEFAULT_REBUILD_TIMEOUT_SECS: u64 = 1800;
const DEFAULT_RESTART_TIMEOUT_SECS: u64 = 900;
const SPLUNK_INTEGRITY_PATTERN: &str = r"succeeded=(?P<succeeded>\d+),\s*failed=(?P<failed>\d+)";

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonS3StorageConfig {
    pub bucket_name: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
    pub folder_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonCommandConfig {
    pub enabled: Option<bool>,
    pub program: Option<PathBuf>,
    pub args: Option<Vec<String>>,
    pub timeout_secs: Option<u64>,
    pub output_pattern: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonDedupeOptions {
    pub action: Option<String>,
    pub move_to: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub archive_path: Option<String>,
    pub destination_path: Option<PathBuf>,
    pub oldest_time: Option<String>,
    pub newest_time: Option<String>,
    pub window_timezone: Option<TimeBasis>,
    pub max_concurrent_buckets: Option<usize>,
    pub scratch_dir: Option<PathBuf>,
    pub splunk_home: Option<PathBuf>,
    pub index: Option<String>,
    pub s3_storage: Option<JsonS3StorageConfig>,
    pub integrity_check: Option<JsonCommandConfig>,
    pub rebuild: Option<JsonCommandConfig>,
    pub restart: Option<JsonCommandConfig>,
    pub dedupe: Option<JsonDedupeOptions>,
}

// Application's internal configuration structs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStoreConfig {
    pub bucket_name: String,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub credentials: Option<StaticCredentials>,
    pub folder_prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveSource {
    Local(PathBuf),
    ObjectStore(ObjectStoreConfig),
}

/// An external collaborator invocation. `args` may contain the `{bucket}`
/// and `{name}` placeholders, filled in per bucket at run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct IntegrityConfig {
    pub command: CommandSpec,
    pub output_pattern: Option<Regex>,
}

#[derive(Debug, Clone)]
pub struct RestoreConfig {
    pub source: ArchiveSource,
    pub destination_root: PathBuf,
    pub window: RestoreWindow,
    pub time_basis: TimeBasis,
    pub max_concurrent_buckets: usize,
    pub scratch_dir: Option<PathBuf>,
    pub integrity: Option<IntegrityConfig>,
    pub rebuild: Option<CommandSpec>,
    pub restart: Option<CommandSpec>,
}

#[derive(Debug, Clone)]
pub struct DiscoverConfig {
    pub source: ArchiveSource,
    pub time_basis: TimeBasis,
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupeAction {
    Show,
    Move(PathBuf),
    Remove,
}

#[derive(Debug, Clone)]
pub struct DedupeConfig {
    pub archive_root: PathBuf,
    pub action: DedupeAction,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub operation: Option<OperationConfig>,
    pub object_store: Option<ObjectStoreConfig>,
    pub raw_json_config: RawJsonConfig,
}

#[derive(Debug, Clone)]
pub enum OperationConfig {
    Restore(RestoreConfig),
    Discover(DiscoverConfig),
    List(DiscoverConfig),
    Dedupe(DedupeConfig),
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        Self::from_json_str(&config_content).with_context(|| {
            format!(
                "Failed to parse JSON from config file at {}",
                config_path.display()
            )
        })
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw_json_config: RawJsonConfig = serde_json::from_str(content)?;
        let object_store = raw_json_config.s3_storage.as_ref().and_then(object_store_from_raw);

        Ok(AppConfig {
            operation: None, // To be filled by main after parsing CLI args
            object_store,
            raw_json_config,
        })
    }
}

/// Builds the object-store settings from the `s3_storage` block. Region,
/// endpoint and keys are optional; missing ones fall back to the SDK's
/// default provider chain.
fn object_store_from_raw(s3_raw: &JsonS3StorageConfig) -> Option<ObjectStoreConfig> {
    let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());

    let credentials = match (non_empty(&s3_raw.access_key_id), non_empty(&s3_raw.secret_access_key)) {
        (Some(access_key_id), Some(secret_access_key)) => Some(StaticCredentials {
            access_key_id,
            secret_access_key,
        }),
        (None, None) => None,
        _ => {
            tracing::warn!(
                "s3_storage has only one of access_key_id/secret_access_key; using the default credential chain"
            );
            None
        }
    };

    Some(ObjectStoreConfig {
        bucket_name: non_empty(&s3_raw.bucket_name).unwrap_or_default(),
        region: non_empty(&s3_raw.region),
        endpoint_url: non_empty(&s3_raw.endpoint_url),
        credentials,
        folder_prefix: non_empty(&s3_raw.folder_prefix).map(|p| p.trim_matches('/').to_string()),
    })
}

/// Picks the archive backend. An `s3://bucket/prefix` archive path, or no
/// archive path with `s3_storage.bucket_name` set, selects the object store.
/// Without any prefix, object keys are expected under `<index>/`.
pub fn resolve_archive_source(
    raw_config: &RawJsonConfig,
    object_store: Option<&ObjectStoreConfig>,
) -> Result<ArchiveSource> {
    let mut store = match raw_config.archive_path.as_deref().map(str::trim) {
        Some(path) if path.starts_with("s3://") => {
            let (bucket_name, prefix) = parse_s3_uri(path)?;
            let mut store = object_store.cloned().unwrap_or(ObjectStoreConfig {
                bucket_name: String::new(),
                region: None,
                endpoint_url: None,
                credentials: None,
                folder_prefix: None,
            });
            store.bucket_name = bucket_name;
            if prefix.is_some() {
                store.folder_prefix = prefix;
            }
            store
        }
        Some(path) if !path.is_empty() => return Ok(ArchiveSource::Local(PathBuf::from(path))),
        _ => match object_store {
            Some(store) if !store.bucket_name.is_empty() => store.clone(),
            _ => anyhow::bail!(
                "archive_path must be set in config.json (a local directory or an s3:// URI), or s3_storage.bucket_name must be configured"
            ),
        },
    };

    if store.folder_prefix.is_none() {
        store.folder_prefix = raw_config
            .index
            .as_deref()
            .map(|index| index.trim().trim_matches('/'))
            .filter(|index| !index.is_empty())
            .map(str::to_string);
    }
    Ok(ArchiveSource::ObjectStore(store))
}

pub fn load_restore_config_from_json(
    raw_config: &RawJsonConfig,
    object_store: Option<&ObjectStoreConfig>,
) -> Result<RestoreConfig> {
    let time_basis = raw_config.window_timezone.unwrap_or_default();
    let oldest = raw_config
        .oldest_time
        .as_ref()
        .context("oldest_time must be set in config.json for restore")?;
    let newest = raw_config
        .newest_time
        .as_ref()
        .context("newest_time must be set in config.json for restore")?;
    let window = RestoreWindow::parse(oldest, newest, time_basis)?;

    let destination_root = raw_config
        .destination_path
        .as_ref()
        .context("destination_path must be set in config.json for restore")?
        .clone();
    if destination_root.as_os_str().is_empty() {
        return Err(anyhow::anyhow!("destination_path cannot be empty in config.json."));
    }

    let source = resolve_archive_source(raw_config, object_store)?;
    if let ArchiveSource::Local(archive_root) = &source {
        if archive_root == &destination_root {
            return Err(anyhow::anyhow!(
                "archive_path and destination_path must differ (both are {})",
                archive_root.display()
            ));
        }
    }

    let max_concurrent_buckets = raw_config
        .max_concurrent_buckets
        .unwrap_or(DEFAULT_CONCURRENCY)
        .clamp(1, MAX_CONCURRENCY);

    Ok(RestoreConfig {
        source,
        destination_root,
        window,
        time_basis,
        max_concurrent_buckets,
        scratch_dir: raw_config.scratch_dir.clone(),
        integrity: load_integrity_config(raw_config)?,
        rebuild: load_command_spec(
            raw_config,
            raw_config.rebuild.as_ref(),
            "rebuild",
            &["rebuild", "{bucket}", "{index}"],
            DEFAULT_REBUILD_TIMEOUT_SECS,
        )?
        .map(|(spec, _)| spec),
        restart: load_command_spec(
            raw_config,
            raw_config.restart.as_ref(),
            "restart",
            &["restart"],
            DEFAULT_RESTART_TIMEOUT_SECS,
        )?
        .map(|(spec, _)| spec),
    })
}

pub fn load_discover_config_from_json(
    raw_config: &RawJsonConfig,
    object_store: Option<&ObjectStoreConfig>,
) -> Result<DiscoverConfig> {
    Ok(DiscoverConfig {
        source: resolve_archive_source(raw_config, object_store)?,
        time_basis: raw_config.window_timezone.unwrap_or_default(),
        scratch_dir: raw_config.scratch_dir.clone(),
    })
}

pub fn load_dedupe_config_from_json(raw_config: &RawJsonConfig) -> Result<DedupeConfig> {
    let archive_root = match resolve_archive_source(raw_config, None)? {
        ArchiveSource::Local(path) => path,
        ArchiveSource::ObjectStore(_) => {
            return Err(anyhow::anyhow!(
                "dedupe works on a local archive; archive_path must not be an s3:// URI"
            ));
        }
    };

    let options = raw_config.dedupe.clone().unwrap_or_default();
    let action = match options.action.as_deref().map(str::trim).unwrap_or("show") {
        "show" => DedupeAction::Show,
        "remove" => DedupeAction::Remove,
        "move" => DedupeAction::Move(
            options
                .move_to
                .context("dedupe.move_to must be set in config.json when dedupe.action is 'move'")?,
        ),
        other => {
            return Err(anyhow::anyhow!(
                "dedupe.action must be one of 'show', 'move' or 'remove', got '{}'",
                other
            ));
        }
    };

    Ok(DedupeConfig { archive_root, action })
}

fn load_integrity_config(raw_config: &RawJsonConfig) -> Result<Option<IntegrityConfig>> {
    let Some((command, defaulted_args)) = load_command_spec(
        raw_config,
        raw_config.integrity_check.as_ref(),
        "integrity_check",
        &["check-integrity", "-bucketPath", "{bucket}"],
        DEFAULT_INTEGRITY_TIMEOUT_SECS,
    )?
    else {
        return Ok(None);
    };

    let pattern = match raw_config
        .integrity_check
        .as_ref()
        .and_then(|c| c.output_pattern.clone())
    {
        Some(p) => Some(p),
        // The Splunk defaults also know how Splunk reports the outcome.
        None if defaulted_args => Some(SPLUNK_INTEGRITY_PATTERN.to_string()),
        None => None,
    };
    let output_pattern = pattern
        .map(|p| Regex::new(&p).with_context(|| format!("integrity_check.output_pattern is not a valid regex: {}", p)))
        .transpose()?;

    Ok(Some(IntegrityConfig {
        command,
        output_pattern,
    }))
}

/// Resolves one collaborator block. Returns `None` when the block is absent
/// or disabled; the boolean reports whether the Splunk default arguments
/// were used.
fn load_command_spec(
    raw_config: &RawJsonConfig,
    block: Option<&JsonCommandConfig>,
    field: &str,
    default_args: &[&str],
    default_timeout_secs: u64,
) -> Result<Option<(CommandSpec, bool)>> {
    let Some(block) = block else {
        return Ok(None);
    };
    if !block.enabled.unwrap_or(true) {
        return Ok(None);
    }

    let program = match (&block.program, &raw_config.splunk_home) {
        (Some(program), _) => program.clone(),
        (None, Some(home)) => home.join("bin").join("splunk"),
        (None, None) => {
            return Err(anyhow::anyhow!(
                "{}.program must be set in config.json (or splunk_home for the Splunk default)",
                field
            ));
        }
    };
    let program = locate_program(&program).with_context(|| format!("{}.program is not usable", field))?;

    let defaulted_args = block.args.is_none();
    let args = block
        .args
        .clone()
        .unwrap_or_else(|| default_args.iter().map(|s| s.to_string()).collect());

    // `{index}` is known now; `{bucket}` and `{name}` are filled per bucket.
    let args = if args.iter().any(|a| a.contains("{index}")) {
        let index = raw_config
            .index
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .with_context(|| format!("index must be set in config.json because {}.args uses {{index}}", field))?;
        args.into_iter().map(|a| a.replace("{index}", index)).collect()
    } else {
        args
    };

    Ok(Some((
        CommandSpec {
            program,
            args,
            timeout: Duration::from_secs(block.timeout_secs.unwrap_or(default_timeout_secs).max(1)),
        },
        defaulted_args,
    )))
}

/// Bare names are looked up in PATH; anything with a directory part must exist.
fn locate_program(program: &Path) -> Result<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        if !program.is_file() {
            return Err(anyhow::anyhow!("executable not found: {}", program.display()));
        }
        return Ok(program.to_path_buf());
    }
    which::which(program).with_context(|| format!("{} not found in PATH", program.display()))
}
