// bucketrestore/src/source/object_store.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use super::{BucketFootprint, BucketResolution, BucketSource, Locator, SourceEntry};
use crate::errors::BucketError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

/// The two object-store operations the restore pipeline relies on.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn describe(&self) -> String;

    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectSummary>>;

    /// Writes the object to `destination` (parents must exist) and returns
    /// the number of bytes written.
    async fn download_object(&self, key: &str, destination: &Path) -> Result<u64>;
}

/// Zero-byte `.../` keys written by consoles and sync tools to mark a folder.
fn is_folder_marker(key: &str) -> bool {
    key.ends_with('/')
}

/// Archive mirrored in an object store under `<prefix>/<bucketName>/...`.
pub struct ObjectArchive {
    store: Arc<dyn ObjectStore>,
    prefix: Option<String>,
    scratch_dir: Option<PathBuf>,
}

impl ObjectArchive {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: Option<String>, scratch_dir: Option<PathBuf>) -> Self {
        let prefix = prefix
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());
        ObjectArchive {
            store,
            prefix,
            scratch_dir,
        }
    }

    fn listing_prefix(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/", prefix),
            None => String::new(),
        }
    }

    fn scratch(&self, name: &str) -> std::io::Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(".bucketrestore-download-");
        let created = match &self.scratch_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)
            }
            None => builder.tempdir(),
        };
        created.map_err(|e| std::io::Error::new(e.kind(), format!("scratch space for {}: {}", name, e)))
    }
}

#[async_trait]
impl BucketSource for ObjectArchive {
    fn describe(&self) -> String {
        format!("{}/{}", self.store.describe(), self.listing_prefix())
    }

    async fn list(&self) -> Result<Vec<SourceEntry>> {
        let listing_prefix = self.listing_prefix();
        let objects = self
            .store
            .list_objects(&listing_prefix)
            .await
            .with_context(|| format!("Cannot list objects under {}", self.describe()))?;

        let mut grouped: BTreeMap<String, BucketFootprint> = BTreeMap::new();
        for object in objects {
            if is_folder_marker(&object.key) {
                continue;
            }
            let Some(relative) = object.key.strip_prefix(&listing_prefix) else {
                continue;
            };
            // Only keys inside a bucket "directory" count; a bare object at
            // the prefix level is not a bucket.
            match relative.split_once('/') {
                Some((name, rest)) if !name.is_empty() && !rest.is_empty() => {
                    grouped.entry(name.to_string()).or_default().add_file(object.size);
                }
                _ => tracing::debug!(key = %object.key, "Ignoring object outside a bucket directory"),
            }
        }

        Ok(grouped
            .into_iter()
            .map(|(name, footprint)| SourceEntry {
                locator: Locator::ObjectPrefix(format!("{}{}/", listing_prefix, name)),
                raw_name: name,
                footprint: Some(footprint),
            })
            .collect())
    }

    async fn resolve(&self, entry: &SourceEntry) -> std::result::Result<BucketResolution, BucketError> {
        let name = entry.raw_name.as_str();
        let Locator::ObjectPrefix(bucket_prefix) = &entry.locator else {
            return Err(BucketError::resolve(name, &entry.locator, "object archive cannot resolve a filesystem locator"));
        };

        let objects: Vec<ObjectSummary> = self
            .store
            .list_objects(bucket_prefix)
            .await
            .map_err(|e| BucketError::resolve(name, bucket_prefix, format!("{:#}", e)))?
            .into_iter()
            .filter(|object| !is_folder_marker(&object.key))
            .collect();
        if objects.is_empty() {
            return Err(BucketError::resolve(name, bucket_prefix, "no objects found"));
        }

        // Dropping `scratch` on any early return removes partial downloads.
        let scratch = self.scratch(name).map_err(|e| BucketError::io(self.scratch_dir.clone().unwrap_or_default(), e))?;
        let bucket_dir = scratch.path().join(name);

        let mut total_bytes = 0u64;
        for object in &objects {
            let relative = object.key.strip_prefix(bucket_prefix.as_str()).unwrap_or(&object.key);
            let local_path = safe_join(&bucket_dir, relative).ok_or_else(|| {
                BucketError::resolve(name, &object.key, "object key escapes the bucket directory")
            })?;
            if let Some(parent) = local_path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| BucketError::io(parent, e))?;
            }
            total_bytes += self
                .store
                .download_object(&object.key, &local_path)
                .await
                .map_err(|e| BucketError::resolve(name, &object.key, format!("{:#}", e)))?;
        }

        tracing::info!(
            bucket = %name,
            objects = objects.len(),
            bytes = total_bytes,
            "Downloaded bucket to scratch space"
        );
        Ok(BucketResolution::downloaded(bucket_dir, scratch))
    }
}

/// Joins an object-key suffix under `base`, refusing anything that would
/// land outside it.
fn safe_join(base: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative.trim_start_matches('/'));
    let mut joined = base.to_path_buf();
    let mut pushed = false;
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                joined.push(part);
                pushed = true;
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    pushed.then_some(joined)
}
