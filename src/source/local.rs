// bucketrestore/src/source/local.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{BucketFootprint, BucketResolution, BucketSource, Locator, SourceEntry};
use crate::errors::BucketError;

/// A frozen archive on a locally mounted filesystem: every immediate
/// subdirectory of `root` is a candidate bucket.
#[derive(Debug, Clone)]
pub struct LocalArchive {
    root: PathBuf,
}

impl LocalArchive {
    pub fn new(root: PathBuf) -> Self {
        LocalArchive { root }
    }
}

#[async_trait]
impl BucketSource for LocalArchive {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    async fn list(&self) -> Result<Vec<SourceEntry>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || list_bucket_dirs(&root))
            .await
            .context("Listing task panicked")?
    }

    async fn resolve(&self, entry: &SourceEntry) -> std::result::Result<BucketResolution, BucketError> {
        let Locator::Path(path) = &entry.locator else {
            return Err(BucketError::resolve(
                &entry.raw_name,
                &entry.locator,
                "local archive cannot resolve a non-filesystem locator",
            ));
        };
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => Ok(BucketResolution::in_archive(path.clone())),
            Ok(_) => Err(BucketError::resolve(&entry.raw_name, path.display(), "not a directory")),
            Err(e) => Err(BucketError::io(path, e)),
        }
    }

    async fn measure(&self, entry: &SourceEntry) -> Result<BucketFootprint> {
        let Locator::Path(path) = entry.locator.clone() else {
            anyhow::bail!("{} is not a local bucket", entry.raw_name);
        };
        tokio::task::spawn_blocking(move || measure_dir(&path))
            .await
            .context("Measuring task panicked")?
    }
}

fn list_bucket_dirs(root: &Path) -> Result<Vec<SourceEntry>> {
    let entries = fs::read_dir(root)
        .with_context(|| format!("Cannot access archive root: {}", root.display()))?;

    let mut found = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "Skipping unreadable archive entry");
                continue;
            }
        };
        let path = entry.path();
        // Follows symlinks so that a linked bucket directory still counts.
        match fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable bucket directory");
                continue;
            }
        }
        let Some(raw_name) = entry.file_name().to_str().map(str::to_string) else {
            tracing::warn!(path = %path.display(), "Skipping bucket directory with a non UTF-8 name");
            continue;
        };
        found.push(SourceEntry {
            raw_name,
            locator: Locator::Path(path),
            footprint: None,
        });
    }

    found.sort_by(|a, b| a.raw_name.cmp(&b.raw_name));
    Ok(found)
}

fn measure_dir(dir: &Path) -> Result<BucketFootprint> {
    let mut footprint = BucketFootprint::default();
    for entry in WalkDir::new(dir) {
        let entry = entry.with_context(|| format!("Failed to walk directory: {}", dir.display()))?;
        if entry.file_type().is_file() {
            let len = entry
                .metadata()
                .with_context(|| format!("Failed to stat {}", entry.path().display()))?
                .len();
            footprint.add_file(len);
        }
    }
    Ok(footprint)
}
