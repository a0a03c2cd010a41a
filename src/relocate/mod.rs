// bucketrestore/src/relocate/mod.rs
//! All-or-nothing placement of bucket directories under the destination
//! root.
//!
//! A bucket is first assembled in a hidden staging directory next to its
//! final location and then published with a single `rename`. The staging
//! name contains no `_`, so a leftover can never parse as a bucket name and
//! never satisfies the already-restored check.
use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

const STAGING_PREFIX: &str = ".bucketrestore-";
const STAGING_SUFFIX: &str = ".partial";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Source stays untouched (archive directories).
    Copy,
    /// Source may be consumed (scratch downloads); falls back to copying
    /// across filesystems.
    Move,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelocationOutcome {
    Done(PathBuf),
    /// An entry with the bucket's name already exists; nothing was written.
    AlreadyPresent(PathBuf),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct Relocator {
    destination_root: PathBuf,
}

impl Relocator {
    pub fn new(destination_root: PathBuf) -> Self {
        Relocator { destination_root }
    }

    pub fn destination_for(&self, name: &str) -> PathBuf {
        self.destination_root.join(name)
    }

    /// Creates the destination root and clears staging leftovers from an
    /// interrupted earlier run.
    pub async fn prepare(&self) -> Result<()> {
        let root = self.destination_root.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            fs::create_dir_all(&root)
                .with_context(|| format!("Failed to create destination directory: {}", root.display()))?;
            for entry in fs::read_dir(&root)
                .with_context(|| format!("Cannot read destination directory: {}", root.display()))?
            {
                let entry = entry.with_context(|| format!("Cannot read destination directory: {}", root.display()))?;
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.starts_with(STAGING_PREFIX) && name.ends_with(STAGING_SUFFIX) {
                    tracing::warn!(path = %entry.path().display(), "Removing leftover staging directory");
                    remove_staging(&entry.path());
                }
            }
            Ok(())
        })
        .await
        .context("Destination preparation task panicked")?
    }

    /// Whether the destination already holds an entry for `name`.
    pub async fn is_present(&self, name: &str) -> bool {
        tokio::fs::symlink_metadata(self.destination_for(name)).await.is_ok()
    }

    pub async fn relocate(&self, source: &Path, name: &str, transfer: Transfer) -> RelocationOutcome {
        let source = source.to_path_buf();
        let root = self.destination_root.clone();
        let name_owned = name.to_string();
        match tokio::task::spawn_blocking(move || relocate_blocking(&source, &root, &name_owned, transfer)).await {
            Ok(outcome) => outcome,
            Err(e) => RelocationOutcome::Failed(format!("relocation task for {} panicked: {}", name, e)),
        }
    }
}

fn relocate_blocking(source: &Path, root: &Path, name: &str, transfer: Transfer) -> RelocationOutcome {
    let destination = root.join(name);
    if destination.symlink_metadata().is_ok() {
        return RelocationOutcome::AlreadyPresent(destination);
    }

    let staging = root.join(format!("{}{}{}", STAGING_PREFIX, Uuid::new_v4(), STAGING_SUFFIX));
    let staged = match transfer {
        Transfer::Move => fs::rename(source, &staging).or_else(|e| {
            tracing::debug!(bucket = %name, error = %e, "Rename not possible, copying instead");
            copy_tree(source, &staging)
        }),
        Transfer::Copy => copy_tree(source, &staging),
    };
    if let Err(e) = staged {
        remove_staging(&staging);
        return RelocationOutcome::Failed(format!(
            "copying {} to {}: {}",
            source.display(),
            destination.display(),
            e
        ));
    }

    match fs::rename(&staging, &destination) {
        Ok(()) => RelocationOutcome::Done(destination),
        Err(e) => {
            remove_staging(&staging);
            if destination.symlink_metadata().is_ok() {
                // Another writer published the same bucket first.
                RelocationOutcome::AlreadyPresent(destination)
            } else {
                RelocationOutcome::Failed(format!("publishing {}: {}", destination.display(), e))
            }
        }
    }
}

/// Recursive copy. Symlinks are followed, so a dangling one is an error.
fn copy_tree(source: &Path, target: &Path) -> io::Result<()> {
    if !source.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", source.display()),
        ));
    }
    fs::create_dir(target)?;
    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry.path().strip_prefix(source).map_err(io::Error::other)?;
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir(&destination)?;
        } else {
            fs::copy(entry.path(), &destination).map_err(|e| {
                io::Error::new(e.kind(), format!("{}: {}", entry.path().display(), e))
            })?;
        }
    }
    Ok(())
}

fn remove_staging(staging: &Path) {
    match fs::remove_dir_all(staging) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::error!(path = %staging.display(), error = %e, "Failed to remove staging directory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_bucket(root: &Path, name: &str) -> anyhow::Result<PathBuf> {
        let bucket = root.join(name);
        fs::create_dir_all(bucket.join("rawdata"))?;
        fs::write(bucket.join("rawdata").join("journal.zst"), "journal")?;
        fs::write(bucket.join("Hosts.data"), "hosts")?;
        Ok(bucket)
    }

    fn entries(dir: &Path) -> anyhow::Result<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(dir)?
            .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<io::Result<_>>()?;
        names.sort();
        Ok(names)
    }

    #[tokio::test]
    async fn copies_bucket_under_original_name() -> anyhow::Result<()> {
        let archive = tempfile::tempdir()?;
        let thawed = tempfile::tempdir()?;
        let source = seed_bucket(archive.path(), "db_1_2_3")?;
        let relocator = Relocator::new(thawed.path().to_path_buf());

        let outcome = relocator.relocate(&source, "db_1_2_3", Transfer::Copy).await;
        assert_eq!(outcome, RelocationOutcome::Done(thawed.path().join("db_1_2_3")));
        assert_eq!(fs::read_to_string(thawed.path().join("db_1_2_3/rawdata/journal.zst"))?, "journal");
        assert!(source.join("Hosts.data").exists(), "archive copy must stay intact");
        assert_eq!(entries(thawed.path())?, vec!["db_1_2_3"]);
        Ok(())
    }

    #[tokio::test]
    async fn existing_destination_is_left_alone() -> anyhow::Result<()> {
        let archive = tempfile::tempdir()?;
        let thawed = tempfile::tempdir()?;
        let source = seed_bucket(archive.path(), "db_1_2_3")?;
        fs::create_dir_all(thawed.path().join("db_1_2_3"))?;
        fs::write(thawed.path().join("db_1_2_3").join("marker"), "old")?;
        let relocator = Relocator::new(thawed.path().to_path_buf());

        let outcome = relocator.relocate(&source, "db_1_2_3", Transfer::Copy).await;
        assert_eq!(outcome, RelocationOutcome::AlreadyPresent(thawed.path().join("db_1_2_3")));
        assert_eq!(fs::read_to_string(thawed.path().join("db_1_2_3/marker"))?, "old");
        assert!(!thawed.path().join("db_1_2_3/Hosts.data").exists());
        assert!(relocator.is_present("db_1_2_3").await);
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn mid_copy_failure_leaves_nothing_behind() -> anyhow::Result<()> {
        let archive = tempfile::tempdir()?;
        let thawed = tempfile::tempdir()?;
        let source = seed_bucket(archive.path(), "db_1_2_3")?;
        // Copying through a dangling link fails after other files were copied.
        std::os::unix::fs::symlink(archive.path().join("gone"), source.join("rawdata").join("zz_dangling"))?;
        let relocator = Relocator::new(thawed.path().to_path_buf());

        let outcome = relocator.relocate(&source, "db_1_2_3", Transfer::Copy).await;
        assert!(matches!(outcome, RelocationOutcome::Failed(_)), "{outcome:?}");
        assert!(entries(thawed.path())?.is_empty());
        assert!(!relocator.is_present("db_1_2_3").await);
        Ok(())
    }

    #[tokio::test]
    async fn missing_source_fails_cleanly() -> anyhow::Result<()> {
        let thawed = tempfile::tempdir()?;
        let relocator = Relocator::new(thawed.path().to_path_buf());
        let outcome = relocator
            .relocate(Path::new("/definitely/not/a/bucket"), "db_1_2_3", Transfer::Copy)
            .await;
        assert!(matches!(outcome, RelocationOutcome::Failed(_)));
        assert!(entries(thawed.path())?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn move_consumes_scratch_copy() -> anyhow::Result<()> {
        let scratch = tempfile::tempdir()?;
        let thawed = tempfile::tempdir()?;
        let source = seed_bucket(scratch.path(), "db_1_2_3")?;
        let relocator = Relocator::new(thawed.path().to_path_buf());

        let outcome = relocator.relocate(&source, "db_1_2_3", Transfer::Move).await;
        assert_eq!(outcome, RelocationOutcome::Done(thawed.path().join("db_1_2_3")));
        assert!(!source.exists());
        assert_eq!(fs::read_to_string(thawed.path().join("db_1_2_3/Hosts.data"))?, "hosts");
        Ok(())
    }

    #[tokio::test]
    async fn prepare_creates_root_and_sweeps_staging() -> anyhow::Result<()> {
        let parent = tempfile::tempdir()?;
        let root = parent.path().join("thaweddb");
        let relocator = Relocator::new(root.clone());
        relocator.prepare().await?;
        assert!(root.is_dir());

        fs::create_dir_all(root.join(".bucketrestore-1234.partial/rawdata"))?;
        fs::create_dir_all(root.join("db_1_2_3"))?;
        relocator.prepare().await?;
        assert_eq!(entries(&root)?, vec!["db_1_2_3"]);
        Ok(())
    }
}
