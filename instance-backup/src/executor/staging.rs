//! Scratch directories owned by a single backup or restore.

use crate::fs::link::{hard_link, materialize_with, LinkFn, Materialized};
use crate::fs::walker::SelectedFile;
use crate::utils::errors::{BackupError, Result};
use crate::utils::now_millis;
use futures_util::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

/// Upper bound on concurrent link operations while staging.
const STAGING_CONCURRENCY: usize = 64;

/// A uniquely named directory, removed when dropped or closed.
pub struct StagingArea {
    dir: TempDir,
}

impl StagingArea {
    /// Create `<root>/instance_<purpose>_<millis>_<random>`.
    pub fn create(root: &Path, purpose: &str) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("instance_{}_{}_", purpose, now_millis()))
            .tempdir_in(root)?;
        debug!("Created staging area {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory now, logging instead of failing.
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!("Failed to remove staging area {}: {}", path.display(), e);
        }
    }
}

/// Counts from one staging run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StagingStats {
    pub linked: usize,
    pub copied: usize,
}

/// Materialize every file under `target` at its relative path.
///
/// All files are processed concurrently; the call returns only after every
/// task finished, and fails if any of them failed.
pub async fn stage_files(files: &[SelectedFile], target: &Path) -> Result<StagingStats> {
    stage_files_with(files, target, hard_link).await
}

/// [`stage_files`] with a caller-supplied link primitive.
pub async fn stage_files_with(
    files: &[SelectedFile],
    target: &Path,
    link: LinkFn,
) -> Result<StagingStats> {
    tokio::fs::create_dir_all(target).await?;

    let semaphore = Arc::new(Semaphore::new(STAGING_CONCURRENCY));
    let mut handles = Vec::with_capacity(files.len());

    for file in files {
        let sem = Arc::clone(&semaphore);
        let src = file.path.clone();
        let dst = target.join(&file.relative_path);

        handles.push(tokio::spawn(stage_one(sem, src, dst, link)));
    }

    let mut stats = StagingStats::default();
    let mut first_error = None;
    for joined in join_all(handles).await {
        let outcome = match joined {
            Ok(result) => result,
            Err(e) => Err(BackupError::Io(std::io::Error::other(e))),
        };
        match outcome {
            Ok(Materialized::Linked) => stats.linked += 1,
            Ok(Materialized::Copied) => stats.copied += 1,
            Err(e) => {
                error!("Staging failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(stats),
    }
}

async fn stage_one(
    sem: Arc<Semaphore>,
    src: PathBuf,
    dst: PathBuf,
    link: LinkFn,
) -> Result<Materialized> {
    let _permit = sem
        .acquire_owned()
        .await
        .map_err(|e| BackupError::Io(std::io::Error::other(e)))?;

    let result = async {
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        materialize_with(&src, &dst, link).await
    }
    .await;

    match result {
        Ok(how) => {
            if how == Materialized::Copied {
                debug!("Copied {} across filesystems", src.display());
            }
            Ok(how)
        }
        Err(source) => Err(BackupError::StagingLinkFailed { path: src, source }),
    }
}

/// Name of the top-level folder inside the archive.
pub fn staged_dir_name(instance_root: &Path, fallback: &str) -> PathBuf {
    instance_root
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(fallback))
}
