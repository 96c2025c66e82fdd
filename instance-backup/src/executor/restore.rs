//! Restore: extract an archive into scratch space, then move it into the instance.

use super::staging::StagingArea;
use crate::archive::ArchiveService;
use crate::catalog::BackupCatalog;
use crate::fs::link::move_replace;
use crate::instance::METADATA_DIR;
use crate::utils::errors::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// What the top level of an extracted archive looked like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractedLayout {
    Empty,
    /// A single directory; its contents are what gets restored.
    Wrapper(PathBuf),
    /// One file or several entries, restored as they are.
    Entries(Vec<PathBuf>),
}

pub async fn inspect_layout(dir: &Path) -> Result<ExtractedLayout> {
    let entries = list_entries(dir).await?;
    if entries.len() == 1 {
        let only = &entries[0];
        if tokio::fs::symlink_metadata(only).await?.is_dir() {
            return Ok(ExtractedLayout::Wrapper(only.clone()));
        }
    }
    if entries.is_empty() {
        return Ok(ExtractedLayout::Empty);
    }
    Ok(ExtractedLayout::Entries(entries))
}

async fn list_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    let mut entries = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}

pub struct RestoreCoordinator {
    archives: Arc<ArchiveService>,
    scratch_root: PathBuf,
}

impl RestoreCoordinator {
    pub fn new(archives: Arc<ArchiveService>, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            archives,
            scratch_root: scratch_root.into(),
        }
    }

    /// Restore `file_name` from `catalog` into `instance_dir`.
    ///
    /// Existing entries with the same names are replaced. Files written before
    /// a failure are left in place.
    pub async fn restore(
        &self,
        catalog: &BackupCatalog,
        file_name: &str,
        instance_dir: &Path,
        file_code: &str,
    ) -> Result<usize> {
        let archive = catalog.resolve(file_name).await?;
        tokio::fs::create_dir_all(instance_dir).await?;

        let scratch = StagingArea::create(&self.scratch_root, "restore")?;
        let result = self
            .extract_and_move(&archive, scratch.path(), instance_dir, file_code)
            .await;
        scratch.close();

        let moved = result?;
        info!(
            "Restored {} entr{} from {} into {}",
            moved,
            if moved == 1 { "y" } else { "ies" },
            file_name,
            instance_dir.display()
        );
        Ok(moved)
    }

    async fn extract_and_move(
        &self,
        archive: &Path,
        scratch: &Path,
        instance_dir: &Path,
        file_code: &str,
    ) -> Result<usize> {
        self.archives.decompress(archive, scratch, file_code).await?;

        let entries = match inspect_layout(scratch).await? {
            ExtractedLayout::Empty => {
                warn!("Archive {} is empty, nothing restored", archive.display());
                return Ok(0);
            }
            ExtractedLayout::Wrapper(dir) => {
                info!(
                    "Unwrapping top-level folder {}",
                    dir.file_name().unwrap_or_default().to_string_lossy()
                );
                list_entries(&dir).await?
            }
            ExtractedLayout::Entries(entries) => entries,
        };

        let mut moved = 0;
        for entry in entries {
            let Some(name) = entry.file_name() else {
                continue;
            };
            if name == METADATA_DIR {
                warn!("Skipping {} in archive", METADATA_DIR);
                continue;
            }
            move_replace(&entry, &instance_dir.join(name)).await?;
            moved += 1;
        }
        Ok(moved)
    }
}
