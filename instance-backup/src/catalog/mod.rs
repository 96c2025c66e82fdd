//! Backup archives stored for one instance: listing, lookup, deletion and retention.

use crate::config::StorageConfig;
use crate::instance::InstanceBackupSettings;
use crate::utils::errors::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{error, info, warn};

pub const ARCHIVE_EXTENSION: &str = "zip";

const NAME_PREFIX: &str = "backup_";

/// One archive in an instance's backup directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub file_name: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub size: u64,
    pub instance_id: String,
    pub instance_name: String,
}

/// Archive name for a backup taken at `timestamp` (ms).
///
/// Path separators in the nickname are replaced so the name stays a single component.
pub fn archive_file_name(nickname: &str, timestamp: i64) -> String {
    let safe: String = nickname
        .chars()
        .map(|c| if matches!(c, '/' | '\\') || c.is_control() { '_' } else { c })
        .collect();
    format!("{NAME_PREFIX}{safe}_{timestamp}.{ARCHIVE_EXTENSION}")
}

/// Timestamp embedded in `backup_<name>_<digits>.zip`, if the name has that shape.
pub fn parse_timestamp(file_name: &str) -> Option<i64> {
    let stem = file_name
        .strip_prefix(NAME_PREFIX)?
        .strip_suffix(".zip")?;
    let (_, digits) = stem.rsplit_once('_')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Where an instance's archives live: its absolute override, else `<backup_root>/<id>`.
pub fn resolve_backup_dir(
    storage: &StorageConfig,
    instance_id: &str,
    settings: &InstanceBackupSettings,
) -> PathBuf {
    match &settings.backup_path {
        Some(path) if path.is_absolute() => path.clone(),
        Some(path) => {
            warn!(
                "Ignoring relative backup path {} for instance {}",
                path.display(),
                instance_id
            );
            storage.backup_root.join(instance_id)
        }
        None => storage.backup_root.join(instance_id),
    }
}

pub struct BackupCatalog {
    dir: PathBuf,
    instance_id: String,
    instance_name: String,
}

impl BackupCatalog {
    pub fn new(
        dir: impl Into<PathBuf>,
        instance_id: impl Into<String>,
        instance_name: impl Into<String>,
    ) -> Self {
        Self {
            dir: dir.into(),
            instance_id: instance_id.into(),
            instance_name: instance_name.into(),
        }
    }

    pub fn for_instance(
        storage: &StorageConfig,
        instance_id: &str,
        instance_name: &str,
        settings: &InstanceBackupSettings,
    ) -> Self {
        Self::new(
            resolve_backup_dir(storage, instance_id, settings),
            instance_id,
            instance_name,
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Record for an archive already present in the backup directory.
    pub async fn record(&self, file_name: &str) -> Result<BackupRecord> {
        let metadata = tokio::fs::metadata(self.dir.join(file_name)).await?;
        Ok(self.record_from(file_name, &metadata))
    }

    fn record_from(&self, file_name: &str, metadata: &std::fs::Metadata) -> BackupRecord {
        let timestamp = parse_timestamp(file_name).unwrap_or_else(|| modified_millis(metadata));
        BackupRecord {
            file_name: file_name.to_string(),
            timestamp,
            size: metadata.len(),
            instance_id: self.instance_id.clone(),
            instance_name: self.instance_name.clone(),
        }
    }

    /// All archives, newest first. A missing directory lists as empty.
    pub async fn list(&self) -> Result<Vec<BackupRecord>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if !file_name.ends_with(".zip") {
                continue;
            }

            match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => {
                    records.push(self.record_from(&file_name, &metadata));
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping {}: {}", file_name, e),
            }
        }

        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    /// Full path of `file_name`, which must name an existing archive directly
    /// inside the backup directory.
    pub async fn resolve(&self, file_name: &str) -> Result<PathBuf> {
        let mut components = Path::new(file_name).components();
        let single_normal = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !single_normal {
            return Err(BackupError::InvalidBackupPath);
        }

        let path = self.dir.join(file_name);
        let canonical = match tokio::fs::canonicalize(&path).await {
            Ok(p) => p,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BackupError::BackupNotFound(file_name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let dir = tokio::fs::canonicalize(&self.dir).await?;

        // A symlink inside the backup directory may still point elsewhere.
        if canonical.parent() != Some(dir.as_path()) {
            return Err(BackupError::InvalidBackupPath);
        }
        if !tokio::fs::metadata(&canonical).await?.is_file() {
            return Err(BackupError::BackupNotFound(file_name.to_string()));
        }

        Ok(canonical)
    }

    pub async fn delete(&self, file_name: &str) -> Result<()> {
        let path = self.resolve(file_name).await?;
        tokio::fs::remove_file(&path).await?;
        info!(instance_id = %self.instance_id, "Deleted backup {}", file_name);
        Ok(())
    }

    /// Keep the newest `max_count` archives and delete the rest.
    ///
    /// `None` or 0 keeps everything. Returns how many archives were removed;
    /// individual failures are logged and skipped.
    pub async fn cleanup_old_backups(&self, max_count: Option<u32>) -> Result<usize> {
        let Some(max) = max_count.filter(|m| *m > 0) else {
            return Ok(0);
        };

        let backups = self.list().await?;
        let mut removed = 0;
        for record in backups.iter().skip(max as usize) {
            match tokio::fs::remove_file(self.dir.join(&record.file_name)).await {
                Ok(()) => {
                    removed += 1;
                    info!(instance_id = %self.instance_id, "Removed old backup {}", record.file_name);
                }
                Err(e) => error!(
                    instance_id = %self.instance_id,
                    "Failed to remove old backup {}: {}",
                    record.file_name,
                    e
                ),
            }
        }
        Ok(removed)
    }
}

fn modified_millis(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
