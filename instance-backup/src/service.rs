//! Public entry points for backup operations on managed instances.
//!
//! Every mutating operation holds the instance's operation lock, so a backup,
//! restore, delete or retention pass never overlaps another one for the same
//! instance.

use crate::archive::ArchiveService;
use crate::catalog::{BackupCatalog, BackupRecord};
use crate::config::{Config, StorageConfig};
use crate::executor::{BackupCoordinator, OperationLocks, RestoreCoordinator};
use crate::instance::ManagedInstance;
use crate::utils::errors::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct BackupService {
    storage: StorageConfig,
    archives: Arc<ArchiveService>,
    coordinator: BackupCoordinator,
    restorer: RestoreCoordinator,
    locks: OperationLocks,
}

impl BackupService {
    pub fn new(config: &Config) -> Self {
        let archives = Arc::new(ArchiveService::from_config(&config.archive));
        Self::with_archives(config.storage.clone(), archives)
    }

    pub fn with_archives(storage: StorageConfig, archives: Arc<ArchiveService>) -> Self {
        Self {
            coordinator: BackupCoordinator::new(archives.clone(), storage.clone()),
            restorer: RestoreCoordinator::new(archives.clone(), storage.staging_root()),
            locks: OperationLocks::default(),
            storage,
            archives,
        }
    }

    /// Override the cold stop timeout and restart delay.
    pub fn with_timings(mut self, cold_stop_timeout: Duration, restart_delay: Duration) -> Self {
        self.coordinator = self.coordinator.with_timings(cold_stop_timeout, restart_delay);
        self
    }

    /// Override how long an operation waits for the instance lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.locks = OperationLocks::new(timeout);
        self
    }

    fn catalog(&self, instance: &dyn ManagedInstance) -> BackupCatalog {
        BackupCatalog::for_instance(
            &self.storage,
            instance.id(),
            instance.nickname(),
            &instance.backup_settings(),
        )
    }

    pub async fn create_backup(&self, instance: Arc<dyn ManagedInstance>) -> Result<BackupRecord> {
        let _guard = self.locks.acquire(instance.id()).await?;
        self.coordinator.create_backup(instance).await
    }

    pub async fn list_backups(&self, instance: &dyn ManagedInstance) -> Result<Vec<BackupRecord>> {
        self.catalog(instance).list().await
    }

    pub async fn delete_backup(&self, instance: &dyn ManagedInstance, file_name: &str) -> Result<()> {
        let _guard = self.locks.acquire(instance.id()).await?;
        self.catalog(instance).delete(file_name).await
    }

    /// Absolute path of an existing archive, for download.
    pub async fn backup_path(&self, instance: &dyn ManagedInstance, file_name: &str) -> Result<PathBuf> {
        self.catalog(instance).resolve(file_name).await
    }

    /// Restore `file_name` into the instance's working directory.
    ///
    /// Returns the number of top-level entries written.
    pub async fn restore_backup(&self, instance: &dyn ManagedInstance, file_name: &str) -> Result<usize> {
        let _guard = self.locks.acquire(instance.id()).await?;
        info!(instance_id = instance.id(), "Restoring backup {}", file_name);

        let file_code = self
            .archives
            .file_code(instance.backup_settings().file_code.as_deref());
        self.restorer
            .restore(
                &self.catalog(instance),
                file_name,
                &instance.working_dir(),
                &file_code,
            )
            .await
    }

    /// Apply the instance's retention limit now. Returns how many archives were removed.
    pub async fn cleanup_old_backups(&self, instance: &dyn ManagedInstance) -> Result<usize> {
        let _guard = self.locks.acquire(instance.id()).await?;
        self.catalog(instance)
            .cleanup_old_backups(instance.backup_settings().max_backup_count)
            .await
    }
}
