//! Backup job executor - Drives one backup from rule loading to the archive record.
//!
//! This module ties together:
//! - Rule loading and file selection
//! - Optional cold stop of the instance
//! - Hard-link staging
//! - Archiving and retention
//! - Restart after a cold backup

pub mod locks;
pub mod restore;
pub mod staging;

#[cfg(test)]
pub(crate) mod testing;

use crate::archive::ArchiveService;
use crate::catalog::{archive_file_name, BackupCatalog, BackupRecord};
use crate::config::StorageConfig;
use crate::fs::walker::{collect_files, total_size};
use crate::instance::{InstanceBackupSettings, InstanceStatus, ManagedInstance, Preset};
use crate::rules::BackupRules;
use crate::utils::errors::{BackupError, Result};
use crate::utils::now_millis;
use staging::{stage_files, staged_dir_name, StagingArea};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

pub use locks::{OperationGuard, OperationLocks};
pub use restore::RestoreCoordinator;

/// How long a cold backup waits for the instance process to exit.
pub const COLD_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause between a finished cold backup and the restart request.
pub const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Backup progress, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStage {
    RulesLoaded,
    ColdStopping,
    Stopped,
    Staging,
    Archiving,
    Recorded,
    Restarting,
    Done,
    Failed,
}

impl fmt::Display for BackupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackupStage::RulesLoaded => "rules_loaded",
            BackupStage::ColdStopping => "cold_stopping",
            BackupStage::Stopped => "stopped",
            BackupStage::Staging => "staging",
            BackupStage::Archiving => "archiving",
            BackupStage::Recorded => "recorded",
            BackupStage::Restarting => "restarting",
            BackupStage::Done => "done",
            BackupStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn enter(instance_id: &str, stage: BackupStage) {
    info!(instance_id, stage = %stage, "Backup stage: {}", stage);
}

/// Main backup executor
pub struct BackupCoordinator {
    archives: Arc<ArchiveService>,
    storage: StorageConfig,
    cold_stop_timeout: Duration,
    restart_delay: Duration,
}

impl BackupCoordinator {
    pub fn new(archives: Arc<ArchiveService>, storage: StorageConfig) -> Self {
        Self {
            archives,
            storage,
            cold_stop_timeout: COLD_STOP_TIMEOUT,
            restart_delay: RESTART_DELAY,
        }
    }

    /// Override the cold stop timeout and restart delay.
    pub fn with_timings(mut self, cold_stop_timeout: Duration, restart_delay: Duration) -> Self {
        self.cold_stop_timeout = cold_stop_timeout;
        self.restart_delay = restart_delay;
        self
    }

    /// Execute a backup of `instance`
    pub async fn create_backup(&self, instance: Arc<dyn ManagedInstance>) -> Result<BackupRecord> {
        let instance_id = instance.id().to_string();
        let settings = instance.backup_settings();

        info!(instance_id = %instance_id, "Starting backup of {}", instance.nickname());

        let catalog = BackupCatalog::for_instance(
            &self.storage,
            &instance_id,
            instance.nickname(),
            &settings,
        );
        catalog.ensure_dir().await?;

        let root = tokio::fs::canonicalize(instance.working_dir()).await?;
        let rules = BackupRules::load(&root).await;
        enter(&instance_id, BackupStage::RulesLoaded);

        let cold_stopped = settings.use_cold_backup && instance.status() == InstanceStatus::Running;
        if cold_stopped {
            enter(&instance_id, BackupStage::ColdStopping);
            if let Err(e) = self.cold_stop(instance.as_ref()).await {
                enter(&instance_id, BackupStage::Failed);
                error!(instance_id = %instance_id, "Cold stop failed: {}", e);
                return Err(e);
            }
            enter(&instance_id, BackupStage::Stopped);
        }

        match self
            .capture(instance.as_ref(), &root, rules, &catalog, &settings)
            .await
        {
            Ok(record) => {
                if cold_stopped {
                    enter(&instance_id, BackupStage::Restarting);
                    self.schedule_restart(instance);
                }
                enter(&instance_id, BackupStage::Done);
                info!(
                    instance_id = %instance_id,
                    "Backup created: {} ({} bytes)",
                    record.file_name,
                    record.size
                );
                Ok(record)
            }
            Err(e) => {
                enter(&instance_id, BackupStage::Failed);
                error!(
                    instance_id = %instance_id,
                    tool_failure = e.is_tool_failure(),
                    "Backup failed: {}",
                    e
                );
                if cold_stopped {
                    warn!(instance_id = %instance_id, "Instance was stopped for this backup and stays stopped");
                }
                Err(e)
            }
        }
    }

    /// Request a stop and wait for the exit notification or the timeout.
    async fn cold_stop(&self, instance: &dyn ManagedInstance) -> Result<()> {
        // Subscribe first so an exit during the stop request is not missed.
        let mut exit_rx = instance.subscribe_exit();
        instance.request_preset(Preset::Stop).await?;

        tokio::select! {
            event = exit_rx.recv() => match event {
                Ok(event) => {
                    info!(instance_id = instance.id(), code = ?event.code, "Instance stopped for cold backup");
                    Ok(())
                }
                Err(RecvError::Lagged(_)) => Ok(()),
                Err(RecvError::Closed) => Err(BackupError::Instance(
                    "exit notifications closed while waiting for stop".to_string(),
                )),
            },
            _ = tokio::time::sleep(self.cold_stop_timeout) => Err(BackupError::ColdStopTimeout),
        }
    }

    /// Collect, stage, archive and record. The staging area is gone when this returns.
    async fn capture(
        &self,
        instance: &dyn ManagedInstance,
        root: &Path,
        rules: BackupRules,
        catalog: &BackupCatalog,
        settings: &InstanceBackupSettings,
    ) -> Result<BackupRecord> {
        let instance_id = instance.id();

        let walk_root = root.to_path_buf();
        let files = tokio::task::spawn_blocking(move || collect_files(&walk_root, &rules))
            .await
            .map_err(std::io::Error::other)??;
        if files.is_empty() {
            return Err(BackupError::NothingToBackup);
        }
        info!(
            instance_id,
            "Selected {} files ({} bytes)",
            files.len(),
            total_size(&files)
        );

        let timestamp = now_millis();
        let file_name = archive_file_name(instance.nickname(), timestamp);
        let archive = catalog.dir().join(&file_name);
        let file_code = self.archives.file_code(settings.file_code.as_deref());

        let staging = StagingArea::create(&self.storage.staging_root(), "backup")?;
        let target = staging.path().join(staged_dir_name(root, instance_id));

        let archived = async {
            enter(instance_id, BackupStage::Staging);
            let stats = stage_files(&files, &target).await?;
            info!(instance_id, linked = stats.linked, copied = stats.copied, "Staging complete");

            enter(instance_id, BackupStage::Archiving);
            self.archives
                .compress(&archive, staging.path(), vec![target.clone()], &file_code)
                .await
        }
        .await;
        staging.close();
        archived?;

        let record = catalog.record(&file_name).await?;
        enter(instance_id, BackupStage::Recorded);

        if let Err(e) = catalog.cleanup_old_backups(settings.max_backup_count).await {
            warn!(instance_id, "Retention cleanup failed: {}", e);
        }

        Ok(record)
    }

    fn schedule_restart(&self, instance: Arc<dyn ManagedInstance>) {
        let delay = self.restart_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match instance.request_preset(Preset::Start).await {
                Ok(()) => info!(instance_id = instance.id(), "Instance restarted after cold backup"),
                Err(e) => error!(
                    instance_id = instance.id(),
                    "Failed to restart instance after cold backup: {}",
                    e
                ),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FakeArchiver, FakeInstance};
    use super::*;
    use crate::instance::METADATA_DIR;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _root: TempDir,
        instance_dir: std::path::PathBuf,
        storage: StorageConfig,
        archiver: Arc<FakeArchiver>,
    }

    fn fixture() -> Fixture {
        let root = TempDir::new().unwrap();
        let instance_dir = root.path().join("survival");
        fs::create_dir_all(instance_dir.join("world")).unwrap();
        fs::create_dir_all(instance_dir.join(METADATA_DIR)).unwrap();
        fs::write(instance_dir.join("server.properties"), b"motd=hi").unwrap();
        fs::write(instance_dir.join("world/level.dat"), b"level").unwrap();
        fs::write(instance_dir.join("latest.log"), b"log").unwrap();

        let storage = StorageConfig {
            backup_root: root.path().join("backups"),
            staging_root: Some(root.path().join("staging")),
        };

        Fixture {
            _root: root,
            instance_dir,
            storage,
            archiver: Arc::new(FakeArchiver::new()),
        }
    }

    fn coordinator(fx: &Fixture) -> BackupCoordinator {
        BackupCoordinator::new(fx.archiver.service(), fx.storage.clone())
            .with_timings(Duration::from_millis(200), Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_backup_of_stopped_instance() -> Result<()> {
        let fx = fixture();
        fs::write(fx.instance_dir.join(METADATA_DIR).join(".backupignore"), "*.log\n")?;
        let instance = Arc::new(FakeInstance::new(&fx.instance_dir, InstanceStatus::Stopped, true));

        let record = coordinator(&fx).create_backup(instance.clone()).await?;

        assert!(record.file_name.starts_with("backup_Survival_"));
        assert!(record.file_name.ends_with(".zip"));
        assert_eq!(record.instance_id, "abc");
        assert_eq!(record.size, 4);
        assert!(fx.storage.backup_root.join("abc").join(&record.file_name).is_file());

        let compressed = fx.archiver.compressed.lock().unwrap().clone();
        assert_eq!(
            compressed,
            vec![vec!["survival/server.properties", "survival/world/level.dat"]]
        );

        // No cold stop for a stopped instance
        assert!(instance.presets().is_empty());

        // Staging is cleaned up and sources are intact
        let leftover: Vec<_> = fs::read_dir(fx.storage.staging_root())?.collect();
        assert!(leftover.is_empty());
        assert_eq!(fs::read(fx.instance_dir.join("latest.log"))?, b"log");
        Ok(())
    }

    #[tokio::test]
    async fn test_cold_backup_stops_and_restarts() -> Result<()> {
        let fx = fixture();
        let instance = Arc::new(FakeInstance::new(&fx.instance_dir, InstanceStatus::Running, true));

        coordinator(&fx).create_backup(instance.clone()).await?;
        assert_eq!(instance.presets(), vec![Preset::Stop]);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(instance.presets(), vec![Preset::Stop, Preset::Start]);
        assert_eq!(instance.status(), InstanceStatus::Running);
        Ok(())
    }

    #[tokio::test]
    async fn test_hot_backup_when_cold_disabled() -> Result<()> {
        let fx = fixture();
        let mut instance = FakeInstance::new(&fx.instance_dir, InstanceStatus::Running, true);
        instance.settings.use_cold_backup = false;
        let instance = Arc::new(instance);

        coordinator(&fx).create_backup(instance.clone()).await?;
        assert!(instance.presets().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_cold_stop_timeout() -> Result<()> {
        let fx = fixture();
        let instance = Arc::new(FakeInstance::new(&fx.instance_dir, InstanceStatus::Running, false));

        let err = coordinator(&fx).create_backup(instance.clone()).await.unwrap_err();
        assert!(matches!(err, BackupError::ColdStopTimeout));

        // Never force-killed or restarted, and nothing archived
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(instance.presets(), vec![Preset::Stop]);
        assert!(fx.archiver.compressed.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_cold_stop_waits_full_budget() -> Result<()> {
        let fx = fixture();
        let instance = Arc::new(FakeInstance::new(&fx.instance_dir, InstanceStatus::Running, false));
        let coordinator = BackupCoordinator::new(fx.archiver.service(), fx.storage.clone());

        let started = tokio::time::Instant::now();
        let err = coordinator.create_backup(instance).await.unwrap_err();
        assert!(matches!(err, BackupError::ColdStopTimeout));
        assert!(started.elapsed() >= COLD_STOP_TIMEOUT);
        Ok(())
    }

    #[tokio::test]
    async fn test_nothing_to_backup() -> Result<()> {
        let fx = fixture();
        fs::write(fx.instance_dir.join(METADATA_DIR).join(".backupallow"), "*.nothing\n")?;
        let instance = Arc::new(FakeInstance::new(&fx.instance_dir, InstanceStatus::Stopped, true));

        let err = coordinator(&fx).create_backup(instance).await.unwrap_err();
        assert!(matches!(err, BackupError::NothingToBackup));
        assert!(fx.archiver.compressed.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_retention_applied_after_backup() -> Result<()> {
        let fx = fixture();
        let backup_dir = fx.storage.backup_root.join("abc");
        fs::create_dir_all(&backup_dir)?;
        for stamp in [1, 2, 3] {
            fs::write(backup_dir.join(archive_file_name("Survival", stamp)), b"PK\x03\x04")?;
        }

        let mut instance = FakeInstance::new(&fx.instance_dir, InstanceStatus::Stopped, true);
        instance.settings.max_backup_count = Some(2);
        let record = coordinator(&fx).create_backup(Arc::new(instance)).await?;

        let mut names: Vec<String> = fs::read_dir(&backup_dir)?
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        let mut expected = vec!["backup_Survival_3.zip".to_string(), record.file_name];
        expected.sort();
        assert_eq!(names, expected);
        Ok(())
    }

    #[tokio::test]
    async fn test_restore_unwraps_instance_folder() -> Result<()> {
        let fx = fixture();
        let instance = Arc::new(FakeInstance::new(&fx.instance_dir, InstanceStatus::Stopped, true));
        let record = coordinator(&fx).create_backup(instance).await?;

        let target = TempDir::new()?;
        fs::write(target.path().join("server.properties"), b"old")?;

        let catalog = BackupCatalog::new(fx.storage.backup_root.join("abc"), "abc", "Survival");
        let restorer = RestoreCoordinator::new(fx.archiver.service(), fx.storage.staging_root());
        let moved = restorer
            .restore(&catalog, &record.file_name, target.path(), "utf-8")
            .await?;

        assert_eq!(moved, 3);
        assert!(!target.path().join("survival").exists());
        assert_eq!(fs::read(target.path().join("server.properties"))?, b"motd=hi");
        assert_eq!(fs::read(target.path().join("world/level.dat"))?, b"level");

        let leftover: Vec<_> = fs::read_dir(fx.storage.staging_root())?.collect();
        assert!(leftover.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_restore_rejects_unknown_archive() -> Result<()> {
        let fx = fixture();
        let catalog = BackupCatalog::new(fx.storage.backup_root.join("abc"), "abc", "Survival");
        fs::create_dir_all(catalog.dir())?;
        let restorer = RestoreCoordinator::new(fx.archiver.service(), fx.storage.staging_root());

        let err = restorer
            .restore(&catalog, "backup_Survival_9.zip", &fx.instance_dir, "utf-8")
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::BackupNotFound(_)));

        let err = restorer
            .restore(&catalog, "../escape.zip", &fx.instance_dir, "utf-8")
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::InvalidBackupPath));
        Ok(())
    }
}
