//! The slice of the instance lifecycle manager that backups depend on.
//!
//! The daemon's instance manager owns process start/stop, crash handling and
//! the PTY bridge. Backups only need to read the working directory and status,
//! request the `stop`/`start` presets and observe process exit.

use crate::utils::errors::{BackupError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tokio::sync::broadcast;

/// Hidden per-instance metadata directory. Never backed up, never restored into.
pub const METADATA_DIR: &str = ".mcsm";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Stopped,
    Stopping,
    Starting,
    Running,
    Busy,
}

/// Lifecycle presets the backup subsystem may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Start,
    Stop,
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Preset::Start => f.write_str("start"),
            Preset::Stop => f.write_str("stop"),
        }
    }
}

/// Sent once when the instance process exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitEvent {
    pub code: Option<i32>,
}

/// Per-instance backup settings, owned by the instance configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceBackupSettings {
    /// Absolute backup directory override. Relative values are ignored.
    #[serde(default)]
    pub backup_path: Option<PathBuf>,

    /// Stop a running instance while its files are captured
    #[serde(default = "default_use_cold_backup")]
    pub use_cold_backup: bool,

    /// Number of archives to keep (`None` or 0 keeps everything)
    #[serde(default)]
    pub max_backup_count: Option<u32>,

    /// Filename encoding inside archives
    #[serde(default)]
    pub file_code: Option<String>,
}

fn default_use_cold_backup() -> bool {
    true
}

impl Default for InstanceBackupSettings {
    fn default() -> Self {
        Self {
            backup_path: None,
            use_cold_backup: default_use_cold_backup(),
            max_backup_count: None,
            file_code: None,
        }
    }
}

#[async_trait]
pub trait ManagedInstance: Send + Sync {
    fn id(&self) -> &str;

    fn nickname(&self) -> &str;

    fn working_dir(&self) -> PathBuf;

    fn status(&self) -> InstanceStatus;

    fn backup_settings(&self) -> InstanceBackupSettings;

    /// Subscribe to process exit. Dropping the receiver unsubscribes.
    fn subscribe_exit(&self) -> broadcast::Receiver<ExitEvent>;

    /// Ask the lifecycle manager to run a preset. Completion of the request
    /// does not imply the process has already exited or started.
    async fn request_preset(&self, preset: Preset) -> Result<()>;
}

/// An instance that only exists as a directory on disk, with no process.
///
/// Used by the command line tool to back up and restore offline instances.
pub struct DirectoryInstance {
    id: String,
    nickname: String,
    working_dir: PathBuf,
    settings: InstanceBackupSettings,
    exit_tx: broadcast::Sender<ExitEvent>,
}

impl DirectoryInstance {
    pub fn new(
        id: impl Into<String>,
        nickname: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        settings: InstanceBackupSettings,
    ) -> Self {
        let (exit_tx, _) = broadcast::channel(1);
        Self {
            id: id.into(),
            nickname: nickname.into(),
            working_dir: working_dir.into(),
            settings,
            exit_tx,
        }
    }
}

#[async_trait]
impl ManagedInstance for DirectoryInstance {
    fn id(&self) -> &str {
        &self.id
    }

    fn nickname(&self) -> &str {
        &self.nickname
    }

    fn working_dir(&self) -> PathBuf {
        self.working_dir.clone()
    }

    fn status(&self) -> InstanceStatus {
        InstanceStatus::Stopped
    }

    fn backup_settings(&self) -> InstanceBackupSettings {
        self.settings.clone()
    }

    fn subscribe_exit(&self) -> broadcast::Receiver<ExitEvent> {
        self.exit_tx.subscribe()
    }

    async fn request_preset(&self, preset: Preset) -> Result<()> {
        Err(BackupError::Instance(format!(
            "instance {} has no process to {}",
            self.id, preset
        )))
    }
}
