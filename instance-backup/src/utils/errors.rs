//! Error taxonomy for backup, restore and archive operations.
//!
//! Every public operation fails with one of these variants. Tool diagnostics
//! are logged where they are produced; the messages here stay short and safe
//! to show to an operator.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Invalid file name: {0}")]
    InvalidName(String),

    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("Multi-volume archives are not supported")]
    MultiVolumeUnsupported,

    #[error("Archive volume is missing{}", .0.as_ref().map(|v| format!(": {}", v)).unwrap_or_default())]
    ToolMissingVolume(Option<String>),

    #[error("Archive data error, the file may be corrupted")]
    ToolDataError,

    #[error("Archive could not be opened")]
    ToolOpenErrors,

    #[error("Archive tool failed: {0}")]
    ToolGenericError(String),

    #[error("Archive tool timed out after {0} seconds")]
    ToolTimeout(u64),

    #[error("Archive tool not found: {0}")]
    ToolNotFound(String),

    #[error("Failed to launch archive tool: {0}")]
    ToolLaunchFailed(String),

    #[error("No files to back up")]
    NothingToBackup,

    #[error("Timed out waiting for the instance to stop for cold backup")]
    ColdStopTimeout,

    #[error("Invalid backup path")]
    InvalidBackupPath,

    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    #[error("Failed to stage {}: {source}", .path.display())]
    StagingLinkFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Another backup operation is in progress for instance {0}")]
    OperationInProgress(String),

    #[error("Instance error: {0}")]
    Instance(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackupError {
    /// True for failures reported by (or while driving) an external archive tool.
    pub fn is_tool_failure(&self) -> bool {
        matches!(
            self,
            BackupError::ToolMissingVolume(_)
                | BackupError::ToolDataError
                | BackupError::ToolOpenErrors
                | BackupError::ToolGenericError(_)
                | BackupError::ToolTimeout(_)
                | BackupError::ToolNotFound(_)
                | BackupError::ToolLaunchFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
