//! Instance Backup Library
//!
//! Backup and restore of managed server instance directories: rule-based file
//! selection, cold stop, hard-link staging and zip archives produced by
//! external tools.

pub mod archive;
pub mod catalog;
pub mod config;
pub mod executor;
pub mod fs;
pub mod instance;
pub mod rules;
pub mod service;
pub mod utils;

// Re-export commonly used types
pub use catalog::BackupRecord;
pub use config::Config;
pub use instance::{DirectoryInstance, InstanceBackupSettings, ManagedInstance};
pub use service::BackupService;
pub use utils::errors::{BackupError, Result};
