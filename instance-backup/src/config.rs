//! Configuration management for the backup subsystem.
//!
//! Loads configuration from an optional TOML file, then layers environment
//! variables of the form `INSTANCE_BACKUP__<SECTION>__<KEY>` on top.

use crate::utils::errors::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides, e.g. `INSTANCE_BACKUP__ARCHIVE__TIMEOUT_SECS=600`.
pub const ENV_PREFIX: &str = "INSTANCE_BACKUP";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root under which per-instance backup directories are created
    #[serde(default = "default_backup_root")]
    pub backup_root: PathBuf,

    /// Where staging and scratch directories are created (system temp dir when unset)
    #[serde(default)]
    pub staging_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// 7-Zip executable used for extraction when healthy
    #[serde(default = "default_seven_zip_path")]
    pub seven_zip_path: PathBuf,

    /// Zip helper executable used for compression and fallback extraction
    #[serde(default = "default_companion_path")]
    pub companion_path: PathBuf,

    /// Wall-clock budget for a single archive tool invocation
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Filename encoding used when an instance does not specify one
    #[serde(default = "default_file_code")]
    pub default_file_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Colored output
    #[serde(default = "default_ansi")]
    pub ansi: bool,
}

// Default values
fn default_backup_root() -> PathBuf {
    PathBuf::from("data/InstanceBackup")
}

fn default_seven_zip_path() -> PathBuf {
    let name = if cfg!(windows) { "7z.exe" } else { "7z" };
    PathBuf::from("lib").join(name)
}

fn default_companion_path() -> PathBuf {
    let name = if cfg!(windows) { "file_zip.exe" } else { "file_zip" };
    PathBuf::from("lib").join(name)
}

fn default_timeout_secs() -> u64 {
    60 * 60 // 1 hour
}

fn default_file_code() -> String {
    "utf-8".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ansi() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backup_root: default_backup_root(),
            staging_root: None,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            seven_zip_path: default_seven_zip_path(),
            companion_path: default_companion_path(),
            timeout_secs: default_timeout_secs(),
            default_file_code: default_file_code(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            ansi: default_ansi(),
        }
    }
}

impl ArchiveConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl StorageConfig {
    /// Directory that receives staging and scratch areas, resolved against
    /// the current directory when configured as a relative path.
    pub fn staging_root(&self) -> PathBuf {
        let root = self
            .staging_root
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        std::path::absolute(&root).unwrap_or(root)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| BackupError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load the file (if any), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        let layered = config::Config::builder()
            .add_source(config::Config::try_from(&base).map_err(config_error)?)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(config_error)?;

        let config: Config = layered.try_deserialize().map_err(config_error)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.archive.timeout_secs == 0 {
            return Err(BackupError::Config(
                "archive.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.archive.default_file_code.trim().is_empty() {
            return Err(BackupError::Config(
                "archive.default_file_code must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn config_error(e: config::ConfigError) -> BackupError {
    BackupError::Config(e.to_string())
}
