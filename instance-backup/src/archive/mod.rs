//! Archive backends and the policy that picks one per call.
//!
//! Two tools are driven as subprocesses: 7-Zip (extract only, preferred when
//! installed) and the zip helper (compression, plus extraction when 7-Zip is
//! unavailable or fails). Every path handed to a tool is screened first.

pub mod companion;
pub mod process;
pub mod seven_zip;
pub mod sniff;

use crate::config::ArchiveConfig;
use crate::utils::errors::{BackupError, Result};
use async_trait::async_trait;
use companion::CompanionTool;
use seven_zip::SevenZip;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Characters never allowed in a path passed to an archive tool.
pub const DISALLOWED_NAME_CHARS: [char; 5] = ['"', '\'', '?', '|', '&'];

pub fn check_file_name(path: &Path) -> Result<()> {
    let name = path.to_string_lossy();
    if name.contains(DISALLOWED_NAME_CHARS.as_slice()) {
        return Err(BackupError::InvalidName(name.into_owned()));
    }
    Ok(())
}

/// Write `inputs` (relative to `base_dir`) into a new archive.
#[derive(Debug, Clone)]
pub struct CompressJob {
    pub archive: PathBuf,
    pub inputs: Vec<PathBuf>,
    pub base_dir: PathBuf,
    pub file_code: String,
    pub timeout: Duration,
}

impl CompressJob {
    pub fn validate(&self) -> Result<()> {
        check_file_name(&self.archive)?;
        self.inputs.iter().try_for_each(|input| check_file_name(input))
    }
}

/// Unpack `archive` into `destination`, overwriting existing files.
#[derive(Debug, Clone)]
pub struct ExtractJob {
    pub archive: PathBuf,
    pub destination: PathBuf,
    pub file_code: String,
    pub timeout: Duration,
}

impl ExtractJob {
    pub fn validate(&self) -> Result<()> {
        check_file_name(&self.archive)?;
        check_file_name(&self.destination)
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap health check, run before each extraction.
    async fn probe(&self) -> bool;

    async fn extract(&self, job: &ExtractJob) -> Result<()>;
}

#[async_trait]
pub trait Compressor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn compress(&self, job: &CompressJob) -> Result<()>;
}

pub struct ArchiveService {
    primary: Option<Arc<dyn Extractor>>,
    fallback: Arc<dyn Extractor>,
    writer: Arc<dyn Compressor>,
    timeout: Duration,
    default_file_code: String,
}

impl ArchiveService {
    pub fn from_config(config: &ArchiveConfig) -> Self {
        let companion = Arc::new(CompanionTool::new(config.companion_path.clone()));
        let fallback: Arc<dyn Extractor> = companion.clone();
        let writer: Arc<dyn Compressor> = companion;
        let primary: Arc<dyn Extractor> = Arc::new(SevenZip::new(config.seven_zip_path.clone()));

        Self::new(
            Some(primary),
            fallback,
            writer,
            config.timeout(),
            config.default_file_code.clone(),
        )
    }

    pub fn new(
        primary: Option<Arc<dyn Extractor>>,
        fallback: Arc<dyn Extractor>,
        writer: Arc<dyn Compressor>,
        timeout: Duration,
        default_file_code: impl Into<String>,
    ) -> Self {
        Self {
            primary,
            fallback,
            writer,
            timeout,
            default_file_code: default_file_code.into(),
        }
    }

    /// The instance's preferred encoding, or the configured default.
    pub fn file_code(&self, preferred: Option<&str>) -> String {
        preferred
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .unwrap_or(self.default_file_code.as_str())
            .to_string()
    }

    pub async fn compress(
        &self,
        archive: &Path,
        base_dir: &Path,
        inputs: Vec<PathBuf>,
        file_code: &str,
    ) -> Result<()> {
        let job = CompressJob {
            archive: archive.to_path_buf(),
            inputs,
            base_dir: base_dir.to_path_buf(),
            file_code: file_code.to_string(),
            timeout: self.timeout,
        };
        job.validate()?;

        info!(
            tool = self.writer.name(),
            "Compressing {} input(s) into {}",
            job.inputs.len(),
            archive.display()
        );
        self.writer.compress(&job).await
    }

    pub async fn decompress(&self, archive: &Path, destination: &Path, file_code: &str) -> Result<()> {
        let job = ExtractJob {
            archive: archive.to_path_buf(),
            destination: destination.to_path_buf(),
            file_code: file_code.to_string(),
            timeout: self.timeout,
        };
        job.validate()?;

        tokio::fs::create_dir_all(destination).await?;

        if let Some(primary) = &self.primary {
            if primary.probe().await {
                match primary.extract(&job).await {
                    Ok(()) => return Ok(()),
                    Err(e) => warn!(
                        tool = primary.name(),
                        "Extraction failed, trying {}: {}",
                        self.fallback.name(),
                        e
                    ),
                }
            } else {
                debug!(tool = primary.name(), "Extractor unavailable");
            }
        }

        sniff::ensure_single_volume_zip(archive).await?;

        info!(tool = self.fallback.name(), "Extracting {}", archive.display());
        self.fallback.extract(&job).await
    }
}
