//! Zip helper binary: the only writer, and the fallback extractor.
//!
//! Invocation contract:
//! - compress: `--mode=1 --zipPath=<archive> --code=<enc> --file=<rel>...`
//!   run from the base directory the `--file` paths are relative to
//! - extract: `--mode=2 --zipPath=<archive name> --distDirPath=<dest> --code=<enc>`
//!   run from the directory holding the archive

use super::process::{run_tool, ToolMessages};
use super::{CompressJob, Compressor, ExtractJob, Extractor};
use crate::utils::errors::{BackupError, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

pub const MESSAGES: ToolMessages = ToolMessages {
    exit: "Zip helper exited with an error",
    start: "Zip helper could not be started",
    timeout: "Zip helper timed out",
};

pub struct CompanionTool {
    program: PathBuf,
}

impl CompanionTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

pub fn compress_args(archive: &Path, file_code: &str, files: &[String]) -> Vec<String> {
    let mut args = vec![
        "--mode=1".to_string(),
        format!("--zipPath={}", archive.display()),
        format!("--code={}", file_code),
    ];
    args.extend(files.iter().map(|f| format!("--file={}", f)));
    args
}

pub fn extract_args(archive_name: &str, destination: &Path, file_code: &str) -> Vec<String> {
    vec![
        "--mode=2".to_string(),
        format!("--zipPath={}", archive_name),
        format!("--distDirPath={}", destination.display()),
        format!("--code={}", file_code),
    ]
}

/// Express every input relative to `base_dir` with `/` separators.
///
/// A relative input is taken from the current directory when that lands inside
/// `base_dir`, otherwise it is relative to `base_dir`. Inputs outside
/// `base_dir`, or that climb out of it with `..`, are rejected. The base
/// directory itself is skipped.
pub fn relative_inputs(base_dir: &Path, inputs: &[PathBuf]) -> Result<Vec<String>> {
    let mut files = Vec::with_capacity(inputs.len());

    for input in inputs {
        let full = if input.is_absolute() {
            input.clone()
        } else {
            match std::path::absolute(input) {
                Ok(resolved) if resolved.starts_with(base_dir) => resolved,
                _ => base_dir.join(input),
            }
        };

        let outside = || {
            BackupError::InvalidName(format!(
                "{} is not within {}",
                input.display(),
                base_dir.display()
            ))
        };

        let relative = full.strip_prefix(base_dir).map_err(|_| outside())?;
        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => return Err(outside()),
            }
        }

        if !parts.is_empty() {
            files.push(parts.join("/"));
        }
    }

    Ok(files)
}

async fn remove_partial(archive: &Path) {
    match tokio::fs::remove_file(archive).await {
        Ok(()) => debug!("Removed partial archive {}", archive.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial archive {}: {}", archive.display(), e),
    }
}

#[async_trait]
impl Compressor for CompanionTool {
    fn name(&self) -> &'static str {
        "zip helper"
    }

    async fn compress(&self, job: &CompressJob) -> Result<()> {
        let base_dir = std::path::absolute(&job.base_dir)?;
        let files = relative_inputs(&base_dir, &job.inputs)?;
        if files.is_empty() {
            return Err(BackupError::NothingToBackup);
        }

        let archive = std::path::absolute(&job.archive)?;
        if let Some(parent) = archive.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let args = compress_args(&archive, &job.file_code, &files);
        let result = match run_tool(&self.program, &args, &base_dir, job.timeout, &MESSAGES).await {
            Ok(output) => output.check_status(&MESSAGES),
            Err(e) => Err(e),
        };

        if result.is_err() {
            remove_partial(&archive).await;
        }
        result
    }
}

#[async_trait]
impl Extractor for CompanionTool {
    fn name(&self) -> &'static str {
        "zip helper"
    }

    async fn probe(&self) -> bool {
        tokio::fs::metadata(&self.program)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    async fn extract(&self, job: &ExtractJob) -> Result<()> {
        let archive = std::path::absolute(&job.archive)?;
        let destination = std::path::absolute(&job.destination)?;
        let (Some(cwd), Some(name)) = (archive.parent(), archive.file_name()) else {
            return Err(BackupError::InvalidName(archive.display().to_string()));
        };

        let args = extract_args(&name.to_string_lossy(), &destination, &job.file_code);
        let output = run_tool(&self.program, &args, cwd, job.timeout, &MESSAGES).await?;
        output.check_status(&MESSAGES)
    }
}
