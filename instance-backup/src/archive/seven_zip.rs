//! 7-Zip driver. Extraction only; results are read from the console output.

use super::process::{run_tool, ToolMessages};
use super::{ExtractJob, Extractor};
use crate::utils::errors::{BackupError, Result};
use crate::utils::truncate_chars;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

const MESSAGES: ToolMessages = ToolMessages {
    exit: "7-Zip exited with an error",
    start: "7-Zip could not be started",
    timeout: "7-Zip extraction timed out",
};

const MISSING_VOLUME: &str = "Missing volume";

pub struct SevenZip {
    program: PathBuf,
}

impl SevenZip {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

/// `x <archive> -o<dest> -aoa`: extract with full paths, overwrite everything.
pub fn extract_args(archive: &Path, destination: &Path) -> Vec<String> {
    vec![
        "x".to_string(),
        archive.display().to_string(),
        format!("-o{}", destination.display()),
        "-aoa".to_string(),
    ]
}

/// Map 7-Zip console output to a failure, most specific marker first.
pub fn classify_output(stdout: &str) -> Option<BackupError> {
    if stdout.contains(MISSING_VOLUME) {
        return Some(BackupError::ToolMissingVolume(missing_volume_name(stdout)));
    }
    if stdout.contains("Data Error") {
        return Some(BackupError::ToolDataError);
    }
    if stdout.contains("Open Errors") {
        return Some(BackupError::ToolOpenErrors);
    }

    let has_errors = stdout.contains("ERRORS:")
        || stdout.contains("ERROR:")
        || stdout.contains("Archives with Errors:");
    if !has_errors {
        return None;
    }

    let first = stdout
        .lines()
        .map(str::trim)
        .find(|line| line.contains("ERROR") || line.contains("Archives with Errors"))
        .unwrap_or("Unknown error");
    Some(BackupError::ToolGenericError(truncate_chars(first, 100)))
}

/// Volume name from `Missing volume : world.z02`
fn missing_volume_name(stdout: &str) -> Option<String> {
    let (_, rest) = stdout.split_once(MISSING_VOLUME)?;
    let rest = rest.trim_start().strip_prefix(':')?;
    rest.split_whitespace().next().map(str::to_string)
}

fn summary(stdout: &str) -> String {
    let lines: Vec<&str> = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let start = lines.len().saturating_sub(3);
    lines[start..].join("; ")
}

#[async_trait]
impl Extractor for SevenZip {
    fn name(&self) -> &'static str {
        "7-Zip"
    }

    async fn probe(&self) -> bool {
        let Ok(metadata) = tokio::fs::metadata(&self.program).await else {
            return false;
        };
        if !metadata.is_file() {
            return false;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            metadata.permissions().mode() & 0o111 != 0
        }
        #[cfg(not(unix))]
        {
            true
        }
    }

    async fn extract(&self, job: &ExtractJob) -> Result<()> {
        let archive = std::path::absolute(&job.archive)?;
        let destination = std::path::absolute(&job.destination)?;
        let cwd = archive.parent().unwrap_or(Path::new("."));

        tokio::fs::create_dir_all(&destination).await?;

        let output = run_tool(
            &self.program,
            &extract_args(&archive, &destination),
            cwd,
            job.timeout,
            &MESSAGES,
        )
        .await?;

        if let Some(err) = classify_output(&output.stdout) {
            error!("7-Zip extraction failed: {}", err);
            return Err(err);
        }

        if !output.stderr.trim().is_empty() {
            warn!("7-Zip warning: {}", truncate_chars(output.stderr.trim(), 200));
        }

        output.check_status(&MESSAGES)?;

        if output.stdout.contains("Everything is Ok") {
            info!("7-Zip extraction finished: Everything is Ok");
        } else {
            info!("7-Zip extraction finished: {}", summary(&output.stdout));
        }
        Ok(())
    }
}
