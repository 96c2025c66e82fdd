//! Subprocess driver shared by the archive tools.

use crate::utils::errors::{BackupError, Result};
use crate::utils::truncate_chars;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Diagnostics longer than this are cut before logging.
const MAX_LOGGED_OUTPUT: usize = 200;

/// Operator-facing messages for each way a tool invocation can fail.
#[derive(Debug, Clone, Copy)]
pub struct ToolMessages {
    pub exit: &'static str,
    pub start: &'static str,
    pub timeout: &'static str,
}

/// Captured result of a finished tool run.
#[derive(Debug)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Fail with the table's exit message when the process did not exit cleanly.
    pub fn check_status(&self, messages: &ToolMessages) -> Result<()> {
        if self.status.success() {
            if !self.stderr.trim().is_empty() {
                debug!("Tool stderr: {}", truncate_chars(self.stderr.trim(), MAX_LOGGED_OUTPUT));
            }
            return Ok(());
        }

        error!(
            status = %self.status,
            stdout = %truncate_chars(self.stdout.trim(), MAX_LOGGED_OUTPUT),
            stderr = %truncate_chars(self.stderr.trim(), MAX_LOGGED_OUTPUT),
            "{}",
            messages.exit
        );
        Err(BackupError::ToolGenericError(format!(
            "{} ({})",
            messages.exit, self.status
        )))
    }
}

/// Run `program` with `args` in `cwd`, killing it when `timeout` elapses.
///
/// A non-zero exit is not an error here; callers decide what the output means.
pub async fn run_tool(
    program: &Path,
    args: &[String],
    cwd: &Path,
    timeout: Duration,
    messages: &ToolMessages,
) -> Result<ToolOutput> {
    // A missing cwd surfaces as ENOENT from spawn, which would read as a missing tool.
    if !tokio::fs::metadata(cwd).await.map(|m| m.is_dir()).unwrap_or(false) {
        error!("{}: working directory {} does not exist", messages.start, cwd.display());
        return Err(BackupError::ToolLaunchFailed(format!(
            "{}: working directory unavailable",
            messages.start
        )));
    }

    info!(
        cwd = %cwd.display(),
        "Running {} {}",
        program.display(),
        args.join(" ")
    );

    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(program, messages, e))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            error!("{}: {}", messages.start, e);
            return Err(BackupError::ToolLaunchFailed(messages.start.to_string()));
        }
        Err(_) => {
            // Dropping the wait future drops the child, which kills it.
            error!(
                "{} after {}s: {}",
                messages.timeout,
                timeout.as_secs_f32(),
                program.display()
            );
            return Err(BackupError::ToolTimeout(timeout.as_secs()));
        }
    };

    let output = ToolOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    if !output.status.success() {
        warn!(status = %output.status, "{} exited unsuccessfully", program.display());
    }

    Ok(output)
}

fn spawn_error(program: &Path, messages: &ToolMessages, e: io::Error) -> BackupError {
    error!(
        "{}: {}: {}",
        messages.start,
        program.display(),
        truncate_chars(&e.to_string(), MAX_LOGGED_OUTPUT)
    );
    match e.kind() {
        io::ErrorKind::NotFound => BackupError::ToolNotFound(program.display().to_string()),
        _ => BackupError::ToolLaunchFailed(messages.start.to_string()),
    }
}
