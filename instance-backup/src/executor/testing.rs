//! In-process stand-ins for the instance manager and the archive tools.

use crate::archive::{ArchiveService, CompressJob, Compressor, ExtractJob, Extractor};
use crate::instance::{
    ExitEvent, InstanceBackupSettings, InstanceStatus, ManagedInstance, Preset,
};
use crate::utils::errors::{BackupError, Result};
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use walkdir::WalkDir;

pub struct FakeInstance {
    pub dir: PathBuf,
    pub settings: InstanceBackupSettings,
    pub status: Mutex<InstanceStatus>,
    pub presets: Mutex<Vec<Preset>>,
    /// Emit an exit event when asked to stop
    pub exits_on_stop: bool,
    exit_tx: broadcast::Sender<ExitEvent>,
}

impl FakeInstance {
    pub fn new(dir: &Path, status: InstanceStatus, exits_on_stop: bool) -> Self {
        let (exit_tx, _) = broadcast::channel(4);
        Self {
            dir: dir.to_path_buf(),
            settings: InstanceBackupSettings::default(),
            status: Mutex::new(status),
            presets: Mutex::new(Vec::new()),
            exits_on_stop,
            exit_tx,
        }
    }

    pub fn presets(&self) -> Vec<Preset> {
        self.presets.lock().unwrap().clone()
    }
}

#[async_trait]
impl ManagedInstance for FakeInstance {
    fn id(&self) -> &str {
        "abc"
    }

    fn nickname(&self) -> &str {
        "Survival"
    }

    fn working_dir(&self) -> PathBuf {
        self.dir.clone()
    }

    fn status(&self) -> InstanceStatus {
        *self.status.lock().unwrap()
    }

    fn backup_settings(&self) -> InstanceBackupSettings {
        self.settings.clone()
    }

    fn subscribe_exit(&self) -> broadcast::Receiver<ExitEvent> {
        self.exit_tx.subscribe()
    }

    async fn request_preset(&self, preset: Preset) -> Result<()> {
        self.presets.lock().unwrap().push(preset);
        match preset {
            Preset::Stop => {
                *self.status.lock().unwrap() = InstanceStatus::Stopping;
                if self.exits_on_stop {
                    *self.status.lock().unwrap() = InstanceStatus::Stopped;
                    let _ = self.exit_tx.send(ExitEvent { code: Some(0) });
                }
            }
            Preset::Start => *self.status.lock().unwrap() = InstanceStatus::Running,
        }
        Ok(())
    }
}

/// Keeps each "archive" as a directory tree in a private store and writes a
/// zip signature at the archive path.
pub struct FakeArchiver {
    store: TempDir,
    /// Relative paths seen under the base directory, one entry per compression
    pub compressed: Mutex<Vec<Vec<String>>>,
}

impl FakeArchiver {
    pub fn new() -> Self {
        Self {
            store: TempDir::new().unwrap(),
            compressed: Mutex::new(Vec::new()),
        }
    }

    pub fn service(self: &Arc<Self>) -> Arc<ArchiveService> {
        let fallback: Arc<dyn Extractor> = self.clone();
        let writer: Arc<dyn Compressor> = self.clone();
        Arc::new(ArchiveService::new(
            None,
            fallback,
            writer,
            Duration::from_secs(5),
            "utf-8",
        ))
    }

    fn slot(&self, archive: &Path) -> PathBuf {
        self.store.path().join(archive.file_name().unwrap())
    }
}

pub fn copy_tree(src: &Path, dst: &Path) {
    for entry in WalkDir::new(src) {
        let entry = entry.unwrap();
        let target = dst.join(entry.path().strip_prefix(src).unwrap());
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).unwrap();
        } else {
            fs::create_dir_all(target.parent().unwrap()).unwrap();
            fs::copy(entry.path(), &target).unwrap();
        }
    }
}

pub fn relative_files(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();
    files.sort();
    files
}

#[async_trait]
impl Compressor for FakeArchiver {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn compress(&self, job: &CompressJob) -> Result<()> {
        let slot = self.slot(&job.archive);
        for input in &job.inputs {
            let relative = input.strip_prefix(&job.base_dir).unwrap_or(input);
            copy_tree(input, &slot.join(relative));
        }
        self.compressed.lock().unwrap().push(relative_files(&slot));
        fs::write(&job.archive, b"PK\x03\x04")?;
        Ok(())
    }
}

#[async_trait]
impl Extractor for FakeArchiver {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn probe(&self) -> bool {
        true
    }

    async fn extract(&self, job: &ExtractJob) -> Result<()> {
        let slot = self.slot(&job.archive);
        if !slot.exists() {
            return Err(BackupError::ToolOpenErrors);
        }
        copy_tree(&slot, &job.destination);
        Ok(())
    }
}
