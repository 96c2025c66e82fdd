//! End-to-end backup, list and restore through the subprocess path, using a
//! shell script that speaks the zip helper's command line.

#![cfg(unix)]

use instance_backup::archive::ArchiveService;
use instance_backup::config::Config;
use instance_backup::{
    BackupError, BackupService, DirectoryInstance, InstanceBackupSettings, ManagedInstance,
};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tempfile::TempDir;
use walkdir::WalkDir;

/// Writing a script and executing it while another test forks can fail with
/// ETXTBSY, so these tests run one at a time.
static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}

/// Stores a tar stream behind a zip signature so format sniffing accepts it.
const FAKE_ZIP_HELPER: &str = r#"#!/bin/sh
mode=""
zip=""
dest=""
files=""
for arg in "$@"; do
  case "$arg" in
    --mode=*) mode="${arg#--mode=}" ;;
    --zipPath=*) zip="${arg#--zipPath=}" ;;
    --distDirPath=*) dest="${arg#--distDirPath=}" ;;
    --code=*) ;;
    --file=*) files="$files ${arg#--file=}" ;;
  esac
done
case "$mode" in
  1) printf 'PK\003\004' > "$zip" && tar -cf - $files >> "$zip" ;;
  2) mkdir -p "$dest" && tail -c +5 "$zip" | tar -xf - -C "$dest" ;;
  *) echo "unknown mode $mode" >&2; exit 2 ;;
esac
"#;

const SLOW_ZIP_HELPER: &str = r#"#!/bin/sh
for arg in "$@"; do
  case "$arg" in
    --zipPath=*) zip="${arg#--zipPath=}" ;;
  esac
done
echo partial > "$zip"
sleep 5
"#;

const FAILING_ZIP_HELPER: &str = r#"#!/bin/sh
for arg in "$@"; do
  case "$arg" in
    --zipPath=*) zip="${arg#--zipPath=}" ;;
  esac
done
echo partial > "$zip"
echo "disk full" >&2
exit 1
"#;

struct Env {
    root: TempDir,
    config: Config,
}

impl Env {
    fn new(helper: &str) -> Self {
        let root = TempDir::new().unwrap();
        let tool = root.path().join("bin/file_zip");
        fs::create_dir_all(tool.parent().unwrap()).unwrap();
        fs::write(&tool, helper).unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = Config::default();
        config.storage.backup_root = root.path().join("backups");
        config.storage.staging_root = Some(root.path().join("staging"));
        config.archive.companion_path = tool;
        config.archive.seven_zip_path = root.path().join("bin/7z-not-installed");
        config.archive.timeout_secs = 30;

        Self { root, config }
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.path().join(relative)
    }

    fn instance(&self, dir: &str, settings: InstanceBackupSettings) -> DirectoryInstance {
        DirectoryInstance::new("abc", "Survival", self.path(dir), settings)
    }
}

fn write_files(root: &Path, files: &[(&str, &[u8])]) {
    for (relative, content) in files {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

fn snapshot(root: &Path) -> Vec<(String, Vec<u8>)> {
    let mut files: Vec<(String, Vec<u8>)> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let relative = e.path().strip_prefix(root).unwrap().to_string_lossy().into_owned();
            (relative, fs::read(e.path()).unwrap())
        })
        .collect();
    files.sort();
    files
}

#[tokio::test]
async fn test_backup_list_restore_cycle() -> instance_backup::Result<()> {
    let _serial = serial();
    let env = Env::new(FAKE_ZIP_HELPER);
    let source_dir = env.path("survival");
    write_files(
        &source_dir,
        &[
            ("server.properties", b"motd=hello"),
            ("world/level.dat", &[0u8, 1, 2, 3, 255]),
            ("world/region/r.0.0.mca", &[7u8; 4096]),
            ("logs/latest.log", b"noise"),
            (".mcsm/.backupignore", b"# runtime output\nlogs/\n"),
        ],
    );
    let before = snapshot(&source_dir);

    let service = BackupService::new(&env.config);
    let source = Arc::new(env.instance("survival", InstanceBackupSettings::default()));

    let record = service.create_backup(source.clone()).await?;
    assert!(record.file_name.starts_with("backup_Survival_"));
    assert!(record.size > 4);

    // Sources are untouched and staging is gone
    assert_eq!(snapshot(&source_dir), before);
    assert_eq!(fs::read_dir(env.path("staging"))?.count(), 0);

    let listed = service.list_backups(source.as_ref()).await?;
    assert_eq!(listed, vec![record.clone()]);

    // Restore into a fresh directory sharing the same backup directory
    let target = env.instance("restored", InstanceBackupSettings::default());
    fs::create_dir_all(target.working_dir())?;
    service.restore_backup(&target, &record.file_name).await?;

    let restored = snapshot(&env.path("restored"));
    let expected: Vec<(String, Vec<u8>)> = before
        .into_iter()
        .filter(|(path, _)| !path.starts_with("logs/") && !path.starts_with(".mcsm/"))
        .collect();
    assert_eq!(restored, expected);
    assert!(!env.path("restored/survival").exists());
    assert_eq!(fs::read_dir(env.path("staging"))?.count(), 0);
    Ok(())
}

/// The same location as `path`, spelled relative to the current directory.
fn relative_to_cwd(path: &Path) -> PathBuf {
    let cwd = std::env::current_dir().unwrap();
    let mut relative = PathBuf::new();
    for _ in cwd.components().skip(1) {
        relative.push("..");
    }
    relative.join(path.strip_prefix("/").unwrap())
}

#[tokio::test]
async fn test_backup_with_relative_roots() -> instance_backup::Result<()> {
    let _serial = serial();
    let mut env = Env::new(FAKE_ZIP_HELPER);
    env.config.storage.staging_root = Some(relative_to_cwd(&env.path("staging")));
    env.config.storage.backup_root = relative_to_cwd(&env.path("backups"));
    assert!(env.config.storage.staging_root.as_ref().unwrap().is_relative());

    let source_dir = env.path("survival");
    write_files(&source_dir, &[("eula.txt", b"eula=true"), ("world/level.dat", &[9u8; 64])]);
    let before = snapshot(&source_dir);

    let service = BackupService::new(&env.config);
    let source = Arc::new(env.instance("survival", InstanceBackupSettings::default()));
    let record = service.create_backup(source.clone()).await?;
    assert!(env.path("backups/abc").join(&record.file_name).is_file());
    assert_eq!(fs::read_dir(env.path("staging"))?.count(), 0);

    let target = env.instance("restored", InstanceBackupSettings::default());
    fs::create_dir_all(target.working_dir())?;
    service.restore_backup(&target, &record.file_name).await?;
    assert_eq!(snapshot(&env.path("restored")), before);
    Ok(())
}

#[tokio::test]
async fn test_compress_decompress_round_trip() -> instance_backup::Result<()> {
    let _serial = serial();
    let env = Env::new(FAKE_ZIP_HELPER);
    let base = env.path("base");
    write_files(&base, &[("a.txt", b"alpha"), ("dir/b.bin", &[1u8, 2, 3]), ("dir/sub/c", b"")]);

    let archives = ArchiveService::from_config(&env.config.archive);
    let archive = env.path("out/archive.zip");
    archives
        .compress(&archive, &base, vec![base.join("a.txt"), base.join("dir")], "utf-8")
        .await?;
    assert!(archive.is_file());

    let dest = env.path("extracted");
    archives.decompress(&archive, &dest, "utf-8").await?;
    assert_eq!(snapshot(&dest), snapshot(&base));
    Ok(())
}

#[tokio::test]
async fn test_timeout_removes_partial_archive() -> instance_backup::Result<()> {
    let _serial = serial();
    let mut env = Env::new(SLOW_ZIP_HELPER);
    env.config.archive.timeout_secs = 1;
    write_files(&env.path("survival"), &[("eula.txt", b"eula=true")]);

    let service = BackupService::new(&env.config);
    let instance = Arc::new(env.instance("survival", InstanceBackupSettings::default()));

    let err = service.create_backup(instance.clone()).await.unwrap_err();
    assert!(matches!(err, BackupError::ToolTimeout(_)), "got {err:?}");
    assert!(service.list_backups(instance.as_ref()).await?.is_empty());
    assert_eq!(fs::read_dir(env.path("staging"))?.count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_helper_failure_is_reported() -> instance_backup::Result<()> {
    let _serial = serial();
    let env = Env::new(FAILING_ZIP_HELPER);
    write_files(&env.path("survival"), &[("eula.txt", b"eula=true")]);

    let service = BackupService::new(&env.config);
    let instance = Arc::new(env.instance("survival", InstanceBackupSettings::default()));

    let err = service.create_backup(instance.clone()).await.unwrap_err();
    assert!(matches!(err, BackupError::ToolGenericError(_)), "got {err:?}");
    assert!(service.list_backups(instance.as_ref()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_retention_keeps_newest() -> instance_backup::Result<()> {
    let _serial = serial();
    let env = Env::new(FAKE_ZIP_HELPER);
    write_files(&env.path("survival"), &[("eula.txt", b"eula=true")]);

    let service = BackupService::new(&env.config);
    let settings = InstanceBackupSettings {
        max_backup_count: Some(2),
        ..Default::default()
    };
    let instance = Arc::new(env.instance("survival", settings));

    let mut created = Vec::new();
    for _ in 0..3 {
        created.push(service.create_backup(instance.clone()).await?);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let names: Vec<String> = service
        .list_backups(instance.as_ref())
        .await?
        .into_iter()
        .map(|r| r.file_name)
        .collect();
    assert_eq!(names, vec![created[2].file_name.clone(), created[1].file_name.clone()]);

    assert_eq!(service.cleanup_old_backups(instance.as_ref()).await?, 0);
    assert_eq!(service.list_backups(instance.as_ref()).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_multi_volume_rejected_without_spawning() -> instance_backup::Result<()> {
    let _serial = serial();
    let env = Env::new(FAKE_ZIP_HELPER);
    let archives = ArchiveService::from_config(&env.config.archive);

    let volume = env.path("world.zip.001");
    fs::write(&volume, b"PK\x03\x04")?;
    let err = archives
        .decompress(&volume, &env.path("out"), "utf-8")
        .await
        .unwrap_err();
    assert!(matches!(err, BackupError::MultiVolumeUnsupported));
    Ok(())
}
