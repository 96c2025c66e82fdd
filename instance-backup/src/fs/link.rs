//! Placing files at new paths: hard links for staging, moves for restore.
//!
//! Both operations prefer the cheap same-volume primitive (`link`/`rename`)
//! and fall back to copying only when the kernel reports a cross-device
//! operation.

use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// How a staged file was materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialized {
    Linked,
    Copied,
}

/// Does this error mean source and destination are on different filesystems?
pub fn is_cross_device(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::CrossesDevices
}

/// Blocking primitive that places `src` at `dst` without copying bytes.
pub type LinkFn = fn(&Path, &Path) -> io::Result<()>;

pub fn hard_link(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::hard_link(src, dst)
}

/// Make `src` available at `dst`: hard link, or byte copy across devices.
///
/// Any other link error is returned unchanged.
pub async fn materialize(src: &Path, dst: &Path) -> io::Result<Materialized> {
    materialize_with(src, dst, hard_link).await
}

/// [`materialize`] with the link primitive supplied by the caller.
pub async fn materialize_with(src: &Path, dst: &Path, link: LinkFn) -> io::Result<Materialized> {
    let (from, to) = (src.to_path_buf(), dst.to_path_buf());
    let linked = tokio::task::spawn_blocking(move || link(&from, &to))
        .await
        .map_err(io::Error::other)?;

    match linked {
        Ok(()) => Ok(Materialized::Linked),
        Err(e) if is_cross_device(&e) => {
            tokio::fs::copy(src, dst).await?;
            Ok(Materialized::Copied)
        }
        Err(e) => Err(e),
    }
}

/// Move `src` to `dst`, replacing whatever is at `dst`.
pub async fn move_replace(src: &Path, dst: &Path) -> io::Result<()> {
    remove_existing(dst).await?;

    match tokio::fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            let (from, to) = (src.to_path_buf(), dst.to_path_buf());
            tokio::task::spawn_blocking(move || copy_tree(&from, &to))
                .await
                .map_err(io::Error::other)??;
            remove_existing(src).await
        }
        Err(e) => Err(e),
    }
}

async fn remove_existing(path: &Path) -> io::Result<()> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Recursively copy a file or directory tree (blocking).
fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    if !std::fs::symlink_metadata(src)?.is_dir() {
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(src, dst)?;
        return Ok(());
    }

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target: PathBuf = dst.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
