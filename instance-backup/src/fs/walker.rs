//! Selection of the files that go into an instance backup.
//!
//! The walk starts at the instance root and consults the allow/ignore rules
//! for every entry. Directories that are rejected are pruned, so nothing
//! beneath them is discovered.

use crate::instance::METADATA_DIR;
use crate::rules::{evaluate_allow, evaluate_ignore, AllowVerdict, BackupRules, RuleSet};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// A file selected for backup
#[derive(Debug, Clone)]
pub struct SelectedFile {
    /// Full path to the file
    pub path: PathBuf,

    /// Path relative to the instance root
    pub relative_path: PathBuf,

    /// File size in bytes
    pub size: u64,
}

/// Relative path of `path` under `root` with `/` separators.
///
/// Returns `None` when `path` is not inside `root`.
pub fn relative_key(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Some(parts.join("/"))
}

/// True for the metadata directory itself and everything inside it.
pub fn is_metadata_path(relative: &str) -> bool {
    relative == METADATA_DIR
        || relative
            .strip_prefix(METADATA_DIR)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Decide whether `path` (file or directory) under `root` is backed up.
pub fn should_backup(path: &Path, root: &Path, allow: &RuleSet, ignore: &RuleSet) -> bool {
    let Some(relative) = relative_key(path, root) else {
        return false;
    };

    if is_metadata_path(&relative) {
        return false;
    }

    if allow.is_empty() && ignore.is_empty() {
        return true;
    }

    let mut verdict = AllowVerdict::NoMatch;
    if !allow.is_empty() {
        verdict = evaluate_allow(&relative, allow);
        if verdict == AllowVerdict::Deny {
            return false;
        }
    }

    if !ignore.is_empty() && !evaluate_ignore(&relative, ignore) {
        return false;
    }

    if !allow.is_empty() {
        return verdict == AllowVerdict::Allow;
    }

    true
}

/// Walk `root` and collect every regular file that passes [`should_backup`].
///
/// Symbolic links are not followed and are neither collected nor descended.
pub fn collect_files(root: &Path, rules: &BackupRules) -> std::io::Result<Vec<SelectedFile>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || should_backup(entry.path(), root, &rules.allow, &rules.ignore)
        });

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = entry.metadata()?;
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        files.push(SelectedFile {
            path,
            relative_path,
            size: metadata.len(),
        });
    }

    Ok(files)
}

/// Total size of a selection in bytes
pub fn total_size(files: &[SelectedFile]) -> u64 {
    files.iter().map(|f| f.size).sum()
}
