//! Archive format detection from file signatures and volume naming.

use crate::utils::errors::{BackupError, Result};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Local file header, empty archive, spanned marker and single-segment spanned marker.
const ZIP_SIGNATURES: [&[u8; 4]; 4] = [b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08", b"PK00"];

/// Signatures only written at the start of the first volume of a split archive.
const SPANNED_SIGNATURES: [&[u8; 4]; 2] = [b"PK\x07\x08", b"PK00"];

/// Read the first four bytes of `path`; shorter files are padded with zeros.
pub async fn read_signature(path: &Path) -> Result<[u8; 4]> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut signature = [0u8; 4];
    let mut filled = 0;
    while filled < signature.len() {
        let n = file.read(&mut signature[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(signature)
}

pub fn is_zip_signature(signature: &[u8; 4]) -> bool {
    ZIP_SIGNATURES.iter().any(|s| *s == signature)
}

pub fn is_spanned_signature(signature: &[u8; 4]) -> bool {
    SPANNED_SIGNATURES.iter().any(|s| *s == signature)
}

/// `name.zip.001` or `name.z01` style volume names.
pub fn is_volume_name(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    if digits(ext) {
        return path
            .file_stem()
            .and_then(|stem| Path::new(stem).extension())
            .is_some_and(|inner| inner.eq_ignore_ascii_case("zip"));
    }

    let lower = ext.to_ascii_lowercase();
    lower
        .strip_prefix('z')
        .is_some_and(|rest| rest.len() >= 2 && digits(rest))
}

/// A `.z01` next to `name.zip` means the `.zip` is the last volume of a split set.
async fn has_sibling_volume(path: &Path) -> bool {
    tokio::fs::try_exists(path.with_extension("z01"))
        .await
        .unwrap_or(false)
}

fn extension_label(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_else(|| "(none)".to_string())
}

/// Fail fast unless `path` is a single-volume zip archive.
pub async fn ensure_single_volume_zip(path: &Path) -> Result<()> {
    if is_volume_name(path) {
        return Err(BackupError::MultiVolumeUnsupported);
    }

    let signature = read_signature(path).await?;
    if !is_zip_signature(&signature) {
        return Err(BackupError::UnsupportedFormat(extension_label(path)));
    }

    if is_spanned_signature(&signature) || has_sibling_volume(path).await {
        return Err(BackupError::MultiVolumeUnsupported);
    }

    Ok(())
}
