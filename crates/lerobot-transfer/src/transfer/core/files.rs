//! File operation utilities
//!
//! Shared helpers for the download side: `.part` staging, atomic rename,
//! parent directory creation and cleanup of partial files.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::transfer::core::error::{FileOperation, Result, TransferError};
use crate::transfer::core::validation::FileValidation;

/// Whether an existing destination file already matches the expected content
///
/// Returns `Ok(true)` when the file can be kept. An invalid file is
/// removed so the caller can download it again.
pub async fn check_existing_file(dest_path: &Path, validation: &FileValidation, label: &str) -> Result<bool> {
    if !fs::try_exists(dest_path).await.unwrap_or(false) {
        return Ok(false);
    }

    match validation.validate_file(dest_path, label).await {
        Ok(()) => {
            debug!("File exists and is valid: {}", dest_path.display());
            Ok(true)
        }
        Err(e) => {
            debug!("Existing file failed validation: {}", e);
            fs::remove_file(dest_path)
                .await
                .map_err(|e| TransferError::io(dest_path, FileOperation::Delete, e))?;
            Ok(false)
        }
    }
}

/// Temporary path used while a download is in flight
///
/// The `.part` suffix is appended to the whole file name so that
/// `file-000.parquet` and `file-000.json` never share a staging file.
pub fn create_temp_path(dest_path: &Path) -> PathBuf {
    let mut name = dest_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest_path.with_file_name(name)
}

/// Atomically rename a temporary file to its final destination
pub async fn atomic_rename(temp_path: &Path, dest_path: &Path) -> Result<()> {
    fs::rename(temp_path, dest_path)
        .await
        .map_err(|e| TransferError::io(dest_path, FileOperation::Move, e))?;
    debug!("Atomically renamed {} to {}", temp_path.display(), dest_path.display());
    Ok(())
}

pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| TransferError::io(parent, FileOperation::CreateDir, e))?;
    }
    Ok(())
}

/// Best-effort removal of a partially written file
pub async fn remove_partial(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial file {}: {}", path.display(), e),
    }
}
