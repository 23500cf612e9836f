//! Dataset layout scanning
//!
//! Turns a local LeRobot directory (upload) or a remote file list
//! (download) into an ordered list of transfer units. Relative paths are
//! normalized to forward slashes on every platform.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::api::RemoteDataset;
use crate::transfer::core::validation::{compute_file, StreamingDigest};
use crate::transfer::core::{FileOperation, Result, TransferError, TransferUnit, UnitRole};
use crate::transfer::manifest::{DatasetManifest, INFO_PATH};

const STATS_FILES: [&str; 2] = ["meta/stats.json", "meta/episodes_stats.jsonl"];

/// Result of scanning a local dataset directory
#[derive(Debug, Clone)]
pub struct ScannedDataset {
    pub root: PathBuf,
    pub manifest: DatasetManifest,
    pub units: Vec<TransferUnit>,
    /// Declared files that were not found (non-strict scans only)
    pub missing: Vec<String>,
    pub total_bytes: u64,
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn is_hidden_entry(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_str().map(is_hidden).unwrap_or(false)
}

/// Role a path plays in the layout
pub fn role_for(relative_path: &str) -> UnitRole {
    if STATS_FILES.contains(&relative_path) {
        UnitRole::Stats
    } else if relative_path.starts_with("meta/") || !relative_path.contains('/') {
        UnitRole::Metadata
    } else if relative_path.starts_with("videos/") {
        UnitRole::Video
    } else {
        UnitRole::DataChunk
    }
}

/// Role of a local file, or `None` for files that are never transferred
pub fn classify(relative_path: &str) -> Option<UnitRole> {
    if relative_path.split('/').any(is_hidden) || relative_path.ends_with(".part") {
        return None;
    }
    Some(role_for(relative_path))
}

fn order_key(unit: &TransferUnit) -> (u8, &str) {
    let rank = if unit.relative_path == INFO_PATH {
        0
    } else if unit.role.is_phase_one() {
        1
    } else {
        2
    };
    (rank, unit.relative_path.as_str())
}

/// `meta/info.json` first, then the rest of phase one, then bulk units, each by path
pub fn sort_units(units: &mut [TransferUnit]) {
    units.sort_by(|a, b| order_key(a).cmp(&order_key(b)));
}

/// Reject remote paths that could escape the target directory
pub fn validate_relative_path(relative_path: &str) -> Result<()> {
    let invalid = |reason: &str| TransferError::Validation {
        message: format!("{}: '{}'", reason, relative_path),
        path: Some(relative_path.to_string()),
    };

    if relative_path.trim().is_empty() {
        return Err(invalid("empty path"));
    }
    if relative_path.starts_with('/') || relative_path.starts_with('\\') {
        return Err(invalid("absolute path not allowed"));
    }

    for component in Path::new(relative_path).components() {
        match component {
            Component::ParentDir => return Err(invalid("parent directory traversal not allowed")),
            Component::RootDir | Component::Prefix(_) => return Err(invalid("absolute path not allowed")),
            Component::CurDir | Component::Normal(_) => {}
        }
    }
    if relative_path.split(['/', '\\']).any(|part| part == "..") {
        return Err(invalid("parent directory traversal not allowed"));
    }

    Ok(())
}

fn walk(root: &Path) -> Result<Vec<(String, PathBuf, u64)>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden_entry(e))
    {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            let source = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop detected"));
            TransferError::io(path, FileOperation::Read, source)
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| TransferError::io(entry.path(), FileOperation::Read, std::io::Error::other(e)))?;
        let relative = relative.to_string_lossy().replace('\\', "/");
        let size = entry
            .metadata()
            .map_err(|e| {
                let source = e.into_io_error().unwrap_or_else(|| std::io::Error::other("metadata unavailable"));
                TransferError::io(entry.path(), FileOperation::Metadata, source)
            })?
            .len();

        files.push((relative, entry.path().to_path_buf(), size));
    }

    Ok(files)
}

/// Scan a local dataset for upload
///
/// Fails with `InvalidDataset` when `meta/info.json` is missing or
/// malformed. In strict mode a declared file that is absent on disk is a
/// `Validation` error; otherwise it is logged and reported in `missing`.
pub async fn scan_local(root: &Path, strict: bool, compute_checksums: bool) -> Result<ScannedDataset> {
    let is_dir = fs::metadata(root).await.map(|m| m.is_dir()).unwrap_or(false);
    if !is_dir {
        return Err(TransferError::InvalidDataset {
            path: root.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }

    let info_path = root.join(INFO_PATH);
    let contents = match fs::read_to_string(&info_path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TransferError::InvalidDataset {
                path: root.to_path_buf(),
                reason: format!("{} not found", INFO_PATH),
            });
        }
        Err(e) => return Err(TransferError::io(&info_path, FileOperation::Read, e)),
    };
    let manifest = DatasetManifest::parse(root, &contents)?;

    let walk_root = root.to_path_buf();
    let files = tokio::task::spawn_blocking(move || walk(&walk_root))
        .await
        .map_err(|e| TransferError::io(root, FileOperation::Read, std::io::Error::other(e)))??;

    let mut units: Vec<TransferUnit> = files
        .into_iter()
        .filter_map(|(relative, local, size)| match classify(&relative) {
            Some(role) => Some(TransferUnit::new(relative, local, size, role)),
            None => {
                debug!("Ignoring {}", relative);
                None
            }
        })
        .collect();
    sort_units(&mut units);

    let missing: Vec<String> = manifest
        .declared_files()
        .iter()
        .filter(|declared| !declared.is_satisfied_by(units.iter().map(|u| u.relative_path.as_str())))
        .map(|declared| declared.to_string())
        .collect();

    if !missing.is_empty() {
        if strict {
            let preview: Vec<&str> = missing.iter().take(5).map(String::as_str).collect();
            return Err(TransferError::Validation {
                message: format!(
                    "{} declared file(s) missing: {}{}",
                    missing.len(),
                    preview.join(", "),
                    if missing.len() > preview.len() { ", ..." } else { "" }
                ),
                path: missing.first().cloned(),
            });
        }
        for path in &missing {
            warn!("Declared file missing, continuing without it: {}", path);
        }
    }

    if compute_checksums {
        for unit in units.iter_mut() {
            let checksum = compute_file(&unit.local_path, StreamingDigest::sha256()).await?;
            unit.checksum = Some(checksum);
        }
    }

    let total_bytes = units.iter().map(|u| u.size).sum();
    info!(
        "Scanned {}: {} file(s), {} bytes, {} missing",
        root.display(),
        units.len(),
        total_bytes,
        missing.len()
    );

    Ok(ScannedDataset {
        root: root.to_path_buf(),
        manifest,
        units,
        missing,
        total_bytes,
    })
}

/// Canonical form of a remote path: forward slashes, no empty or `.` segments
pub fn normalize_relative_path(relative_path: &str) -> Result<String> {
    validate_relative_path(relative_path)?;
    let normalized = relative_path
        .split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/");

    if normalized.is_empty() {
        return Err(TransferError::Validation {
            message: format!("path names no file: '{}'", relative_path),
            path: Some(relative_path.to_string()),
        });
    }
    Ok(normalized)
}

/// Units for downloading a remote dataset into `target`
///
/// Paths that normalize to the same file are rejected, since they would
/// share one destination.
pub fn plan_download(remote: &RemoteDataset, target: &Path) -> Result<Vec<TransferUnit>> {
    let mut units = Vec::with_capacity(remote.files.len());
    let mut seen = HashSet::with_capacity(remote.files.len());

    for file in &remote.files {
        let relative = normalize_relative_path(&file.path)?;
        if !seen.insert(relative.clone()) {
            return Err(TransferError::Validation {
                message: format!("'{}' names the same file as another entry ('{}')", file.path, relative),
                path: Some(file.path.clone()),
            });
        }

        let local_path = relative.split('/').fold(target.to_path_buf(), |path, part| path.join(part));
        let mut unit = TransferUnit::new(relative.as_str(), local_path, file.size, role_for(&relative));
        if let Some(ref checksum) = file.checksum {
            unit = unit.with_checksum(checksum.clone());
        }
        units.push(unit);
    }

    sort_units(&mut units);
    Ok(units)
}
