//! Integrity verification for transferred files
//!
//! Checksums are either SHA-256 (hex) or xxHash64 (base64 of the
//! little-endian digest). Downloads are hashed while streaming so the
//! verifier only has to compare; uploads are confirmed against what the
//! remote service reports after it acknowledged receipt.

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};
use xxhash_rust::xxh64::Xxh64;

use crate::api::RemoteService;
use crate::transfer::core::error::{FileOperation, Result, TransferError, ValidationType};
use crate::transfer::core::files::{atomic_rename, remove_partial};
use crate::transfer::core::http::DownloadedFile;
use crate::transfer::core::progress::{ProgressCallback, ProgressEvent};
use crate::transfer::core::TransferUnit;

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Content checksum attached to a transfer unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Checksum {
    /// Lowercase hex SHA-256
    Sha256(String),
    /// Base64 of the little-endian xxHash64 digest
    Xxh64(String),
}

impl Checksum {
    /// Parse `sha256:<hex>`, `xxh64:<base64>` or a bare 64-char hex string
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Some(hex_digest) = value.strip_prefix("sha256:") {
            return is_sha256_hex(hex_digest).then(|| Checksum::Sha256(hex_digest.to_ascii_lowercase()));
        }
        if let Some(b64) = value.strip_prefix("xxh64:") {
            let decoded = base64::engine::general_purpose::STANDARD.decode(b64).ok()?;
            return (decoded.len() == 8).then(|| Checksum::Xxh64(b64.to_string()));
        }
        is_sha256_hex(value).then(|| Checksum::Sha256(value.to_ascii_lowercase()))
    }

    pub fn validation_type(&self) -> ValidationType {
        match self {
            Checksum::Sha256(_) => ValidationType::Sha256,
            Checksum::Xxh64(_) => ValidationType::Xxh64,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Checksum::Sha256(v) | Checksum::Xxh64(v) => v,
        }
    }

    pub fn sha256_of(data: &[u8]) -> Self {
        Checksum::Sha256(hex::encode(Sha256::digest(data)))
    }

    pub fn xxh64_of(data: &[u8]) -> Self {
        let hash = xxhash_rust::xxh64::xxh64(data, 0);
        Checksum::Xxh64(base64::engine::general_purpose::STANDARD.encode(hash.to_le_bytes()))
    }

    /// Stream a file through the same algorithm as `self`
    pub async fn compute_like(&self, path: &Path) -> Result<Checksum> {
        compute_file(path, StreamingDigest::like(self)).await
    }
}

fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Checksum::Sha256(v) => write!(f, "sha256:{}", v),
            Checksum::Xxh64(v) => write!(f, "xxh64:{}", v),
        }
    }
}

impl std::str::FromStr for Checksum {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Checksum::parse(s).ok_or_else(|| format!("unrecognised checksum '{}'", s))
    }
}

impl TryFrom<String> for Checksum {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Checksum> for String {
    fn from(checksum: Checksum) -> Self {
        checksum.to_string()
    }
}

/// Incremental hasher fed chunk by chunk during a transfer
pub enum StreamingDigest {
    Sha256(Sha256),
    Xxh64(Xxh64),
}

impl StreamingDigest {
    pub fn sha256() -> Self {
        StreamingDigest::Sha256(Sha256::new())
    }

    /// Hasher for the same algorithm as an expected checksum
    pub fn like(checksum: &Checksum) -> Self {
        match checksum {
            Checksum::Sha256(_) => StreamingDigest::sha256(),
            Checksum::Xxh64(_) => StreamingDigest::Xxh64(Xxh64::new(0)),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            StreamingDigest::Sha256(hasher) => hasher.update(data),
            StreamingDigest::Xxh64(hasher) => hasher.update(data),
        }
    }

    pub fn finalize(self) -> Checksum {
        match self {
            StreamingDigest::Sha256(hasher) => Checksum::Sha256(hex::encode(hasher.finalize())),
            StreamingDigest::Xxh64(hasher) => {
                let bytes = hasher.digest().to_le_bytes();
                Checksum::Xxh64(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
        }
    }
}

/// Hash a file on disk without loading it into memory
pub async fn compute_file(path: &Path, mut digest: StreamingDigest) -> Result<Checksum> {
    let mut file = fs::File::open(path)
        .await
        .map_err(|e| TransferError::io(path, FileOperation::Read, e))?;
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let read = file
            .read(&mut buffer)
            .await
            .map_err(|e| TransferError::io(path, FileOperation::Read, e))?;
        if read == 0 {
            break;
        }
        digest.update(&buffer[..read]);
    }

    Ok(digest.finalize())
}

/// Expected properties of a file on disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileValidation {
    pub expected_size: Option<u64>,
    pub checksum: Option<Checksum>,
}

impl FileValidation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    /// Check if validation is needed
    pub fn is_empty(&self) -> bool {
        self.checksum.is_none() && self.expected_size.is_none()
    }

    /// Validate a file against the expected size, then the checksum
    pub async fn validate_file(&self, path: &Path, label: &str) -> Result<()> {
        let file_size = fs::metadata(path)
            .await
            .map_err(|e| TransferError::io(path, FileOperation::Metadata, e))?
            .len();

        // Check file size first (fastest check)
        if let Some(expected_size) = self.expected_size {
            if file_size != expected_size {
                return Err(TransferError::IntegrityMismatch {
                    path: label.to_string(),
                    check: ValidationType::Size,
                    expected: expected_size.to_string(),
                    actual: file_size.to_string(),
                });
            }
        }

        if let Some(ref expected) = self.checksum {
            let actual = expected.compute_like(path).await?;
            if &actual != expected {
                return Err(TransferError::IntegrityMismatch {
                    path: label.to_string(),
                    check: expected.validation_type(),
                    expected: expected.value().to_string(),
                    actual: actual.value().to_string(),
                });
            }
        }

        debug!("Validated {} ({} bytes)", label, file_size);
        Ok(())
    }
}

/// Confirms each completed transfer before it is marked done
#[derive(Clone, Default)]
pub struct IntegrityVerifier {
    progress_callback: Option<ProgressCallback>,
}

impl IntegrityVerifier {
    pub fn new(progress_callback: Option<ProgressCallback>) -> Self {
        Self { progress_callback }
    }

    fn report(&self, path: &str, valid: bool) {
        if let Some(ref callback) = self.progress_callback {
            callback(ProgressEvent::ValidationComplete {
                path: path.to_string(),
                valid,
            });
        }
    }

    /// Check a freshly written `.part` file and move it into place
    ///
    /// Any mismatch deletes the partial file so nothing truncated is left
    /// where a reader could mistake it for the real thing.
    pub async fn verify_download(&self, unit: &TransferUnit, file: DownloadedFile) -> Result<()> {
        let on_disk = fs::metadata(&file.temp_path)
            .await
            .map_err(|e| TransferError::io(&file.temp_path, FileOperation::Metadata, e))?
            .len();

        let mismatch = if on_disk != unit.size || file.bytes != unit.size {
            Some(TransferError::IntegrityMismatch {
                path: unit.relative_path.clone(),
                check: ValidationType::Size,
                expected: unit.size.to_string(),
                actual: on_disk.to_string(),
            })
        } else {
            match (&unit.checksum, &file.digest) {
                (Some(expected), Some(actual)) if expected != actual => Some(TransferError::IntegrityMismatch {
                    path: unit.relative_path.clone(),
                    check: expected.validation_type(),
                    expected: expected.value().to_string(),
                    actual: actual.value().to_string(),
                }),
                _ => None,
            }
        };

        if let Some(err) = mismatch {
            warn!("Discarding {}: {}", file.temp_path.display(), err);
            remove_partial(&file.temp_path).await;
            self.report(&unit.relative_path, false);
            return Err(err);
        }

        atomic_rename(&file.temp_path, &unit.local_path).await?;
        self.report(&unit.relative_path, true);
        Ok(())
    }

    /// Confirm the remote copy of an uploaded unit
    pub async fn verify_upload(
        &self,
        remote: &dyn RemoteService,
        dataset_id: &str,
        unit: &TransferUnit,
    ) -> Result<()> {
        let info = remote.remote_file_info(dataset_id, &unit.relative_path).await?;

        let result = match info {
            None => Err(TransferError::IntegrityMismatch {
                path: unit.relative_path.clone(),
                check: ValidationType::Presence,
                expected: "present".to_string(),
                actual: "missing".to_string(),
            }),
            Some(info) if info.size != unit.size => Err(TransferError::IntegrityMismatch {
                path: unit.relative_path.clone(),
                check: ValidationType::Size,
                expected: unit.size.to_string(),
                actual: info.size.to_string(),
            }),
            Some(info) => match (&unit.checksum, &info.checksum) {
                (Some(expected), Some(actual))
                    if expected.validation_type() == actual.validation_type() && expected != actual =>
                {
                    Err(TransferError::IntegrityMismatch {
                        path: unit.relative_path.clone(),
                        check: expected.validation_type(),
                        expected: expected.value().to_string(),
                        actual: actual.value().to_string(),
                    })
                }
                _ => Ok(()),
            },
        };

        self.report(&unit.relative_path, result.is_ok());
        result
    }
}
