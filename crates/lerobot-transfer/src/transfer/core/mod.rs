//! Core types and utilities for the transfer engine
//!
//! This module contains the fundamental types shared by the scanner,
//! coordinator, worker pool and verifier: transfer units, negotiated
//! remote locations and per-unit outcomes.

pub mod error;
pub mod files;
pub mod http;
pub mod metrics;
pub mod progress;
pub mod validation;

pub use error::{ErrorKind, ErrorSeverity, FileOperation, Result, TransferError, ValidationType};
pub use metrics::{InFlightGauge, TransferMetrics, TransferMetricsSnapshot};
pub use progress::{
    CompositeProgressReporter, ConsoleProgressReporter, IntoProgressCallback,
    NullProgressReporter, ProgressCallback, ProgressEvent, ProgressReporter,
};
pub use validation::{Checksum, FileValidation, IntegrityVerifier, StreamingDigest};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Role of a file within the LeRobot layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitRole {
    Metadata,
    Stats,
    DataChunk,
    Video,
}

impl UnitRole {
    /// Metadata and stats are transferred and verified before any bulk unit
    pub fn is_phase_one(self) -> bool {
        matches!(self, UnitRole::Metadata | UnitRole::Stats)
    }
}

impl std::fmt::Display for UnitRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitRole::Metadata => write!(f, "metadata"),
            UnitRole::Stats => write!(f, "stats"),
            UnitRole::DataChunk => write!(f, "data-chunk"),
            UnitRole::Video => write!(f, "video"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// One physical file treated as an atomic transfer job
///
/// Identity is `relative_path`, which always uses `/` separators.
/// `local_path` is the source file for uploads and the final destination
/// for downloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferUnit {
    pub relative_path: String,
    pub local_path: PathBuf,
    pub size: u64,
    pub role: UnitRole,
    pub checksum: Option<Checksum>,
}

impl TransferUnit {
    pub fn new<S: Into<String>, P: Into<PathBuf>>(relative_path: S, local_path: P, size: u64, role: UnitRole) -> Self {
        Self {
            relative_path: relative_path.into(),
            local_path: local_path.into(),
            size,
            role,
            checksum: None,
        }
    }

    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    /// Validation parameters derived from what the unit knows about itself
    pub fn validation(&self) -> FileValidation {
        let validation = FileValidation::new().with_expected_size(self.size);
        match &self.checksum {
            Some(checksum) => validation.with_checksum(checksum.clone()),
            None => validation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Put,
    Post,
    Get,
}

/// A short-lived, single-use endpoint for moving one file's bytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteLocation {
    #[serde(rename = "path")]
    pub relative_path: String,
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    /// Extra headers the storage endpoint requires (content type, signatures)
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Present for presigned-POST style uploads; sent as multipart fields
    #[serde(default)]
    pub form_fields: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip, default = "default_direction")]
    pub direction: Direction,
}

fn default_direction() -> Direction {
    Direction::Upload
}

impl RemoteLocation {
    pub fn new<S: Into<String>, U: Into<String>>(relative_path: S, url: U, direction: Direction) -> Self {
        Self {
            relative_path: relative_path.into(),
            url: url.into(),
            method: match direction {
                Direction::Upload => HttpMethod::Put,
                Direction::Download => HttpMethod::Get,
            },
            headers: BTreeMap::new(),
            form_fields: None,
            expires_at: None,
            direction,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// True when less than `margin` of the location's lifetime remains
    pub fn is_expired(&self, margin: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                let margin = chrono::Duration::from_std(margin).unwrap_or_else(|_| chrono::Duration::zero());
                Utc::now() + margin >= expires_at
            }
            None => false,
        }
    }
}

/// Why a unit ended up failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "kebab-case")]
pub enum FailureReason {
    Transport(String),
    Rejected(String),
    IntegrityMismatch(String),
    LocationExpired(String),
    LocalIo(String),
    Cancelled,
}

impl FailureReason {
    pub fn from_error(error: &TransferError) -> Self {
        let message = error.to_string();
        match error.kind() {
            ErrorKind::Transport => FailureReason::Transport(message),
            ErrorKind::IntegrityMismatch => FailureReason::IntegrityMismatch(message),
            ErrorKind::LocationExpired => FailureReason::LocationExpired(message),
            ErrorKind::LocalIo => FailureReason::LocalIo(message),
            ErrorKind::Cancelled => FailureReason::Cancelled,
            ErrorKind::Validation | ErrorKind::Authentication | ErrorKind::Rejected => {
                FailureReason::Rejected(message)
            }
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Transport(m) => write!(f, "transport: {}", m),
            FailureReason::Rejected(m) => write!(f, "rejected: {}", m),
            FailureReason::IntegrityMismatch(m) => write!(f, "integrity-mismatch: {}", m),
            FailureReason::LocationExpired(m) => write!(f, "location-expired: {}", m),
            FailureReason::LocalIo(m) => write!(f, "local-io: {}", m),
            FailureReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Terminal result of attempting one transfer unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransferOutcome {
    Succeeded { bytes: u64, attempts: u32 },
    Failed { reason: FailureReason, attempts: u32 },
    Skipped { reason: String },
}

/// Outcome paired with the unit it belongs to, as sent to the aggregator
#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub unit: TransferUnit,
    pub outcome: TransferOutcome,
}
