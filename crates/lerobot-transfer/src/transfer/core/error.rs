//! Error types for the transfer engine with context and recovery information

use std::error::Error;
use std::path::PathBuf;
use thiserror::Error;

use crate::transfer::aggregator::TransferReport;

/// Errors produced while scanning, negotiating, moving or verifying dataset files
#[derive(Error, Debug)]
pub enum TransferError {
    /// The dataset root is missing its metadata file or the file is malformed
    #[error("Invalid dataset at '{path}': {reason}")]
    InvalidDataset {
        path: PathBuf,
        reason: String,
    },

    /// Local dataset structure does not satisfy the requested validation policy
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        path: Option<String>,
    },

    /// The credential provider could not produce a usable header
    #[error("Authentication failed: {message}")]
    Authentication {
        message: String,
    },

    /// A negotiated location is past its expiry and must be negotiated again
    #[error("Transfer location for '{path}' has expired")]
    LocationExpired {
        path: String,
    },

    /// HTTP-related errors with context
    #[error("HTTP request to '{url}' failed")]
    HttpRequest {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-success HTTP status from a storage endpoint or the API
    #[error("HTTP {status} from '{url}': {body}")]
    HttpStatus {
        url: String,
        status: u16,
        body: String,
    },

    /// Network timeout with retry suggestion
    #[error("Request to '{url}' timed out after {duration_secs}s (try increasing timeout or check network)")]
    NetworkTimeout {
        url: String,
        duration_secs: u64,
    },

    /// Size or checksum of a transferred artifact does not match the expected value
    #[error("Integrity check failed for '{path}': {check} mismatch (expected {expected}, got {actual})")]
    IntegrityMismatch {
        path: String,
        check: ValidationType,
        expected: String,
        actual: String,
    },

    /// Operation cancelled by the caller
    #[error("Transfer cancelled: {reason}")]
    Cancelled {
        reason: String,
        path: Option<String>,
    },

    /// File system I/O errors with file context
    #[error("File operation failed on '{path}' while {operation}")]
    FileSystem {
        path: PathBuf,
        operation: FileOperation,
        #[source]
        source: std::io::Error,
    },

    /// Permission denied errors with suggestions
    #[error("Permission denied accessing '{path}': {suggestion}")]
    PermissionDenied {
        path: PathBuf,
        operation: FileOperation,
        suggestion: String,
        #[source]
        source: std::io::Error,
    },

    /// A dataset, assignment or file that the API does not know about
    #[error("Not found: {what}")]
    NotFound {
        what: String,
    },

    /// The API answered with an error envelope
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
    },

    /// A metadata or stats unit failed; the bulk phase never ran
    #[error("Metadata phase failed: {} unit(s) could not be transferred", .report.failed.len())]
    MetadataPhaseFailed {
        report: Box<TransferReport>,
    },

    /// Configuration errors
    #[error("Invalid configuration: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
        suggestion: Option<String>,
    },

    /// URL parsing errors with helpful suggestions
    #[error("Invalid URL '{url}': {suggestion}")]
    InvalidUrl {
        url: String,
        suggestion: String,
        #[source]
        source: url::ParseError,
    },

    /// Response body could not be decoded
    #[error("Failed to decode JSON: {context}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Types of file operations for error context
#[derive(Debug, Clone, PartialEq)]
pub enum FileOperation {
    Read,
    Write,
    Create,
    Delete,
    Move,
    Metadata,
    CreateDir,
}

impl std::fmt::Display for FileOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileOperation::Read => write!(f, "reading"),
            FileOperation::Write => write!(f, "writing"),
            FileOperation::Create => write!(f, "creating"),
            FileOperation::Delete => write!(f, "deleting"),
            FileOperation::Move => write!(f, "moving"),
            FileOperation::Metadata => write!(f, "reading metadata"),
            FileOperation::CreateDir => write!(f, "creating directory"),
        }
    }
}

/// Types of validation for error context
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationType {
    Sha256,
    Xxh64,
    Size,
    Presence,
}

impl std::fmt::Display for ValidationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationType::Sha256 => write!(f, "SHA256"),
            ValidationType::Xxh64 => write!(f, "XXH64"),
            ValidationType::Size => write!(f, "file size"),
            ValidationType::Presence => write!(f, "remote presence"),
        }
    }
}

/// Coarse classification used by the retry state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authentication,
    LocationExpired,
    Transport,
    IntegrityMismatch,
    Cancelled,
    /// Non-retryable refusal from the remote side (4xx other than expiry)
    Rejected,
    LocalIo,
}

pub type Result<T> = std::result::Result<T, TransferError>;

impl TransferError {
    /// Check if error is recoverable (should retry)
    pub fn is_recoverable(&self) -> bool {
        match self {
            TransferError::HttpRequest { source, .. } => {
                // Only retry on network-related HTTP errors, not client errors (4xx)
                source.status().map_or(true, |status| status.is_server_error() || status == 429)
            }
            TransferError::HttpStatus { status, .. } => is_retryable_status(*status),
            TransferError::NetworkTimeout { .. } => true,
            TransferError::FileSystem { source, .. } => {
                matches!(source.kind(),
                    std::io::ErrorKind::Interrupted |
                    std::io::ErrorKind::TimedOut |
                    std::io::ErrorKind::WouldBlock
                )
            }
            TransferError::LocationExpired { .. } => true,
            TransferError::IntegrityMismatch { .. } => true,
            TransferError::InvalidDataset { .. } => false,
            TransferError::Validation { .. } => false,
            TransferError::Authentication { .. } => false,
            TransferError::Cancelled { .. } => false,
            TransferError::PermissionDenied { .. } => false,
            TransferError::NotFound { .. } => false,
            TransferError::Api { status, .. } => is_retryable_status(*status),
            TransferError::MetadataPhaseFailed { .. } => false,
            TransferError::Configuration { .. } => false,
            TransferError::InvalidUrl { .. } => false,
            TransferError::Json { .. } => false,
        }
    }

    /// Map onto the engine's error taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::InvalidDataset { .. }
            | TransferError::Validation { .. }
            | TransferError::Configuration { .. }
            | TransferError::MetadataPhaseFailed { .. } => ErrorKind::Validation,
            TransferError::Authentication { .. } => ErrorKind::Authentication,
            TransferError::LocationExpired { .. } => ErrorKind::LocationExpired,
            TransferError::IntegrityMismatch { .. } => ErrorKind::IntegrityMismatch,
            TransferError::Cancelled { .. } => ErrorKind::Cancelled,
            TransferError::FileSystem { .. } | TransferError::PermissionDenied { .. } => {
                if self.is_recoverable() { ErrorKind::Transport } else { ErrorKind::LocalIo }
            }
            TransferError::HttpRequest { .. }
            | TransferError::HttpStatus { .. }
            | TransferError::NetworkTimeout { .. }
            | TransferError::Api { .. } => {
                if self.is_recoverable() { ErrorKind::Transport } else { ErrorKind::Rejected }
            }
            TransferError::NotFound { .. }
            | TransferError::InvalidUrl { .. }
            | TransferError::Json { .. } => ErrorKind::Rejected,
        }
    }

    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            TransferError::InvalidDataset { .. } => "invalid_dataset",
            TransferError::Validation { .. } => "validation",
            TransferError::Authentication { .. } => "authentication",
            TransferError::LocationExpired { .. } => "location_expired",
            TransferError::HttpRequest { .. } => "http_request",
            TransferError::HttpStatus { .. } => "http_status",
            TransferError::NetworkTimeout { .. } => "network_timeout",
            TransferError::IntegrityMismatch { .. } => "integrity_mismatch",
            TransferError::Cancelled { .. } => "cancelled",
            TransferError::FileSystem { .. } => "file_system",
            TransferError::PermissionDenied { .. } => "permission_denied",
            TransferError::NotFound { .. } => "not_found",
            TransferError::Api { .. } => "api",
            TransferError::MetadataPhaseFailed { .. } => "metadata_phase_failed",
            TransferError::Configuration { .. } => "configuration",
            TransferError::InvalidUrl { .. } => "invalid_url",
            TransferError::Json { .. } => "json",
        }
    }

    /// Get severity level for error prioritization
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            TransferError::LocationExpired { .. } => ErrorSeverity::Low,
            TransferError::Cancelled { .. } => ErrorSeverity::Low,
            TransferError::HttpRequest { .. } => ErrorSeverity::Medium,
            TransferError::HttpStatus { .. } => ErrorSeverity::Medium,
            TransferError::NetworkTimeout { .. } => ErrorSeverity::Medium,
            TransferError::Api { .. } => ErrorSeverity::Medium,
            TransferError::NotFound { .. } => ErrorSeverity::Medium,
            TransferError::IntegrityMismatch { .. } => ErrorSeverity::High,
            TransferError::FileSystem { .. } => ErrorSeverity::High,
            TransferError::InvalidDataset { .. } => ErrorSeverity::High,
            TransferError::Validation { .. } => ErrorSeverity::High,
            TransferError::Configuration { .. } => ErrorSeverity::High,
            TransferError::InvalidUrl { .. } => ErrorSeverity::High,
            TransferError::Json { .. } => ErrorSeverity::High,
            TransferError::Authentication { .. } => ErrorSeverity::Critical,
            TransferError::PermissionDenied { .. } => ErrorSeverity::Critical,
            TransferError::MetadataPhaseFailed { .. } => ErrorSeverity::Critical,
        }
    }

    /// Get user-friendly suggestion for resolving the error
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            TransferError::NetworkTimeout { .. } => {
                Some("Check your internet connection or try increasing the timeout value")
            }
            TransferError::Authentication { .. } => Some("Run `login` again to obtain a fresh session"),
            TransferError::InvalidDataset { .. } => {
                Some("A LeRobot dataset needs meta/info.json with total_episodes, total_frames, fps and features")
            }
            TransferError::Validation { .. } => {
                Some("Fix the missing files or disable strict mode to upload a partial dataset")
            }
            TransferError::InvalidUrl { suggestion, .. } => Some(suggestion),
            TransferError::PermissionDenied { suggestion, .. } => Some(suggestion),
            TransferError::Configuration { suggestion, .. } => suggestion.as_deref(),
            _ => None,
        }
    }

    /// Create a detailed error report for debugging
    pub fn detailed_report(&self) -> String {
        let mut report = format!("Error: {}\n", self);
        report.push_str(&format!("Category: {}\n", self.category()));
        report.push_str(&format!("Severity: {:?}\n", self.severity()));
        report.push_str(&format!("Recoverable: {}\n", self.is_recoverable()));

        if let Some(suggestion) = self.suggestion() {
            report.push_str(&format!("Suggestion: {}\n", suggestion));
        }

        if let Some(source) = self.source() {
            report.push_str(&format!("Root cause: {}\n", source));
        }

        report
    }

    /// Wrap an I/O error with the path and operation it happened on
    pub fn io(path: impl Into<PathBuf>, operation: FileOperation, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            TransferError::PermissionDenied {
                suggestion: format!("Check that the current user may access {}", path.display()),
                path,
                operation,
                source,
            }
        } else {
            TransferError::FileSystem { path, operation, source }
        }
    }

    pub fn cancelled(path: Option<&str>) -> Self {
        TransferError::Cancelled {
            reason: "cancellation requested".to_string(),
            path: path.map(str::to_string),
        }
    }
}

/// 408, 429 and 5xx are worth another attempt
pub fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

/// Error severity levels for prioritization
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl From<reqwest::Error> for TransferError {
    fn from(error: reqwest::Error) -> Self {
        let url = error.url().map(|u| u.to_string()).unwrap_or_else(|| "<unknown>".to_string());

        if error.is_timeout() {
            TransferError::NetworkTimeout {
                url,
                duration_secs: 30,
            }
        } else {
            TransferError::HttpRequest {
                url,
                source: error,
            }
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(error: std::io::Error) -> Self {
        TransferError::io("<unknown>", FileOperation::Read, error)
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(error: serde_json::Error) -> Self {
        TransferError::Json {
            context: error.to_string(),
            source: error,
        }
    }
}

impl From<url::ParseError> for TransferError {
    fn from(error: url::ParseError) -> Self {
        let suggestion = match error {
            url::ParseError::EmptyHost => "URL must have a valid hostname",
            url::ParseError::InvalidPort => "Port number must be between 1 and 65535",
            url::ParseError::RelativeUrlWithoutBase => "URL must be absolute (include http:// or https://)",
            _ => "Check URL format and try again",
        }.to_string();

        TransferError::InvalidUrl {
            url: "<unparseable>".to_string(),
            suggestion,
            source: error,
        }
    }
}
