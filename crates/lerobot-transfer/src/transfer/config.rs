//! Configuration types for the transfer engine and the API client

use std::path::PathBuf;
use std::time::Duration;

use crate::transfer::attempt::RetryPolicy;
use crate::transfer::core::{Result, TransferError};

pub const DEFAULT_API_URL: &str = "https://api.dextero.co/api/v1";
pub const API_URL_ENV: &str = "LEROBOT_HUB_API_URL";
pub const CREDENTIALS_ENV: &str = "LEROBOT_HUB_CREDENTIALS";

/// Configuration for dataset transfer operations
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Number of concurrent workers in the bulk phase
    pub max_workers: usize,
    /// Number of concurrent workers for metadata and stats files
    pub metadata_workers: usize,
    /// Transient failures tolerated per unit before giving up on it
    pub max_attempts: u32,
    /// Initial delay between retries (doubles each retry)
    pub retry_delay: Duration,
    /// Maximum retry delay cap
    pub max_retry_delay: Duration,
    /// Randomise backoff by up to 25% in either direction
    pub jitter: bool,
    pub timeout: Duration,
    /// Timeout specifically for large files
    pub large_file_timeout: Duration,
    /// File size threshold (bytes) to use large file timeout
    pub large_file_threshold: u64,
    pub connect_timeout: Duration,
    pub user_agent: String,
    /// Missing declared files are fatal when set
    pub strict: bool,
    /// Skip the finalize call if any bulk unit failed, even in non-strict mode
    pub all_or_nothing: bool,
    /// Ask the service for size/checksum of each uploaded file
    pub verify_uploads: bool,
    /// Keep already downloaded files that still match their expected content
    pub skip_existing: bool,
    /// Give a unit one more round of attempts at the back of the queue
    pub requeue_on_exhaustion: bool,
    /// Full re-transfers allowed after an integrity mismatch
    pub integrity_retries: u32,
    pub max_renegotiations: u32,
    /// Locations with less lifetime left than this are renegotiated before use
    pub expiry_margin: Duration,
    /// Hash every file while scanning for upload
    pub compute_checksums: bool,
}

impl TransferConfig {
    pub fn builder() -> TransferConfigBuilder {
        TransferConfigBuilder::default()
    }

    /// Get appropriate timeout based on expected file size
    pub fn timeout_for_size(&self, expected_size: u64) -> Duration {
        if self.is_large_file(expected_size) {
            self.large_file_timeout
        } else {
            self.timeout
        }
    }

    /// Check if a file size qualifies as a large file
    pub fn is_large_file(&self, size: u64) -> bool {
        size >= self.large_file_threshold
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.retry_delay,
            max_delay: self.max_retry_delay,
            jitter: self.jitter,
            max_renegotiations: self.max_renegotiations,
            integrity_retries: self.integrity_retries,
            requeue_on_exhaustion: self.requeue_on_exhaustion,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(TransferError::Configuration {
                message: "max_workers must be at least 1".to_string(),
                field: Some("max_workers".to_string()),
                suggestion: Some("Use the default of 4 workers".to_string()),
            });
        }
        if self.metadata_workers == 0 {
            return Err(TransferError::Configuration {
                message: "metadata_workers must be at least 1".to_string(),
                field: Some("metadata_workers".to_string()),
                suggestion: None,
            });
        }
        if self.max_attempts == 0 {
            return Err(TransferError::Configuration {
                message: "max_attempts must be at least 1".to_string(),
                field: Some("max_attempts".to_string()),
                suggestion: None,
            });
        }
        Ok(())
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            metadata_workers: 1,
            max_attempts: 3,
            retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(30),
            jitter: true,
            timeout: Duration::from_secs(30),
            large_file_timeout: Duration::from_secs(600), // 10 minutes for large files
            large_file_threshold: 100_000_000, // 100MB
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("lerobot-transfer/", env!("CARGO_PKG_VERSION")).to_string(),
            strict: true,
            all_or_nothing: false,
            verify_uploads: true,
            skip_existing: true,
            requeue_on_exhaustion: true,
            integrity_retries: 1,
            max_renegotiations: 3,
            expiry_margin: Duration::from_secs(2),
            compute_checksums: false,
        }
    }
}

/// Builder for [`TransferConfig`]
#[derive(Debug, Clone, Default)]
pub struct TransferConfigBuilder {
    config: TransferConfig,
}

impl TransferConfigBuilder {
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.config.max_workers = workers;
        self
    }

    pub fn with_metadata_workers(mut self, workers: usize) -> Self {
        self.config.metadata_workers = workers;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration, max_delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self.config.max_retry_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.config.jitter = jitter;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.config.strict = strict;
        self
    }

    pub fn with_all_or_nothing(mut self, all_or_nothing: bool) -> Self {
        self.config.all_or_nothing = all_or_nothing;
        self
    }

    pub fn with_verify_uploads(mut self, verify: bool) -> Self {
        self.config.verify_uploads = verify;
        self
    }

    pub fn with_skip_existing(mut self, skip: bool) -> Self {
        self.config.skip_existing = skip;
        self
    }

    pub fn with_requeue_on_exhaustion(mut self, requeue: bool) -> Self {
        self.config.requeue_on_exhaustion = requeue;
        self
    }

    pub fn with_expiry_margin(mut self, margin: Duration) -> Self {
        self.config.expiry_margin = margin;
        self
    }

    pub fn with_compute_checksums(mut self, compute: bool) -> Self {
        self.config.compute_checksums = compute;
        self
    }

    pub fn with_user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> Result<TransferConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Settings for talking to the dataset service
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub timeout: Duration,
    pub user_agent: String,
    pub credentials_path: Option<PathBuf>,
}

impl ClientConfig {
    pub fn new<S: Into<String>>(api_url: S) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    /// Build from the environment, loading `.env` if present
    pub fn from_env() -> Self {
        dotenv::dotenv().ok(); // Ignore error if .env not present

        let mut config = Self::default();
        if let Ok(url) = std::env::var(API_URL_ENV) {
            config.api_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(path) = std::env::var(CREDENTIALS_ENV) {
            config.credentials_path = Some(PathBuf::from(path));
        }
        config
    }

    pub fn with_api_url<S: Into<String>>(mut self, api_url: S) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(30),
            user_agent: concat!("lerobot-transfer/", env!("CARGO_PKG_VERSION")).to_string(),
            credentials_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let config = TransferConfig::builder()
            .with_retry_delay(Duration::from_millis(100), Duration::from_millis(350))
            .build()
            .unwrap();
        let policy = RetryPolicy { jitter: false, ..config.retry_policy() };

        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn test_timeout_for_size() {
        let config = TransferConfig::default();
        assert_eq!(config.timeout_for_size(1_000), config.timeout);
        assert_eq!(config.timeout_for_size(200_000_000), config.large_file_timeout);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = TransferConfig::builder().with_max_workers(0).build().unwrap_err();
        assert!(matches!(err, TransferError::Configuration { .. }));
    }

    #[test]
    fn test_client_config_trims_slash() {
        let config = ClientConfig::new("http://localhost:5001/api/v1/");
        assert_eq!(config.api_url, "http://localhost:5001/api/v1");
    }
}
