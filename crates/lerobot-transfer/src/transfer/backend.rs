//! Byte movers behind the worker pool
//!
//! A backend only moves bytes between a negotiated location and the local
//! disk. Negotiation, retries and verification belong to the pool.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};

use crate::transfer::config::TransferConfig;
use crate::transfer::core::http::{DownloadedFile, HttpClient};
use crate::transfer::core::{ProgressCallback, RemoteLocation, Result, TransferUnit};

#[async_trait]
pub trait TransferBackend: Send + Sync {
    /// Send the unit's local file to `location`, returning bytes sent
    async fn upload(
        &self,
        location: &RemoteLocation,
        unit: &TransferUnit,
        progress: Option<ProgressCallback>,
    ) -> Result<u64>;

    /// Fetch `location` into a staging file next to `unit.local_path`
    async fn download(
        &self,
        location: &RemoteLocation,
        unit: &TransferUnit,
        cancel: &CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<DownloadedFile>;
}

/// Streams over HTTP with a timeout scaled to the file size
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: HttpClient,
    config: TransferConfig,
}

impl HttpBackend {
    pub fn new(config: &TransferConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::from_config(config)?,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl TransferBackend for HttpBackend {
    async fn upload(
        &self,
        location: &RemoteLocation,
        unit: &TransferUnit,
        progress: Option<ProgressCallback>,
    ) -> Result<u64> {
        let timeout = self.config.timeout_for_size(unit.size);
        self.http
            .upload_file(location, unit, timeout, progress)
            .instrument(info_span!("upload", path = %unit.relative_path, size = unit.size))
            .await
    }

    async fn download(
        &self,
        location: &RemoteLocation,
        unit: &TransferUnit,
        cancel: &CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<DownloadedFile> {
        let timeout = self.config.timeout_for_size(unit.size);
        self.http
            .download_to_file(
                location,
                &unit.local_path,
                unit.checksum.as_ref(),
                unit.size,
                timeout,
                cancel,
                progress,
            )
            .instrument(info_span!("download", path = %unit.relative_path, size = unit.size))
            .await
    }
}
