//! Dataset-level entry point
//!
//! The call chain flows as follows:
//!
//! User Code
//! ↓
//! DatasetClient (this file)
//! ↓
//! scanner (local layout or remote file list)
//! ↓
//! TransferCoordinator → WorkerPool → TransferBackend
//! ↓
//! IntegrityVerifier / ResultAggregator

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::{ApiClient, CreateDatasetRequest, Dataset, RemoteService};
use crate::transfer::aggregator::TransferReport;
use crate::transfer::backend::{HttpBackend, TransferBackend};
use crate::transfer::config::TransferConfig;
use crate::transfer::coordinator::TransferCoordinator;
use crate::transfer::core::{Direction, FileOperation, ProgressCallback, Result, TransferError, TransferUnit};
use crate::transfer::scanner::{plan_download, scan_local};

/// What to upload and how to describe it
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub path: PathBuf,
    pub name: String,
    pub description: Option<String>,
    pub task_category: Option<String>,
}

impl UploadRequest {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(path: P, name: S) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            description: None,
            task_category: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub dataset: Dataset,
    pub report: TransferReport,
    /// Declared files left out of a non-strict upload
    pub missing: Vec<String>,
    /// Units of this upload, for [`DatasetClient::retry_failed`]
    pub units: Vec<TransferUnit>,
}

/// Uploads and downloads whole datasets
///
/// This is the main entry point for users. It provides:
/// - Upload of a local LeRobot directory as a new dataset record
/// - Download of a stored dataset into a directory
/// - Retry of just the units a previous run reported as failed
pub struct DatasetClient {
    api: ApiClient,
    config: TransferConfig,
    backend: Arc<dyn TransferBackend>,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
}

impl DatasetClient {
    /// Create a client with the default HTTP backend
    pub fn new(api: ApiClient, config: TransferConfig) -> Result<Self> {
        config.validate()?;
        let backend = Arc::new(HttpBackend::new(&config)?);
        Ok(Self {
            api,
            config,
            backend,
            progress: None,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_backend(mut self, backend: Arc<dyn TransferBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    fn coordinator(&self, dataset_id: &str, direction: Direction) -> TransferCoordinator {
        let remote: Arc<dyn RemoteService> = Arc::new(self.api.clone());
        let coordinator = TransferCoordinator::new(remote, self.backend.clone(), self.config.clone(), dataset_id, direction)
            .with_cancellation(self.cancel.clone());
        match self.progress {
            Some(ref progress) => coordinator.with_progress(progress.clone()),
            None => coordinator,
        }
    }

    /// Scan, create the record, transfer every file and finalize
    ///
    /// Nothing touches the network until the local layout has validated.
    pub async fn upload_dataset(&self, request: UploadRequest) -> Result<UploadOutcome> {
        let scanned = scan_local(&request.path, self.config.strict, self.config.compute_checksums).await?;

        let body = CreateDatasetRequest::from_manifest(
            &request.name,
            &scanned.manifest,
            scanned.units.len(),
            scanned.total_bytes,
        )
        .with_description(request.description.clone())
        .with_task_category(request.task_category.clone());

        let created = self.api.create_dataset(&body).await?;
        info!("Created dataset record {} ({})", created.id, created.name);

        let report = self
            .coordinator(&created.id, Direction::Upload)
            .run(scanned.units.clone())
            .await?;

        let dataset = match self.api.get_dataset(&created.id).await {
            Ok(dataset) => dataset,
            Err(e) => {
                warn!("Could not refresh dataset record {}: {}", created.id, e);
                report.dataset.clone().unwrap_or(created)
            }
        };

        Ok(UploadOutcome {
            dataset,
            report,
            missing: scanned.missing,
            units: scanned.units,
        })
    }

    /// Download a stored dataset into `output`, mirroring its relative layout
    pub async fn download_dataset(&self, dataset_id: &str, output: &Path) -> Result<TransferReport> {
        let remote = self.api.get_manifest(dataset_id).await?;
        let units = plan_download(&remote, output)?;

        fs::create_dir_all(output)
            .await
            .map_err(|e| TransferError::io(output, FileOperation::CreateDir, e))?;
        info!("Downloading {} file(s) of dataset {} to {}", units.len(), dataset_id, output.display());

        self.coordinator(dataset_id, Direction::Download).run(units).await
    }

    /// Run only the units `previous` lists as failed
    pub async fn retry_failed(&self, previous: &TransferReport, units: &[TransferUnit]) -> Result<TransferReport> {
        let retry = previous.select_retry_units(units);
        if retry.is_empty() {
            return Err(TransferError::Validation {
                message: "the previous report lists no failed units to retry".to_string(),
                path: None,
            });
        }

        info!("Retrying {} failed unit(s) of dataset {}", retry.len(), previous.dataset_id);
        self.coordinator(&previous.dataset_id, previous.direction).run(retry).await
    }
}
