//! Two-phase transfer coordination
//!
//! Phase 1 moves metadata and stats with minimal concurrency and must fully
//! succeed. Phase 2 moves data chunks and videos through the full pool and
//! tolerates partial failure. Uploads end with one finalize call when the
//! configured policy allows it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::RemoteService;
use crate::transfer::aggregator::{ResultAggregator, TransferReport};
use crate::transfer::backend::TransferBackend;
use crate::transfer::config::TransferConfig;
use crate::transfer::core::{
    Direction, FailureReason, IntegrityVerifier, ProgressCallback, ProgressEvent, Result, TransferError,
    TransferMetrics, TransferOutcome, TransferUnit,
};
use crate::transfer::pool::{PoolContext, WorkerPool};

pub struct TransferCoordinator {
    remote: Arc<dyn RemoteService>,
    backend: Arc<dyn TransferBackend>,
    config: TransferConfig,
    dataset_id: String,
    direction: Direction,
    cancel: CancellationToken,
    progress: Option<ProgressCallback>,
}

impl TransferCoordinator {
    pub fn new<S: Into<String>>(
        remote: Arc<dyn RemoteService>,
        backend: Arc<dyn TransferBackend>,
        config: TransferConfig,
        dataset_id: S,
        direction: Direction,
    ) -> Self {
        Self {
            remote,
            backend,
            config,
            dataset_id: dataset_id.into(),
            direction,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(ref callback) = self.progress {
            callback(event);
        }
    }

    /// Transfer every unit and return the dataset-level report
    ///
    /// Errors are reserved for problems that make the whole operation
    /// meaningless: invalid input, authentication, and a failed metadata
    /// phase. Everything else is reported per unit.
    pub async fn run(&self, units: Vec<TransferUnit>) -> Result<TransferReport> {
        self.config.validate()?;
        validate_units(&units)?;

        let started = Instant::now();
        let metrics = Arc::new(TransferMetrics::default());
        let ctx = Arc::new(PoolContext {
            remote: self.remote.clone(),
            backend: self.backend.clone(),
            verifier: IntegrityVerifier::new(self.progress.clone()),
            config: self.config.clone(),
            policy: self.config.retry_policy(),
            dataset_id: self.dataset_id.clone(),
            direction: self.direction,
            metrics: metrics.clone(),
            progress: self.progress.clone(),
            cancel: self.cancel.clone(),
        });

        let mut aggregator = ResultAggregator::new(self.direction, &units);
        let (phase_one, bulk): (Vec<_>, Vec<_>) = units.into_iter().partition(|u| u.role.is_phase_one());

        info!(
            "Starting {} of dataset {}: {} metadata unit(s), {} bulk unit(s)",
            self.direction,
            self.dataset_id,
            phase_one.len(),
            bulk.len()
        );

        self.emit(ProgressEvent::PhaseStarted { phase: 1, direction: self.direction, units: phase_one.len() });
        self.run_phase(&ctx, &mut aggregator, self.config.metadata_workers, phase_one).await?;

        if aggregator.phase_one_failed() {
            let cancelled = self.cancel.is_cancelled();
            aggregator.settle_remaining(if cancelled {
                TransferOutcome::Failed { reason: FailureReason::Cancelled, attempts: 0 }
            } else {
                TransferOutcome::Skipped { reason: "metadata phase failed".to_string() }
            });
            let report = aggregator.finish(&self.dataset_id, started.elapsed(), cancelled, metrics.snapshot());

            if cancelled {
                info!("Transfer cancelled during the metadata phase");
                return Ok(report);
            }
            error!("Metadata phase failed for dataset {}: {:?}", self.dataset_id, report.retry_paths());
            return Err(TransferError::MetadataPhaseFailed { report: Box::new(report) });
        }

        self.emit(ProgressEvent::PhaseStarted { phase: 2, direction: self.direction, units: bulk.len() });
        self.run_phase(&ctx, &mut aggregator, self.config.max_workers, bulk).await?;

        let cancelled = self.cancel.is_cancelled();
        let mut report = aggregator.finish(&self.dataset_id, started.elapsed(), cancelled, metrics.snapshot());

        if self.direction == Direction::Upload && !cancelled {
            self.finalize(&mut report).await?;
        }

        info!(
            "{} of dataset {} {}: {}/{} succeeded, {} skipped, {} failed, {} bytes in {} ms",
            self.direction,
            self.dataset_id,
            report.status,
            report.succeeded,
            report.total_units,
            report.skipped,
            report.failed.len(),
            report.bytes_transferred,
            report.elapsed_ms
        );
        Ok(report)
    }

    async fn run_phase(
        &self,
        ctx: &Arc<PoolContext>,
        aggregator: &mut ResultAggregator,
        workers: usize,
        units: Vec<TransferUnit>,
    ) -> Result<()> {
        if units.is_empty() {
            return Ok(());
        }

        let (sender, receiver) = mpsc::channel(units.len());
        let (result, ()) = tokio::join!(
            WorkerPool::run(ctx.clone(), workers, units, sender),
            aggregator.collect(receiver)
        );
        result
    }

    async fn finalize(&self, report: &mut TransferReport) -> Result<()> {
        let has_failures = !report.failed.is_empty();
        let allowed = !has_failures || (!self.config.strict && !self.config.all_or_nothing);
        if !allowed {
            warn!(
                "Not finalizing dataset {}: {} unit(s) failed",
                self.dataset_id,
                report.failed.len()
            );
            return Ok(());
        }

        match self.remote.finalize(&self.dataset_id).await {
            Ok(dataset) => {
                info!("Finalized dataset {}", self.dataset_id);
                report.finalized = true;
                report.dataset = Some(dataset);
                Ok(())
            }
            Err(e @ TransferError::Authentication { .. }) => Err(e),
            Err(e) => {
                warn!("Finalize failed for dataset {}: {}", self.dataset_id, e);
                report.finalize_error = Some(e.to_string());
                Ok(())
            }
        }
    }
}

/// Reject empty input, duplicate paths and shared local files before any network call
fn validate_units(units: &[TransferUnit]) -> Result<()> {
    if units.is_empty() {
        return Err(TransferError::Validation {
            message: "no files to transfer".to_string(),
            path: None,
        });
    }

    let mut seen = HashSet::with_capacity(units.len());
    let mut local_paths = HashSet::with_capacity(units.len());
    for unit in units {
        if !seen.insert(unit.relative_path.as_str()) {
            return Err(TransferError::Validation {
                message: format!("duplicate transfer unit '{}'", unit.relative_path),
                path: Some(unit.relative_path.clone()),
            });
        }
        if !local_paths.insert(unit.local_path.as_path()) {
            return Err(TransferError::Validation {
                message: format!(
                    "transfer unit '{}' shares its local file {} with another unit",
                    unit.relative_path,
                    unit.local_path.display()
                ),
                path: Some(unit.relative_path.clone()),
            });
        }
    }
    Ok(())
}
