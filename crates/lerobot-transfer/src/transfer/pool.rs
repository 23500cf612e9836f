//! Bounded worker pool
//!
//! `N` tokio tasks share one FIFO queue. Each task pops a unit, drives it
//! through negotiate → transfer → verify under its [`AttemptRecord`], and
//! sends exactly one terminal outcome to the aggregator. The queue lock is
//! never held across an `.await`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn, Instrument};

use crate::api::RemoteService;
use crate::transfer::attempt::{AttemptRecord, NextStep, RetryPolicy};
use crate::transfer::backend::TransferBackend;
use crate::transfer::config::TransferConfig;
use crate::transfer::core::files::check_existing_file;
use crate::transfer::core::{
    Direction, FailureReason, IntegrityVerifier, ProgressCallback, ProgressEvent, RemoteLocation, Result,
    TransferError, TransferMetrics, TransferOutcome, TransferUnit, UnitOutcome,
};

/// Everything a worker needs, shared read-only between workers
pub struct PoolContext {
    pub remote: Arc<dyn RemoteService>,
    pub backend: Arc<dyn TransferBackend>,
    pub verifier: IntegrityVerifier,
    pub config: TransferConfig,
    pub policy: RetryPolicy,
    pub dataset_id: String,
    pub direction: Direction,
    pub metrics: Arc<TransferMetrics>,
    pub progress: Option<ProgressCallback>,
    pub cancel: CancellationToken,
}

impl PoolContext {
    fn emit(&self, event: ProgressEvent) {
        if let Some(ref callback) = self.progress {
            callback(event);
        }
    }
}

#[derive(Debug)]
struct WorkItem {
    unit: TransferUnit,
    record: AttemptRecord,
}

type WorkQueue = Arc<Mutex<VecDeque<WorkItem>>>;

fn lock(queue: &WorkQueue) -> MutexGuard<'_, VecDeque<WorkItem>> {
    queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum Step {
    Done(TransferOutcome),
    Requeue,
    Fatal(TransferError, TransferOutcome),
}

pub struct WorkerPool;

impl WorkerPool {
    /// Run `units` through `workers` concurrent tasks
    ///
    /// Returns once every unit has produced an outcome on `sink`. The only
    /// error is a fatal one (authentication) that stopped the whole pool;
    /// units it prevented from running are reported as cancelled.
    pub async fn run(
        ctx: Arc<PoolContext>,
        workers: usize,
        units: Vec<TransferUnit>,
        sink: mpsc::Sender<UnitOutcome>,
    ) -> Result<()> {
        if units.is_empty() {
            return Ok(());
        }

        let workers = workers.clamp(1, units.len());
        let queue: WorkQueue = Arc::new(Mutex::new(
            units
                .into_iter()
                .map(|unit| WorkItem { unit, record: AttemptRecord::new() })
                .collect(),
        ));
        let abort = ctx.cancel.child_token();
        let fatal: Arc<Mutex<Option<TransferError>>> = Arc::new(Mutex::new(None));

        debug!("Starting {} worker(s)", workers);
        let mut tasks = JoinSet::new();
        for id in 0..workers {
            let worker = worker_loop(ctx.clone(), queue.clone(), sink.clone(), abort.clone(), fatal.clone());
            tasks.spawn(worker.instrument(info_span!("worker", id)));
        }
        drop(sink);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Worker task failed: {}", e);
            }
        }

        let fatal = fatal.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        match fatal {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn worker_loop(
    ctx: Arc<PoolContext>,
    queue: WorkQueue,
    sink: mpsc::Sender<UnitOutcome>,
    abort: CancellationToken,
    fatal: Arc<Mutex<Option<TransferError>>>,
) {
    loop {
        let next = lock(&queue).pop_front();
        let Some(mut item) = next else { break };

        if abort.is_cancelled() {
            let attempts = item.record.attempts;
            send(&ctx, &sink, item.unit, TransferOutcome::Failed { reason: FailureReason::Cancelled, attempts }).await;
            continue;
        }

        match process(&ctx, &mut item, &abort).await {
            Step::Done(outcome) => send(&ctx, &sink, item.unit, outcome).await,
            Step::Requeue => {
                ctx.metrics.record_requeue();
                lock(&queue).push_back(item);
            }
            Step::Fatal(err, outcome) => {
                error!("Stopping transfer: {}", err);
                {
                    let mut slot = fatal.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    if slot.is_none() {
                        *slot = Some(err);
                    }
                }
                abort.cancel();
                send(&ctx, &sink, item.unit, outcome).await;
            }
        }
    }
}

async fn send(ctx: &PoolContext, sink: &mpsc::Sender<UnitOutcome>, unit: TransferUnit, outcome: TransferOutcome) {
    let path = unit.relative_path.clone();
    match &outcome {
        TransferOutcome::Succeeded { bytes, attempts } => {
            debug!("Completed {} ({} bytes, {} attempt(s))", path, bytes, attempts);
            ctx.metrics.record_unit_succeeded(*bytes);
            ctx.emit(ProgressEvent::UnitCompleted { path, bytes: *bytes });
        }
        TransferOutcome::Failed { reason, attempts } => {
            warn!("Failed {} after {} attempt(s): {}", path, attempts, reason);
            ctx.metrics.record_unit_failed();
            ctx.emit(ProgressEvent::UnitFailed { path, reason: reason.to_string() });
        }
        TransferOutcome::Skipped { reason } => {
            debug!("Skipped {}: {}", path, reason);
            ctx.metrics.record_unit_skipped();
            ctx.emit(ProgressEvent::UnitSkipped { path, reason: reason.clone() });
        }
    }

    if sink.send(UnitOutcome { unit, outcome }).await.is_err() {
        debug!("Outcome receiver dropped");
    }
}

async fn process(ctx: &PoolContext, item: &mut WorkItem, abort: &CancellationToken) -> Step {
    let unit = &item.unit;
    let record = &mut item.record;

    if ctx.direction == Direction::Download && ctx.config.skip_existing && record.attempts == 0 {
        match check_existing_file(&unit.local_path, &unit.validation(), &unit.relative_path).await {
            Ok(true) => {
                return Step::Done(TransferOutcome::Skipped { reason: "already present".to_string() });
            }
            Ok(false) => {}
            Err(e) => {
                return Step::Done(TransferOutcome::Failed { reason: FailureReason::from_error(&e), attempts: 0 });
            }
        }
    }

    let mut renegotiating = false;
    loop {
        if abort.is_cancelled() {
            return Step::Done(TransferOutcome::Failed { reason: FailureReason::Cancelled, attempts: record.attempts });
        }

        // A renegotiation continues the same attempt
        if !renegotiating {
            if record.begin_attempt() == 1 {
                ctx.metrics.record_unit_started();
            }
            ctx.emit(ProgressEvent::UnitStarted {
                path: unit.relative_path.clone(),
                role: unit.role,
                attempt: record.attempts,
                size: unit.size,
            });
        }
        renegotiating = false;

        let result = {
            let _in_flight = ctx.metrics.in_flight.enter();
            attempt_once(ctx, unit, abort).await
        };

        let err = match result {
            Ok(bytes) => return Step::Done(TransferOutcome::Succeeded { bytes, attempts: record.attempts }),
            Err(err) => err,
        };

        match record.on_error(&err, &ctx.policy) {
            NextStep::Retry { delay } => {
                ctx.metrics.record_retry();
                warn!(
                    "Attempt {} for {} failed ({}), retrying in {:?}",
                    record.attempts, unit.relative_path, err, delay
                );
                ctx.emit(ProgressEvent::RetryAttempt {
                    path: unit.relative_path.clone(),
                    attempt: record.attempts + 1,
                    max_attempts: ctx.policy.max_attempts,
                    delay,
                });
                tokio::select! {
                    _ = abort.cancelled() => {
                        return Step::Done(TransferOutcome::Failed {
                            reason: FailureReason::Cancelled,
                            attempts: record.attempts,
                        });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            NextStep::Renegotiate => {
                ctx.metrics.record_renegotiation();
                warn!("Location for {} expired, negotiating a new one", unit.relative_path);
                ctx.emit(ProgressEvent::LocationRenegotiated { path: unit.relative_path.clone() });
                renegotiating = true;
            }
            NextStep::Retransfer => {
                ctx.metrics.record_integrity_failure();
                warn!("{}; transferring {} again", err, unit.relative_path);
            }
            NextStep::Requeue => {
                warn!("Retries exhausted for {}, moving it to the back of the queue", unit.relative_path);
                return Step::Requeue;
            }
            NextStep::Abort => {
                let outcome = TransferOutcome::Failed {
                    reason: FailureReason::from_error(&err),
                    attempts: record.attempts,
                };
                return Step::Fatal(err, outcome);
            }
            NextStep::Fail(reason) => {
                if matches!(reason, FailureReason::IntegrityMismatch(_)) {
                    ctx.metrics.record_integrity_failure();
                }
                return Step::Done(TransferOutcome::Failed { reason, attempts: record.attempts });
            }
        }
    }
}

fn ensure_fresh(ctx: &PoolContext, location: &RemoteLocation, unit: &TransferUnit) -> Result<()> {
    if location.is_expired(ctx.config.expiry_margin) {
        return Err(TransferError::LocationExpired { path: unit.relative_path.clone() });
    }
    Ok(())
}

/// Negotiate a fresh location, move the bytes and verify them
async fn attempt_once(ctx: &PoolContext, unit: &TransferUnit, abort: &CancellationToken) -> Result<u64> {
    match ctx.direction {
        Direction::Upload => {
            let location = ctx.remote.negotiate_upload(&ctx.dataset_id, unit).await?;
            ensure_fresh(ctx, &location, unit)?;
            let bytes = ctx.backend.upload(&location, unit, ctx.progress.clone()).await?;
            if ctx.config.verify_uploads {
                ctx.verifier
                    .verify_upload(ctx.remote.as_ref(), &ctx.dataset_id, unit)
                    .await?;
            }
            Ok(bytes)
        }
        Direction::Download => {
            let location = ctx.remote.negotiate_download(&ctx.dataset_id, &unit.relative_path).await?;
            ensure_fresh(ctx, &location, unit)?;
            let file = ctx.backend.download(&location, unit, abort, ctx.progress.clone()).await?;
            let bytes = file.bytes;
            ctx.verifier.verify_download(unit, file).await?;
            Ok(bytes)
        }
    }
}
