//! Dataset-level result aggregation
//!
//! Workers never touch the report directly. They send [`UnitOutcome`]s over
//! a channel and the single [`ResultAggregator`] that owns the state folds
//! them in, rejecting duplicates and units it was never told about.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::Dataset;
use crate::transfer::core::{
    Direction, FailureReason, TransferMetricsSnapshot, TransferOutcome, TransferUnit, UnitOutcome, UnitRole,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Complete,
    Partial,
    Failed,
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportStatus::Complete => write!(f, "complete"),
            ReportStatus::Partial => write!(f, "partial"),
            ReportStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedUnit {
    pub path: String,
    pub role: UnitRole,
    pub reason: FailureReason,
    pub attempts: u32,
}

/// Final result of one dataset operation
#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub direction: Direction,
    pub dataset_id: String,
    pub status: ReportStatus,
    pub total_units: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: Vec<FailedUnit>,
    /// Terminal outcome of every unit, keyed by relative path
    pub outcomes: BTreeMap<String, TransferOutcome>,
    pub bytes_transferred: u64,
    pub elapsed_ms: u64,
    pub cancelled: bool,
    pub finalized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalize_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<Dataset>,
    pub metrics: TransferMetricsSnapshot,
}

impl TransferReport {
    pub fn is_complete(&self) -> bool {
        self.status == ReportStatus::Complete
    }

    /// Relative paths worth another attempt, in report order
    pub fn retry_paths(&self) -> Vec<String> {
        self.failed.iter().map(|f| f.path.clone()).collect()
    }

    /// Attempts spent on `path`, if it reached a succeeded or failed state
    pub fn attempts(&self, path: &str) -> Option<u32> {
        match self.outcomes.get(path)? {
            TransferOutcome::Succeeded { attempts, .. } | TransferOutcome::Failed { attempts, .. } => Some(*attempts),
            TransferOutcome::Skipped { .. } => None,
        }
    }

    /// The subset of `units` this report lists as failed
    pub fn select_retry_units(&self, units: &[TransferUnit]) -> Vec<TransferUnit> {
        units
            .iter()
            .filter(|unit| self.failed.iter().any(|f| f.path == unit.relative_path))
            .cloned()
            .collect()
    }
}

/// Owns per-unit outcomes for one operation
#[derive(Debug)]
pub struct ResultAggregator {
    direction: Direction,
    roles: BTreeMap<String, UnitRole>,
    outcomes: BTreeMap<String, TransferOutcome>,
}

impl ResultAggregator {
    pub fn new(direction: Direction, units: &[TransferUnit]) -> Self {
        Self {
            direction,
            roles: units.iter().map(|u| (u.relative_path.clone(), u.role)).collect(),
            outcomes: BTreeMap::new(),
        }
    }

    /// Fold in one outcome; `false` if it was a duplicate or unknown unit
    pub fn record(&mut self, outcome: UnitOutcome) -> bool {
        let path = outcome.unit.relative_path;
        if !self.roles.contains_key(&path) {
            warn!("Ignoring outcome for unknown unit {}", path);
            return false;
        }
        if self.outcomes.contains_key(&path) {
            warn!("Ignoring duplicate outcome for {}", path);
            return false;
        }
        debug!("Outcome for {}: {:?}", path, outcome.outcome);
        self.outcomes.insert(path, outcome.outcome);
        true
    }

    /// Drain the channel until every sender is dropped
    pub async fn collect(&mut self, mut receiver: mpsc::Receiver<UnitOutcome>) {
        while let Some(outcome) = receiver.recv().await {
            self.record(outcome);
        }
    }

    pub fn is_recorded(&self, path: &str) -> bool {
        self.outcomes.contains_key(path)
    }

    pub fn phase_one_failed(&self) -> bool {
        self.outcomes.iter().any(|(path, outcome)| {
            matches!(outcome, TransferOutcome::Failed { .. })
                && self.roles.get(path).is_some_and(|role| role.is_phase_one())
        })
    }

    /// Give every unit without an outcome the same terminal outcome
    pub fn settle_remaining(&mut self, outcome: TransferOutcome) {
        let pending: Vec<String> = self
            .roles
            .keys()
            .filter(|path| !self.outcomes.contains_key(*path))
            .cloned()
            .collect();
        for path in pending {
            self.outcomes.insert(path, outcome.clone());
        }
    }

    /// Build the report; units still without an outcome count as cancelled
    pub fn finish(
        mut self,
        dataset_id: &str,
        elapsed: Duration,
        cancelled: bool,
        metrics: TransferMetricsSnapshot,
    ) -> TransferReport {
        self.settle_remaining(TransferOutcome::Failed {
            reason: FailureReason::Cancelled,
            attempts: 0,
        });

        let mut succeeded = 0;
        let mut skipped = 0;
        let mut bytes_transferred = 0;
        let mut failed = Vec::new();
        let mut phase_one_failed = false;

        for (path, outcome) in &self.outcomes {
            let role = self.roles.get(path).copied().unwrap_or(UnitRole::DataChunk);
            match outcome {
                TransferOutcome::Succeeded { bytes, .. } => {
                    succeeded += 1;
                    bytes_transferred += bytes;
                }
                TransferOutcome::Skipped { .. } => skipped += 1,
                TransferOutcome::Failed { reason, attempts } => {
                    phase_one_failed |= role.is_phase_one();
                    failed.push(FailedUnit {
                        path: path.clone(),
                        role,
                        reason: reason.clone(),
                        attempts: *attempts,
                    });
                }
            }
        }

        let status = if phase_one_failed {
            ReportStatus::Failed
        } else if !failed.is_empty() {
            ReportStatus::Partial
        } else {
            ReportStatus::Complete
        };

        TransferReport {
            direction: self.direction,
            dataset_id: dataset_id.to_string(),
            status,
            total_units: self.roles.len(),
            succeeded,
            skipped,
            failed,
            outcomes: self.outcomes,
            bytes_transferred,
            elapsed_ms: elapsed.as_millis() as u64,
            cancelled,
            finalized: false,
            finalize_error: None,
            dataset: None,
            metrics,
        }
    }
}
