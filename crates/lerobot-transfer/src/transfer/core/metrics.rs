//! Performance metrics for dataset transfers
//!
//! Atomic counters updated concurrently by every worker, plus an
//! in-flight gauge that records the peak number of simultaneous transfers.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Counters for one transfer operation
///
/// Updated with relaxed atomics from all workers; read through `snapshot`.
#[derive(Debug, Default)]
pub struct TransferMetrics {
    pub units_started: AtomicU64,
    pub units_succeeded: AtomicU64,
    pub units_failed: AtomicU64,
    pub units_skipped: AtomicU64,
    pub total_bytes: AtomicU64,
    pub retries_attempted: AtomicU64,
    pub renegotiations: AtomicU64,
    pub integrity_failures: AtomicU64,
    pub requeues: AtomicU64,
    pub in_flight: InFlightGauge,
}

impl TransferMetrics {
    pub fn record_unit_started(&self) {
        self.units_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unit_succeeded(&self, bytes: u64) {
        self.units_succeeded.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_unit_failed(&self) {
        self.units_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unit_skipped(&self) {
        self.units_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_renegotiation(&self) {
        self.renegotiations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_integrity_failure(&self) {
        self.integrity_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_requeue(&self) {
        self.requeues.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> TransferMetricsSnapshot {
        TransferMetricsSnapshot {
            units_started: self.units_started.load(Ordering::Relaxed),
            units_succeeded: self.units_succeeded.load(Ordering::Relaxed),
            units_failed: self.units_failed.load(Ordering::Relaxed),
            units_skipped: self.units_skipped.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            retries_attempted: self.retries_attempted.load(Ordering::Relaxed),
            renegotiations: self.renegotiations.load(Ordering::Relaxed),
            integrity_failures: self.integrity_failures.load(Ordering::Relaxed),
            requeues: self.requeues.load(Ordering::Relaxed),
            peak_in_flight: self.in_flight.peak(),
        }
    }
}

/// Current and peak count of units being transferred right now
#[derive(Debug, Default)]
pub struct InFlightGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlightGauge {
    /// Mark one more unit in flight; the guard decrements on drop
    pub fn enter(&self) -> InFlightGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard { gauge: self }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct InFlightGuard<'a> {
    gauge: &'a InFlightGauge,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Immutable snapshot of transfer metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransferMetricsSnapshot {
    pub units_started: u64,
    pub units_succeeded: u64,
    pub units_failed: u64,
    pub units_skipped: u64,
    pub total_bytes: u64,
    pub retries_attempted: u64,
    pub renegotiations: u64,
    pub integrity_failures: u64,
    pub requeues: u64,
    pub peak_in_flight: usize,
}

impl TransferMetricsSnapshot {
    /// Success rate over units that reached a terminal state (0.0 to 1.0)
    pub fn success_rate(&self) -> f64 {
        let finished = self.units_succeeded + self.units_failed;
        if finished == 0 {
            0.0
        } else {
            self.units_succeeded as f64 / finished as f64
        }
    }

    pub fn throughput_bps(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total_bytes as f64 / secs
        } else {
            0.0
        }
    }
}
