//! Transfer engine
//!
//! This module contains the whole movement of a dataset: the layout
//! scanner, the two-phase coordinator, the bounded worker pool and the
//! aggregator that turns per-unit outcomes into one report.

pub mod aggregator;
pub mod attempt;
pub mod backend;
pub mod config;
pub mod coordinator;
pub mod core;
pub mod manifest;
pub mod pool;
pub mod scanner;

// Re-export main types for convenience
pub use aggregator::{FailedUnit, ReportStatus, ResultAggregator, TransferReport};
pub use attempt::{AttemptRecord, NextStep, RetryPolicy};
pub use backend::{HttpBackend, TransferBackend};
pub use config::{ClientConfig, TransferConfig, TransferConfigBuilder};
pub use coordinator::TransferCoordinator;
pub use core::{
    Checksum, CompositeProgressReporter, ConsoleProgressReporter, Direction, ErrorKind, ErrorSeverity,
    FailureReason, FileOperation, FileValidation, IntegrityVerifier, IntoProgressCallback,
    NullProgressReporter, ProgressCallback, ProgressEvent, ProgressReporter, RemoteLocation, Result,
    TransferError, TransferMetricsSnapshot, TransferOutcome, TransferUnit, UnitOutcome, UnitRole,
    ValidationType,
};
pub use manifest::{DatasetManifest, DeclaredFile, FeatureSpec};
pub use pool::WorkerPool;
pub use scanner::{plan_download, scan_local, ScannedDataset};

#[cfg(test)]
mod tests;
