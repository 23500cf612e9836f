//! LeRobot dataset transfer library
//!
//! This library moves LeRobot-format robot learning datasets between a local
//! directory and a dataset service. It validates the local layout, negotiates
//! a single-use storage location per file, moves files through a bounded
//! worker pool and reports a complete, partial or failed outcome.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use lerobot_transfer::{
//!     ApiClient, ClientConfig, DatasetClient, ProgressEvent, StaticToken,
//!     TransferConfig, UploadRequest,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> lerobot_transfer::Result<()> {
//! let api = ApiClient::new(&ClientConfig::from_env())?
//!     .with_credentials(Arc::new(StaticToken::new("my-access-token")));
//!
//! let config = TransferConfig::builder()
//!     .with_max_workers(8)
//!     .with_strict(true)
//!     .build()?;
//!
//! let client = DatasetClient::new(api, config)?.with_progress(Arc::new(|event: ProgressEvent| {
//!     if let ProgressEvent::UnitCompleted { path, bytes } = event {
//!         println!("{} ({} bytes)", path, bytes);
//!     }
//! }));
//!
//! let outcome = client
//!     .upload_dataset(UploadRequest::new("./pick_place", "pick-place-v1"))
//!     .await?;
//! println!("{}: {}", outcome.dataset.id, outcome.report.status);
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Two phases**: metadata and stats first, bulk data only once they landed
//! - **Bounded concurrency**: a fixed pool of workers over a FIFO queue
//! - **Retry logic**: exponential backoff with jitter and one requeue per unit
//! - **Expiring locations**: renegotiated transparently without a new attempt
//! - **Integrity checks**: size plus SHA-256 or xxHash64 on every download
//! - **Cancellation**: unfinished units are reported, partial files removed

pub mod api;
pub mod auth;
pub mod client;
pub mod transfer;

// Re-export commonly used types for convenience
pub use api::{ApiClient, Dataset, DatasetStatus, RemoteService};
pub use auth::{AuthSession, CredentialProvider, CredentialStore, StaticToken};
pub use client::{DatasetClient, UploadOutcome, UploadRequest};
pub use transfer::{
    ClientConfig, Direction, ProgressCallback, ProgressEvent, ReportStatus, Result, TransferConfig,
    TransferError, TransferReport, TransferUnit, UnitRole,
};
