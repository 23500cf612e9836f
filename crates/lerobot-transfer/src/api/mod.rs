//! Dataset service API
//!
//! The transfer engine only needs the four calls on [`RemoteService`] plus a
//! way to confirm an uploaded file. Everything else on [`ApiClient`] is plain
//! request/response glue for account and dataset record management.

pub mod client;
pub mod models;

pub use client::ApiClient;
pub use models::{
    AuthTokens, CreateDatasetRequest, Dataset, DatasetStatus, Organization, PermissionLevel,
    RemoteDataset, RemoteFile, User,
};

use async_trait::async_trait;

use crate::transfer::core::{RemoteLocation, Result, TransferUnit};

/// Calls the transfer engine makes against the remote service
///
/// Implementations obtain credentials themselves before every request and
/// surface [`TransferError::Authentication`](crate::TransferError::Authentication)
/// when they cannot.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Negotiate a single-use location for uploading one unit
    async fn negotiate_upload(&self, dataset_id: &str, unit: &TransferUnit) -> Result<RemoteLocation>;

    /// Negotiate a single-use location for downloading one file
    async fn negotiate_download(&self, dataset_id: &str, relative_path: &str) -> Result<RemoteLocation>;

    /// Mark an uploaded dataset as complete
    async fn finalize(&self, dataset_id: &str) -> Result<Dataset>;

    /// Manifest and file list of a stored dataset
    async fn get_manifest(&self, dataset_id: &str) -> Result<RemoteDataset>;

    /// What the service currently stores for one file, `None` if nothing
    async fn remote_file_info(&self, dataset_id: &str, relative_path: &str) -> Result<Option<RemoteFile>>;
}
