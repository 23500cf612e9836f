//! Records exchanged with the dataset service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transfer::core::Checksum;
use crate::transfer::manifest::DatasetManifest;

/// Success envelope: `{ "data": ... }`
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub data: T,
}

/// Error envelope: `{ "error": { "message": ... } }`
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorEnvelope {
    #[serde(default)]
    pub error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetStatus {
    #[default]
    Pending,
    Uploading,
    Processing,
    Ready,
    Failed,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DatasetStatus::Pending => "pending",
            DatasetStatus::Uploading => "uploading",
            DatasetStatus::Processing => "processing",
            DatasetStatus::Ready => "ready",
            DatasetStatus::Failed => "failed",
            DatasetStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for DatasetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DatasetStatus::Pending),
            "uploading" => Ok(DatasetStatus::Uploading),
            "processing" => Ok(DatasetStatus::Processing),
            "ready" => Ok(DatasetStatus::Ready),
            "failed" => Ok(DatasetStatus::Failed),
            other => Err(format!(
                "unknown status '{}' (expected pending, uploading, processing, ready or failed)",
                other
            )),
        }
    }
}

/// Access level granted to another organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    View,
    #[default]
    Download,
    Admin,
}

impl std::str::FromStr for PermissionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view" => Ok(PermissionLevel::View),
            "download" => Ok(PermissionLevel::Download),
            "admin" => Ok(PermissionLevel::Admin),
            other => Err(format!("permission level must be 'view', 'download', or 'admin', got '{}'", other)),
        }
    }
}

/// Dataset record as stored by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub task_category: Option<String>,
    #[serde(default)]
    pub episode_count: Option<u64>,
    #[serde(default)]
    pub total_frames: Option<u64>,
    #[serde(default)]
    pub fps: Option<f64>,
    #[serde(default)]
    pub robot_type: Option<String>,
    #[serde(default)]
    pub upload_status: DatasetStatus,
    #[serde(default)]
    pub organization_name: Option<String>,
    #[serde(default)]
    pub file_size_bytes: Option<u64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub organization: Option<Organization>,
}

/// Tokens issued by a successful login
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Body of the dataset creation request, derived from the scanned manifest
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDatasetRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_category: Option<String>,
    pub episode_count: u64,
    pub total_frames: u64,
    pub fps: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub robot_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codebase_version: Option<String>,
    pub file_count: usize,
    pub file_size_bytes: u64,
    pub manifest: DatasetManifest,
}

impl CreateDatasetRequest {
    pub fn from_manifest(name: &str, manifest: &DatasetManifest, file_count: usize, file_size_bytes: u64) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            task_category: None,
            episode_count: manifest.total_episodes,
            total_frames: manifest.total_frames,
            fps: manifest.fps,
            robot_type: manifest.robot_type.clone(),
            codebase_version: manifest.codebase_version.clone(),
            file_count,
            file_size_bytes,
            manifest: manifest.clone(),
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_task_category(mut self, task_category: Option<String>) -> Self {
        self.task_category = task_category;
        self
    }
}

/// One file as the service knows it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub path: String,
    pub size: u64,
    #[serde(default)]
    pub checksum: Option<Checksum>,
}

/// Manifest plus file list of a stored dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDataset {
    pub manifest: DatasetManifest,
    pub files: Vec<RemoteFile>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AssignmentRequest<'a> {
    pub organization_id: &'a str,
    pub permission_level: PermissionLevel,
}
