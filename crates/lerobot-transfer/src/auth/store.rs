//! On-disk credential persistence for the CLI

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::api::AuthTokens;
use crate::transfer::config::ClientConfig;
use crate::transfer::core::{FileOperation, Result, TransferError};

const CREDENTIALS_DIR: &str = ".lerobot-hub";
const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub api_url: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub saved_at: DateTime<Utc>,
}

impl StoredCredentials {
    pub fn new(api_url: &str, tokens: &AuthTokens) -> Self {
        Self {
            api_url: api_url.to_string(),
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            saved_at: Utc::now(),
        }
    }

    pub fn tokens(&self) -> AuthTokens {
        AuthTokens {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }
}

/// JSON credentials file, readable only by its owner
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// `~/.lerobot-hub/credentials.json`
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(|home| PathBuf::from(home).join(CREDENTIALS_DIR).join(CREDENTIALS_FILE))
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let path = match &config.credentials_path {
            Some(path) => path.clone(),
            None => Self::default_path().ok_or_else(|| TransferError::Configuration {
                message: "Cannot determine home directory for the credentials file".to_string(),
                field: Some("credentials_path".to_string()),
                suggestion: Some(format!("Set {}", crate::transfer::config::CREDENTIALS_ENV)),
            })?,
        };
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Option<StoredCredentials>> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TransferError::io(&self.path, FileOperation::Read, e)),
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| TransferError::Json {
                context: format!("credentials file {}", self.path.display()),
                source: e,
            })
    }

    pub async fn save(&self, credentials: &StoredCredentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::io(parent, FileOperation::CreateDir, e))?;
        }

        let json = serde_json::to_string_pretty(credentials)?;
        fs::write(&self.path, json)
            .await
            .map_err(|e| TransferError::io(&self.path, FileOperation::Write, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| TransferError::io(&self.path, FileOperation::Write, e))?;
        }

        debug!("Saved credentials to {}", self.path.display());
        Ok(())
    }

    /// Remove the credentials file; `false` if there was none
    pub async fn clear(&self) -> Result<bool> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(TransferError::io(&self.path, FileOperation::Delete, e)),
        }
    }
}
