//! HTTP client for the dataset service
//!
//! Handles:
//! - Login and token refresh
//! - Dataset record listing, lookup, creation and deletion
//! - Access grants to other organizations
//! - Location negotiation, finalize and manifest retrieval for the engine

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::api::models::{
    AssignmentRequest, AuthTokens, CreateDatasetRequest, Dataset, DatasetStatus, Envelope,
    ErrorEnvelope, PermissionLevel, RemoteDataset, RemoteFile, User,
};
use crate::api::RemoteService;
use crate::auth::CredentialProvider;
use crate::transfer::config::ClientConfig;
use crate::transfer::core::error::is_retryable_status;
use crate::transfer::core::{Direction, RemoteLocation, Result, TransferError, TransferUnit};

#[derive(Debug, Deserialize)]
struct LoginData {
    tokens: LoginTokens,
}

#[derive(Debug, Deserialize)]
struct LoginTokens {
    access: TokenInfo,
    #[serde(default)]
    refresh: Option<TokenInfo>,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshData {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserData {
    user: User,
}

/// Authenticated client for the dataset service
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    credentials: Option<Arc<dyn CredentialProvider>>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.credentials.is_some())
            .finish()
    }
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        url::Url::parse(&config.api_url).map_err(|e| TransferError::InvalidUrl {
            url: config.api_url.clone(),
            suggestion: "API URL must be absolute, e.g. https://api.example.com/api/v1".to_string(),
            source: e,
        })?;

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| TransferError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
                field: None,
                suggestion: None,
            })?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            credentials: None,
        })
    }

    /// Attach the credential provider consulted before every authenticated call
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Add a bearer header, renewing the session first when it has expired
    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let credentials = self.credentials.as_ref().ok_or_else(|| TransferError::Authentication {
            message: "Not authenticated. Run login first.".to_string(),
        })?;

        if credentials.is_expired() {
            debug!("Access token expired, asking credential provider to renew");
            credentials.renew().await?;
            if credentials.is_expired() {
                return Err(TransferError::Authentication {
                    message: "Session expired. Please login again.".to_string(),
                });
            }
        }

        let header = credentials.auth_header().await?;
        Ok(request.header(AUTHORIZATION, header))
    }

    /// Send a request and turn non-success statuses into typed errors
    async fn execute(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();
        debug!("API {} -> {}", what, status);

        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().path().to_string();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .ok()
            .and_then(|envelope| envelope.error.message)
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

        Err(match status.as_u16() {
            401 => TransferError::Authentication { message },
            404 => TransferError::NotFound { what: format!("{} ({})", what, message) },
            code if is_retryable_status(code) => TransferError::HttpStatus { url, status: code, body: message },
            code => TransferError::Api { status: code, message: format!("{}: {}", what, message) },
        })
    }

    async fn data<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        let body = response.text().await?;
        serde_json::from_str::<Envelope<T>>(&body)
            .map(|envelope| envelope.data)
            .map_err(|e| TransferError::Json {
                context: format!("{} response", what),
                source: e,
            })
    }

    /// Exchange email and password for session tokens
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthTokens> {
        let request = self
            .client
            .post(self.endpoint("/auth/login"))
            .json(&json!({ "email": email, "password": password }));

        let response = self.execute(request, "login").await.map_err(|e| match e {
            TransferError::Api { message, .. } => TransferError::Authentication { message },
            TransferError::NotFound { what } => TransferError::Authentication { message: what },
            other => other,
        })?;

        let data: LoginData = Self::data(response, "login").await?;
        let access_token = data.tokens.access.token.ok_or_else(|| TransferError::Authentication {
            message: "No access token received".to_string(),
        })?;

        Ok(AuthTokens {
            access_token,
            refresh_token: data.tokens.refresh.and_then(|r| r.token),
        })
    }

    /// Obtain a new access token from a refresh token
    pub async fn refresh(&self, refresh_token: &str) -> Result<String> {
        let request = self
            .client
            .post(self.endpoint("/auth/refresh"))
            .json(&json!({ "refreshToken": refresh_token }));

        let response = self.execute(request, "token refresh").await.map_err(|e| match e {
            TransferError::Authentication { .. } | TransferError::Api { .. } | TransferError::NotFound { .. } => {
                TransferError::Authentication { message: "Token refresh failed".to_string() }
            }
            other => other,
        })?;

        let data: RefreshData = Self::data(response, "token refresh").await?;
        data.access_token.ok_or_else(|| TransferError::Authentication {
            message: "Token refresh returned no access token".to_string(),
        })
    }

    pub async fn current_user(&self) -> Result<User> {
        let request = self.authorize(self.client.get(self.endpoint("/auth/me"))).await?;
        let response = self.execute(request, "current user").await?;
        let data: UserData = Self::data(response, "current user").await?;
        Ok(data.user)
    }

    /// List datasets visible to the caller; `page` is 1-indexed, `limit` at most 100
    pub async fn list_datasets(&self, page: u32, limit: u32, status: Option<DatasetStatus>) -> Result<Vec<Dataset>> {
        let mut query = vec![("page", page.to_string()), ("limit", limit.min(100).to_string())];
        if let Some(status) = status {
            query.push(("status", status.to_string()));
        }

        let request = self
            .authorize(self.client.get(self.endpoint("/datasets")).query(&query))
            .await?;
        let response = self.execute(request, "list datasets").await?;
        Self::data(response, "list datasets").await
    }

    pub async fn get_dataset(&self, dataset_id: &str) -> Result<Dataset> {
        let request = self
            .authorize(self.client.get(self.endpoint(&format!("/datasets/{}", dataset_id))))
            .await?;
        let response = self.execute(request, &format!("dataset {}", dataset_id)).await?;
        Self::data(response, "get dataset").await
    }

    pub async fn create_dataset(&self, body: &CreateDatasetRequest) -> Result<Dataset> {
        let request = self
            .authorize(self.client.post(self.endpoint("/datasets")).json(body))
            .await?;
        let response = self.execute(request, "create dataset").await?;
        Self::data(response, "create dataset").await
    }

    pub async fn delete_dataset(&self, dataset_id: &str) -> Result<()> {
        let request = self
            .authorize(self.client.delete(self.endpoint(&format!("/datasets/{}", dataset_id))))
            .await?;
        self.execute(request, &format!("dataset {}", dataset_id)).await?;
        Ok(())
    }

    /// Grant another organization access to a dataset
    pub async fn assign_dataset(
        &self,
        dataset_id: &str,
        organization_id: &str,
        permission_level: PermissionLevel,
    ) -> Result<()> {
        let body = AssignmentRequest { organization_id, permission_level };
        let request = self
            .authorize(
                self.client
                    .post(self.endpoint(&format!("/datasets/{}/assignments", dataset_id)))
                    .json(&body),
            )
            .await?;
        self.execute(request, "dataset or organization").await?;
        Ok(())
    }

    pub async fn remove_assignment(&self, dataset_id: &str, assignment_id: &str) -> Result<()> {
        let request = self
            .authorize(self.client.delete(
                self.endpoint(&format!("/datasets/{}/assignments/{}", dataset_id, assignment_id)),
            ))
            .await?;
        self.execute(request, "dataset or assignment").await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteService for ApiClient {
    async fn negotiate_upload(&self, dataset_id: &str, unit: &TransferUnit) -> Result<RemoteLocation> {
        let body = json!({
            "path": unit.relative_path,
            "size": unit.size,
            "checksum": unit.checksum.as_ref().map(|c| c.to_string()),
        });
        let request = self
            .authorize(
                self.client
                    .post(self.endpoint(&format!("/datasets/{}/upload-url", dataset_id)))
                    .json(&body),
            )
            .await?;
        let response = self.execute(request, "upload location").await?;
        let mut location: RemoteLocation = Self::data(response, "upload location").await?;
        location.direction = Direction::Upload;
        Ok(location)
    }

    async fn negotiate_download(&self, dataset_id: &str, relative_path: &str) -> Result<RemoteLocation> {
        let request = self
            .authorize(
                self.client
                    .post(self.endpoint(&format!("/datasets/{}/download-url", dataset_id)))
                    .json(&json!({ "path": relative_path })),
            )
            .await?;
        let response = self.execute(request, "download location").await?;
        let mut location: RemoteLocation = Self::data(response, "download location").await?;
        location.direction = Direction::Download;
        Ok(location)
    }

    async fn finalize(&self, dataset_id: &str) -> Result<Dataset> {
        let request = self
            .authorize(self.client.post(self.endpoint(&format!("/datasets/{}/complete", dataset_id))))
            .await?;
        let response = self.execute(request, "finalize dataset").await?;
        Self::data(response, "finalize dataset").await
    }

    async fn get_manifest(&self, dataset_id: &str) -> Result<RemoteDataset> {
        let request = self
            .authorize(self.client.get(self.endpoint(&format!("/datasets/{}/manifest", dataset_id))))
            .await?;
        let response = self.execute(request, &format!("manifest of dataset {}", dataset_id)).await?;
        Self::data(response, "dataset manifest").await
    }

    async fn remote_file_info(&self, dataset_id: &str, relative_path: &str) -> Result<Option<RemoteFile>> {
        let request = self
            .authorize(
                self.client
                    .get(self.endpoint(&format!("/datasets/{}/files", dataset_id)))
                    .query(&[("path", relative_path)]),
            )
            .await?;

        match self.execute(request, &format!("remote file {}", relative_path)).await {
            Ok(response) => Ok(Some(Self::data(response, "remote file").await?)),
            Err(TransferError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
