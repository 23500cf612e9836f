//! Login session that refreshes its own access token

use async_trait::async_trait;
use std::sync::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, AuthTokens};
use crate::auth::store::{CredentialStore, StoredCredentials};
use crate::auth::{is_jwt_expired, CredentialProvider, TOKEN_EXPIRY_SKEW};
use crate::transfer::core::{Result, TransferError};

/// Access/refresh token pair backed by the service's refresh endpoint
///
/// When a [`CredentialStore`] is attached, refreshed tokens are written
/// back so the next process starts with a valid session. Concurrent
/// callers that find the token expired share a single refresh call.
pub struct AuthSession {
    api: ApiClient,
    tokens: RwLock<AuthTokens>,
    refreshing: Mutex<()>,
    store: Option<CredentialStore>,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("api", &self.api)
            .field("persisted", &self.store.is_some())
            .finish()
    }
}

impl AuthSession {
    pub async fn login(api: ApiClient, email: &str, password: &str) -> Result<Self> {
        let tokens = api.login(email, password).await?;
        info!("Logged in as {}", email);
        Ok(Self::from_tokens(api, tokens))
    }

    pub fn from_tokens(api: ApiClient, tokens: AuthTokens) -> Self {
        Self {
            api,
            tokens: RwLock::new(tokens),
            refreshing: Mutex::new(()),
            store: None,
        }
    }

    pub fn with_store(mut self, store: CredentialStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn tokens(&self) -> AuthTokens {
        match self.tokens.read() {
            Ok(tokens) => tokens.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_access_token(&self, access_token: String) {
        match self.tokens.write() {
            Ok(mut tokens) => tokens.access_token = access_token,
            Err(poisoned) => poisoned.into_inner().access_token = access_token,
        }
    }
}

#[async_trait]
impl CredentialProvider for AuthSession {
    async fn auth_header(&self) -> Result<String> {
        Ok(format!("Bearer {}", self.tokens().access_token))
    }

    fn is_expired(&self) -> bool {
        is_jwt_expired(&self.tokens().access_token, TOKEN_EXPIRY_SKEW)
    }

    async fn renew(&self) -> Result<()> {
        let _refreshing = self.refreshing.lock().await;
        if !self.is_expired() {
            debug!("Access token already refreshed by another caller");
            return Ok(());
        }

        let refresh_token = self.tokens().refresh_token.ok_or_else(|| TransferError::Authentication {
            message: "Session expired. Please login again.".to_string(),
        })?;

        let access_token = self.api.refresh(&refresh_token).await?;
        self.set_access_token(access_token);
        info!("Access token refreshed");

        if let Some(ref store) = self.store {
            let saved = StoredCredentials::new(self.api.base_url(), &self.tokens());
            if let Err(e) = store.save(&saved).await {
                warn!("Could not persist refreshed credentials: {}", e);
            }
        }
        Ok(())
    }
}
