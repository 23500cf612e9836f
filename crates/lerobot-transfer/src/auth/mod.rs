//! Credential handling
//!
//! The transfer engine never stores secrets itself. It is handed a
//! [`CredentialProvider`] and asks it for a header value before each call,
//! renewing first when the provider reports the credential as expired.

pub mod session;
pub mod store;

pub use session::AuthSession;
pub use store::{CredentialStore, StoredCredentials};

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

use crate::transfer::core::{Result, TransferError};

/// Clock skew tolerated when deciding whether a token is still usable
pub const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(60);

/// Source of authorization for service calls
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Full `Authorization` header value
    async fn auth_header(&self) -> Result<String>;

    fn is_expired(&self) -> bool;

    /// Obtain a fresh credential
    async fn renew(&self) -> Result<()> {
        Err(TransferError::Authentication {
            message: "Session expired. Please login again.".to_string(),
        })
    }
}

/// A fixed bearer token that never expires, as used by CI jobs and tests
#[derive(Debug, Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn auth_header(&self) -> Result<String> {
        Ok(format!("Bearer {}", self.token))
    }

    fn is_expired(&self) -> bool {
        false
    }
}

/// Expiry encoded in a JWT's `exp` claim, if the token is a readable JWT
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}

/// True when the token expires within `skew` or cannot be decoded at all
pub fn is_jwt_expired(token: &str, skew: Duration) -> bool {
    match jwt_expiry(token) {
        Some(expiry) => {
            let skew = chrono::Duration::from_std(skew).unwrap_or_else(|_| chrono::Duration::zero());
            Utc::now() + skew >= expiry
        }
        None => true,
    }
}

#[cfg(test)]
pub(crate) fn test_jwt(exp: i64) -> String {
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let header = engine.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = engine.encode(format!(r#"{{"sub":"u1","exp":{}}}"#, exp));
    format!("{}.{}.signature", header, claims)
}
