//! Bearer credentials with transparent refresh.
//!
//! # Purpose
//! The HTTP store asks for a token before every request. Providers either hand
//! back a fixed token or run an OAuth2 client-credentials exchange and cache the
//! result until shortly before it expires.
//!
//! # Key invariants
//! - A cached token is never returned within `refresh_skew` of its expiry.
//! - `invalidate` forces the next call to fetch a new token (used after a 401).
//! - Failures are `CredentialError`s. Rejected credentials are fatal; an
//!   unreachable or failing token endpoint is transient and gets retried.
//! - Advertised lifetimes are capped at `MAX_TOKEN_LIFETIME`.
//!
//! # Security considerations
//! - Secrets and tokens are never logged or included in error messages.
use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

/// Upper bound on how long a fetched token is cached.
pub const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("token endpoint rejected client credentials (status {0})")]
    Rejected(u16),
    #[error("token endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("token response invalid: {0}")]
    InvalidResponse(String),
}

impl CredentialError {
    /// The token endpoint could not answer; the credentials themselves may be fine.
    pub fn is_transient(&self) -> bool {
        match self {
            CredentialError::Unreachable(_) => true,
            CredentialError::Rejected(status) => {
                *status >= 500 || *status == 408 || *status == 429
            }
            CredentialError::InvalidResponse(_) => false,
        }
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String, CredentialError>;

    /// Drop any cached token.
    async fn invalidate(&self) {}
}

/// Fixed token, e.g. from `GRANTLINE_TOKEN`.
#[derive(Clone)]
pub struct StaticCredential {
    token: String,
}

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredential").finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn bearer_token(&self) -> Result<String, CredentialError> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// OAuth2 client-credentials grant with a cached, refreshed access token.
pub struct ClientCredentials {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_skew: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl ClientCredentials {
    pub fn new(
        client: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_skew: Duration::from_secs(30),
            cached: Mutex::new(None),
        }
    }

    pub fn with_refresh_skew(mut self, skew: Duration) -> Self {
        self.refresh_skew = skew;
        self
    }

    async fn exchange(&self) -> Result<CachedToken, CredentialError> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|err| CredentialError::Unreachable(err.without_url().to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CredentialError::Rejected(status.as_u16()));
        }
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|err| CredentialError::InvalidResponse(err.without_url().to_string()))?;
        if body.access_token.is_empty() {
            return Err(CredentialError::InvalidResponse(
                "empty access_token".to_string(),
            ));
        }
        // Tokens without an expiry are refreshed hourly.
        let lifetime = Duration::from_secs(body.expires_in.unwrap_or(3600)).min(MAX_TOKEN_LIFETIME);
        let expires_at = Instant::now().checked_add(lifetime).ok_or_else(|| {
            CredentialError::InvalidResponse("expires_in overflows the clock".to_string())
        })?;
        tracing::debug!(lifetime_secs = lifetime.as_secs(), "refreshed access token");
        Ok(CachedToken {
            token: body.access_token,
            expires_at,
        })
    }
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialProvider for ClientCredentials {
    async fn bearer_token(&self) -> Result<String, CredentialError> {
        // Holding the lock across the exchange keeps concurrent callers from
        // stampeding the token endpoint.
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            let fresh_until = Instant::now().checked_add(self.refresh_skew);
            if fresh_until.is_some_and(|fresh_until| token.expires_at > fresh_until) {
                return Ok(token.token.clone());
            }
        }
        let fresh = self.exchange().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}
