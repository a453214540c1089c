use crate::reconcile::RetryPolicy;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

// Provider configuration sourced from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    /// Base URL of the policy service; `None` runs against an in-memory store.
    pub endpoint: Option<String>,
    pub credentials: CredentialsConfig,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub operation_timeout: Option<Duration>,
    pub metrics_bind: Option<SocketAddr>,
    pub manifest: Option<PathBuf>,
}

#[derive(Clone, PartialEq)]
pub enum CredentialsConfig {
    None,
    Token(String),
    ClientCredentials {
        token_url: String,
        client_id: String,
        client_secret: String,
    },
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialsConfig::None => f.write_str("None"),
            CredentialsConfig::Token(_) => f.write_str("Token(<redacted>)"),
            CredentialsConfig::ClientCredentials {
                token_url,
                client_id,
                ..
            } => f
                .debug_struct("ClientCredentials")
                .field("token_url", token_url)
                .field("client_id", client_id)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProviderConfigOverride {
    endpoint: Option<String>,
    token: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    token_url: Option<String>,
    max_attempts: Option<u32>,
    retry_base_ms: Option<u64>,
    retry_max_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    operation_timeout_ms: Option<u64>,
    metrics_bind: Option<String>,
    manifest: Option<PathBuf>,
}

impl ProviderConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: env_parse("GRANTLINE_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
            base_delay: env_parse("GRANTLINE_RETRY_BASE_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: env_parse("GRANTLINE_RETRY_MAX_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
        };
        let request_timeout = env_parse("GRANTLINE_REQUEST_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(30));
        let operation_timeout =
            env_parse("GRANTLINE_OPERATION_TIMEOUT_MS")?.map(Duration::from_millis);
        let metrics_bind = std::env::var("GRANTLINE_METRICS_BIND")
            .ok()
            .map(|value| value.parse())
            .transpose()
            .with_context(|| "parse GRANTLINE_METRICS_BIND")?;
        let credentials = credentials_from(
            std::env::var("GRANTLINE_TOKEN").ok(),
            std::env::var("GRANTLINE_CLIENT_ID").ok(),
            std::env::var("GRANTLINE_CLIENT_SECRET").ok(),
            std::env::var("GRANTLINE_TOKEN_URL").ok(),
        )?;
        let config = Self {
            endpoint: std::env::var("GRANTLINE_ENDPOINT").ok(),
            credentials,
            retry,
            request_timeout,
            operation_timeout,
            metrics_bind,
            manifest: std::env::var("GRANTLINE_MANIFEST").ok().map(PathBuf::from),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("GRANTLINE_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read GRANTLINE_CONFIG: {path}"))?;
            let override_cfg: ProviderConfigOverride = serde_yaml::from_str(&contents)
                .with_context(|| "parse provider config yaml")?;
            config.apply(override_cfg)?;
            config.validate()?;
        }
        Ok(config)
    }

    fn apply(&mut self, override_cfg: ProviderConfigOverride) -> Result<()> {
        if let Some(value) = override_cfg.endpoint {
            self.endpoint = Some(value);
        }
        if override_cfg.token.is_some() || override_cfg.client_id.is_some() {
            self.credentials = credentials_from(
                override_cfg.token,
                override_cfg.client_id,
                override_cfg.client_secret,
                override_cfg.token_url,
            )?;
        }
        if let Some(value) = override_cfg.max_attempts {
            self.retry.max_attempts = value;
        }
        if let Some(value) = override_cfg.retry_base_ms {
            self.retry.base_delay = Duration::from_millis(value);
        }
        if let Some(value) = override_cfg.retry_max_ms {
            self.retry.max_delay = Duration::from_millis(value);
        }
        if let Some(value) = override_cfg.request_timeout_ms {
            self.request_timeout = Duration::from_millis(value);
        }
        if let Some(value) = override_cfg.operation_timeout_ms {
            self.operation_timeout = Some(Duration::from_millis(value));
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = Some(value.parse().with_context(|| "parse metrics_bind")?);
        }
        if let Some(value) = override_cfg.manifest {
            self.manifest = Some(value);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if self.retry.base_delay > self.retry.max_delay {
            bail!(
                "retry base delay {:?} exceeds max delay {:?}",
                self.retry.base_delay,
                self.retry.max_delay
            );
        }
        Ok(())
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    std::env::var(key)
        .ok()
        .map(|value| value.parse::<T>())
        .transpose()
        .with_context(|| format!("parse {key}"))
}

fn credentials_from(
    token: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    token_url: Option<String>,
) -> Result<CredentialsConfig> {
    match (token, client_id) {
        (Some(token), _) => Ok(CredentialsConfig::Token(token)),
        (None, Some(client_id)) => {
            let client_secret =
                client_secret.with_context(|| "client credentials require a client secret")?;
            let token_url =
                token_url.with_context(|| "client credentials require a token url")?;
            Ok(CredentialsConfig::ClientCredentials {
                token_url,
                client_id,
                client_secret,
            })
        }
        (None, None) => Ok(CredentialsConfig::None),
    }
}
