//! Wiring from configuration to a ready-to-use provider.
use crate::auth::credentials::{ClientCredentials, CredentialProvider, StaticCredential};
use crate::config::{CredentialsConfig, ProviderConfig};
use crate::error::AUTH_REMEDIATION;
use crate::reconcile::{Deadline, Reconciler};
use crate::resources::{Assignments, Policies};
use crate::store::PolicyStore;
use crate::store::http::HttpPolicyStore;
use crate::store::memory::InMemoryStore;
use anyhow::{Context, bail};
use std::sync::Arc;

#[derive(Clone)]
pub struct Provider {
    pub reconciler: Arc<Reconciler>,
    pub assignments: Assignments,
    pub policies: Policies,
}

impl Provider {
    pub fn new(store: Arc<dyn PolicyStore>, config: &ProviderConfig) -> Self {
        let deadline = config
            .operation_timeout
            .map(Deadline::within)
            .unwrap_or_default();
        let reconciler = Arc::new(Reconciler::new(store, config.retry));
        Self {
            assignments: Assignments::new(Arc::clone(&reconciler)).with_deadline(deadline),
            policies: Policies::new(Arc::clone(&reconciler)).with_deadline(deadline),
            reconciler,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.reconciler.store().backend_name()
    }
}

pub fn build_provider(config: &ProviderConfig) -> anyhow::Result<Provider> {
    let store = build_store(config)?;
    Ok(Provider::new(store, config))
}

fn build_store(config: &ProviderConfig) -> anyhow::Result<Arc<dyn PolicyStore>> {
    let Some(endpoint) = config.endpoint.as_deref() else {
        tracing::warn!("GRANTLINE_ENDPOINT not set; using an empty in-memory store");
        return Ok(Arc::new(InMemoryStore::new()));
    };
    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .context("build http client")?;
    let credentials: Arc<dyn CredentialProvider> = match &config.credentials {
        CredentialsConfig::Token(token) => Arc::new(StaticCredential::new(token.clone())),
        CredentialsConfig::ClientCredentials {
            token_url,
            client_id,
            client_secret,
        } => Arc::new(ClientCredentials::new(
            client.clone(),
            token_url.clone(),
            client_id.clone(),
            client_secret.clone(),
        )),
        CredentialsConfig::None => {
            bail!("no credentials configured for {endpoint}; {AUTH_REMEDIATION}")
        }
    };
    Ok(Arc::new(HttpPolicyStore::new(endpoint, client, credentials)?))
}
