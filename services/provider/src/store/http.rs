//! HTTP implementation of the policy store.
//!
//! # Purpose
//! Talks to the remote policy service:
//! - `GET    /v1/policies/{id}` returns the document, version in `ETag`
//! - `PUT    /v1/policies/{id}` with `If-Match` replaces it conditionally
//! - `POST   /v1/policies` creates one
//! - `DELETE /v1/policies/{id}` deletes one
//!
//! # Status mapping
//! - 404 → `NotFound`
//! - 409 / 412 → `VersionConflict`
//! - 401 / 403 → `Unauthorized` (after one retry with a fresh token on 401)
//! - token endpoint unreachable or failing → `Unavailable`; otherwise `Unauthorized`
//! - 408 / 429 / 5xx and transport failures → `Unavailable`
//! - any other 4xx → `Rejected`
//!
//! Per-request timeouts are configured on the `reqwest::Client`; a timed-out
//! request surfaces as `Unavailable` and is retried by the reconciler.
use super::{PolicyStore, StoreError, StoreResult};
use crate::auth::credentials::{CredentialError, CredentialProvider};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use grantline_model::{PolicyDocument, VersionMarker, VersionedPolicy};
use reqwest::header::{ETAG, HeaderMap, IF_MATCH};
use reqwest::{Method, StatusCode, Url};
use std::sync::Arc;

pub struct HttpPolicyStore {
    base_url: Url,
    client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpPolicyStore {
    pub fn new(
        base_url: &str,
        client: reqwest::Client,
        credentials: Arc<dyn CredentialProvider>,
    ) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url).with_context(|| format!("parse endpoint {base_url}"))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("endpoint {base_url} cannot be used as a base url"));
        }
        Ok(Self {
            base_url,
            client,
            credentials,
        })
    }

    fn url(&self, policy_id: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["v1", "policies"]);
            if let Some(policy_id) = policy_id {
                segments.push(policy_id);
            }
        }
        url
    }

    /// Send a request with a bearer token, retrying once with a fresh token on 401.
    async fn send<F>(&self, build: F) -> StoreResult<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut refreshed = false;
        loop {
            let token = self
                .credentials
                .bearer_token()
                .await
                .map_err(credential_failure)?;
            let response = build(&self.client)
                .bearer_auth(token)
                .send()
                .await
                .map_err(|err| StoreError::Unavailable(err.without_url().to_string()))?;
            if response.status() == StatusCode::UNAUTHORIZED && !refreshed {
                tracing::debug!("remote rejected bearer token; refreshing");
                self.credentials.invalidate().await;
                refreshed = true;
                continue;
            }
            return Ok(response);
        }
    }
}

fn credential_failure(err: CredentialError) -> StoreError {
    if err.is_transient() {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Unauthorized(err.to_string())
    }
}

fn classify(
    method: &Method,
    status: StatusCode,
    policy_id: &str,
    expected: Option<&VersionMarker>,
    body: String,
) -> StoreError {
    let detail = format!("{method} policy {policy_id}: {status} {}", body.trim());
    match status {
        StatusCode::NOT_FOUND => StoreError::NotFound(format!("policy {policy_id}")),
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => match expected {
            Some(expected) => StoreError::VersionConflict {
                policy_id: policy_id.to_string(),
                expected: expected.clone(),
            },
            None => StoreError::Rejected(detail),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Unauthorized(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            StoreError::Unavailable(detail)
        }
        status if status.is_server_error() => StoreError::Unavailable(detail),
        _ => StoreError::Rejected(detail),
    }
}

async fn failure(
    method: Method,
    response: reqwest::Response,
    policy_id: &str,
    expected: Option<&VersionMarker>,
) -> StoreError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    classify(&method, status, policy_id, expected, body)
}

fn version_from(headers: &HeaderMap, policy_id: &str) -> StoreResult<VersionMarker> {
    let value = headers
        .get(ETAG)
        .ok_or_else(|| anyhow!("response for policy {policy_id} has no ETag"))?
        .to_str()
        .with_context(|| format!("ETag for policy {policy_id} is not ASCII"))?;
    Ok(VersionMarker::new(value))
}

async fn versioned_from(
    response: reqwest::Response,
    policy_id: &str,
) -> StoreResult<VersionedPolicy> {
    let version = version_from(response.headers(), policy_id)?;
    let document = response
        .json::<PolicyDocument>()
        .await
        .with_context(|| format!("decode policy {policy_id}"))?;
    Ok(VersionedPolicy { document, version })
}

#[async_trait]
impl PolicyStore for HttpPolicyStore {
    async fn fetch_policy(&self, policy_id: &str) -> StoreResult<VersionedPolicy> {
        let url = self.url(Some(policy_id));
        let response = self.send(|client| client.get(url.clone())).await?;
        if !response.status().is_success() {
            return Err(failure(Method::GET, response, policy_id, None).await);
        }
        versioned_from(response, policy_id).await
    }

    async fn replace_policy(
        &self,
        policy_id: &str,
        document: &PolicyDocument,
        expected: &VersionMarker,
    ) -> StoreResult<VersionMarker> {
        let url = self.url(Some(policy_id));
        let response = self
            .send(|client| {
                client
                    .put(url.clone())
                    .header(IF_MATCH, expected.as_str())
                    .json(document)
            })
            .await?;
        if !response.status().is_success() {
            return Err(failure(Method::PUT, response, policy_id, Some(expected)).await);
        }
        version_from(response.headers(), policy_id)
    }

    async fn create_policy(&self, document: &PolicyDocument) -> StoreResult<VersionedPolicy> {
        let url = self.url(None);
        let response = self
            .send(|client| client.post(url.clone()).json(document))
            .await?;
        if !response.status().is_success() {
            return Err(failure(Method::POST, response, &document.name, None).await);
        }
        versioned_from(response, &document.name).await
    }

    async fn delete_policy(&self, policy_id: &str) -> StoreResult<()> {
        let url = self.url(Some(policy_id));
        let response = self.send(|client| client.delete(url.clone())).await?;
        if !response.status().is_success() {
            return Err(failure(Method::DELETE, response, policy_id, None).await);
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}
