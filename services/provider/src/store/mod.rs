//! Remote policy store boundary.
//!
//! # Purpose
//! The remote service only knows whole policy documents: fetch one, replace one
//! conditioned on a version marker, create one, delete one. Everything the
//! reconciler does is expressed in those four calls.
//!
//! # Error classification
//! Backends map their failures onto [`StoreError`] so the reconciler can decide
//! what to retry without knowing the transport:
//! - `VersionConflict` and `Unavailable` are retryable;
//! - `Unauthorized`, `Rejected` and `NotFound` are not.
use async_trait::async_trait;
use grantline_model::{PolicyDocument, VersionMarker, VersionedPolicy};
use thiserror::Error;

pub mod http;
pub mod memory;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("version conflict on policy {policy_id}: expected version {expected} is stale")]
    VersionConflict {
        policy_id: String,
        expected: VersionMarker,
    },
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::VersionConflict { .. } | StoreError::Unavailable(_)
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Fetch a policy and the version marker it was read at.
    async fn fetch_policy(&self, policy_id: &str) -> StoreResult<VersionedPolicy>;

    /// Replace the whole document if the stored version still equals `expected`.
    async fn replace_policy(
        &self,
        policy_id: &str,
        document: &PolicyDocument,
        expected: &VersionMarker,
    ) -> StoreResult<VersionMarker>;

    /// Create a policy; the store assigns the id.
    async fn create_policy(&self, document: &PolicyDocument) -> StoreResult<VersionedPolicy>;

    async fn delete_policy(&self, policy_id: &str) -> StoreResult<()>;

    fn backend_name(&self) -> &'static str;
}
