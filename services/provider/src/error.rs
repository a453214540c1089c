//! User-visible error taxonomy for reconcile and lifecycle operations.
//!
//! # Purpose
//! Every failure that reaches the declarative tooling layer is one of these
//! variants. Messages name the policy, the entry key (or `policy` for
//! policy-level operations) and the underlying cause.
//!
//! # Retry semantics
//! - `WriteConflict` and `RemoteUnavailable` are produced only after the
//!   reconciler has exhausted its attempts; the caller may retry later.
//! - Everything else is fatal for the current operation.
use crate::store::StoreError;
use grantline_model::ModelError;
use std::time::Duration;
use thiserror::Error;

pub const AUTH_REMEDIATION: &str = "check GRANTLINE_TOKEN, or GRANTLINE_CLIENT_ID / \
GRANTLINE_CLIENT_SECRET / GRANTLINE_TOKEN_URL, and that the client is allowed to manage policies";

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("malformed key {key:?}: {reason}")]
    MalformedKey { key: String, reason: String },
    #[error("schema violation for {key} in policy {policy_id}: {reason}")]
    SchemaViolation {
        policy_id: String,
        key: String,
        reason: String,
    },
    #[error("policy {policy_id} not found (while reconciling {key})")]
    PolicyNotFound { policy_id: String, key: String },
    #[error("entry {key} not found in policy {policy_id}")]
    EntryNotFound { policy_id: String, key: String },
    #[error(
        "entry {key} already exists in policy {policy_id} with different content; \
import it or remove the other declaration"
    )]
    DuplicateEntry { policy_id: String, key: String },
    #[error("cannot change key of {from} to {to} in place; delete and recreate the assignment")]
    KeyChange { from: String, to: String },
    #[error(
        "write conflict on policy {policy_id} while reconciling {key}: \
gave up after {attempts} attempts"
    )]
    WriteConflict {
        policy_id: String,
        key: String,
        attempts: u32,
    },
    #[error(
        "remote unavailable while reconciling {key} in policy {policy_id} \
after {attempts} attempts: {cause}"
    )]
    RemoteUnavailable {
        policy_id: String,
        key: String,
        attempts: u32,
        cause: String,
    },
    #[error(
        "authentication failed while reconciling {key} in policy {policy_id}: {cause}; {}",
        AUTH_REMEDIATION
    )]
    AuthenticationFailed {
        policy_id: String,
        key: String,
        cause: String,
    },
    #[error("remote rejected change to {key} in policy {policy_id}: {cause}")]
    Rejected {
        policy_id: String,
        key: String,
        cause: String,
    },
    #[error("reconciling {key} in policy {policy_id} exceeded its deadline of {timeout:?}")]
    DeadlineExceeded {
        policy_id: String,
        key: String,
        timeout: Duration,
    },
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

impl ReconcileError {
    /// Attach policy/key context to a model error.
    pub fn from_model(policy_id: &str, key: &str, err: ModelError) -> Self {
        match err {
            ModelError::MalformedKey { key, reason } => {
                ReconcileError::MalformedKey { key, reason }
            }
            ModelError::SchemaViolation(reason) => ReconcileError::SchemaViolation {
                policy_id: policy_id.to_string(),
                key: key.to_string(),
                reason,
            },
        }
    }

    /// Map a non-retryable store error, or a retryable one after exhaustion.
    pub fn from_store(policy_id: &str, key: &str, attempts: u32, err: StoreError) -> Self {
        let policy_id = policy_id.to_string();
        let key = key.to_string();
        match err {
            StoreError::NotFound(_) => ReconcileError::PolicyNotFound { policy_id, key },
            StoreError::VersionConflict { .. } => ReconcileError::WriteConflict {
                policy_id,
                key,
                attempts,
            },
            StoreError::Unauthorized(cause) => ReconcileError::AuthenticationFailed {
                policy_id,
                key,
                cause,
            },
            StoreError::Unavailable(cause) => ReconcileError::RemoteUnavailable {
                policy_id,
                key,
                attempts,
                cause,
            },
            StoreError::Rejected(cause) => ReconcileError::Rejected {
                policy_id,
                key,
                cause,
            },
            StoreError::Unexpected(err) => ReconcileError::Rejected {
                policy_id,
                key,
                cause: format!("{err:#}"),
            },
        }
    }

    /// Whether retrying the whole operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReconcileError::WriteConflict { .. }
                | ReconcileError::RemoteUnavailable { .. }
                | ReconcileError::DeadlineExceeded { .. }
        )
    }

    /// Stable machine-readable code, used in logs and manifest reports.
    pub fn code(&self) -> &'static str {
        match self {
            ReconcileError::MalformedKey { .. } => "malformed_key",
            ReconcileError::SchemaViolation { .. } => "schema_violation",
            ReconcileError::PolicyNotFound { .. } => "policy_not_found",
            ReconcileError::EntryNotFound { .. } => "entry_not_found",
            ReconcileError::DuplicateEntry { .. } => "duplicate_entry",
            ReconcileError::KeyChange { .. } => "key_change",
            ReconcileError::WriteConflict { .. } => "write_conflict",
            ReconcileError::RemoteUnavailable { .. } => "remote_unavailable",
            ReconcileError::AuthenticationFailed { .. } => "authentication_failed",
            ReconcileError::Rejected { .. } => "rejected",
            ReconcileError::DeadlineExceeded { .. } => "deadline_exceeded",
        }
    }
}
