//! In-memory implementation of the policy store.
//!
//! # Purpose
//! Implements `PolicyStore` entirely in memory with the same optimistic
//! concurrency contract as the remote service. It exists for:
//! - tests of the reconciler and lifecycles (no network)
//! - dry runs of a manifest against a seeded set of policies
//!
//! # Durability and consistency
//! - **Not durable**: all state is lost when the store is dropped.
//! - Each policy carries a revision counter; every successful replace bumps it
//!   and the version marker is its decimal string.
//! - A replace whose expected marker is not the current revision fails with
//!   `StoreError::VersionConflict` and leaves the document untouched.
//!
//! # Call accounting
//! Fetch and replace calls are counted so tests can assert that a no-op
//! reconcile never reaches the write path.
use super::{PolicyStore, StoreError, StoreResult};
use async_trait::async_trait;
use grantline_model::{PolicyDocument, VersionMarker, VersionedPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredPolicy {
    document: PolicyDocument,
    revision: u64,
}

impl StoredPolicy {
    fn versioned(&self) -> VersionedPolicy {
        VersionedPolicy {
            document: self.document.clone(),
            version: VersionMarker::new(self.revision.to_string()),
        }
    }
}

#[derive(Debug, Default)]
struct CallCounters {
    fetches: AtomicU64,
    replaces: AtomicU64,
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    /// Authoritative policies keyed by id.
    policies: Arc<RwLock<HashMap<String, StoredPolicy>>>,
    /// Source of ids for `create_policy`.
    next_id: Arc<AtomicU64>,
    calls: Arc<CallCounters>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a policy under its own `id`, bypassing version checks.
    pub async fn seed(&self, document: PolicyDocument) -> VersionedPolicy {
        let mut policies = self.policies.write().await;
        let revision = policies
            .get(&document.id)
            .map(|stored| stored.revision + 1)
            .unwrap_or(1);
        let stored = StoredPolicy {
            document,
            revision,
        };
        let versioned = stored.versioned();
        policies.insert(stored.document.id.clone(), stored);
        versioned
    }

    /// Current stored document, without counting as a fetch.
    pub async fn snapshot(&self, policy_id: &str) -> Option<PolicyDocument> {
        self.policies
            .read()
            .await
            .get(policy_id)
            .map(|stored| stored.document.clone())
    }

    pub fn fetch_calls(&self) -> u64 {
        self.calls.fetches.load(Ordering::SeqCst)
    }

    pub fn replace_calls(&self) -> u64 {
        self.calls.replaces.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PolicyStore for InMemoryStore {
    async fn fetch_policy(&self, policy_id: &str) -> StoreResult<VersionedPolicy> {
        self.calls.fetches.fetch_add(1, Ordering::SeqCst);
        self.policies
            .read()
            .await
            .get(policy_id)
            .map(StoredPolicy::versioned)
            .ok_or_else(|| StoreError::NotFound(format!("policy {policy_id}")))
    }

    async fn replace_policy(
        &self,
        policy_id: &str,
        document: &PolicyDocument,
        expected: &VersionMarker,
    ) -> StoreResult<VersionMarker> {
        self.calls.replaces.fetch_add(1, Ordering::SeqCst);
        // Compare-and-swap under the write lock, like a conditional PUT.
        let mut policies = self.policies.write().await;
        let stored = policies
            .get_mut(policy_id)
            .ok_or_else(|| StoreError::NotFound(format!("policy {policy_id}")))?;
        if stored.revision.to_string() != expected.as_str() {
            return Err(StoreError::VersionConflict {
                policy_id: policy_id.to_string(),
                expected: expected.clone(),
            });
        }
        let mut document = document.clone();
        document.id = policy_id.to_string();
        stored.document = document;
        stored.revision += 1;
        Ok(VersionMarker::new(stored.revision.to_string()))
    }

    async fn create_policy(&self, document: &PolicyDocument) -> StoreResult<VersionedPolicy> {
        let seq = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut document = document.clone();
        document.id = format!("pol-{seq}");
        let mut policies = self.policies.write().await;
        if policies.contains_key(&document.id) {
            return Err(StoreError::Rejected(format!(
                "policy {} already exists",
                document.id
            )));
        }
        let stored = StoredPolicy {
            document,
            revision: 1,
        };
        let versioned = stored.versioned();
        policies.insert(stored.document.id.clone(), stored);
        Ok(versioned)
    }

    async fn delete_policy(&self, policy_id: &str) -> StoreResult<()> {
        if self.policies.write().await.remove(policy_id).is_none() {
            return Err(StoreError::NotFound(format!("policy {policy_id}")));
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
