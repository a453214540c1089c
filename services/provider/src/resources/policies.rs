//! Policy lifecycle: the parent documents assignments attach to.
//!
//! # Purpose
//! A policy resource owns the scalar metadata of a document (name, status,
//! tags, windows). The embedded principal and target lists belong to the
//! assignments, so updates go through the reconciler cycle and write back
//! whatever entries the remote currently holds.
use crate::error::{ReconcileError, ReconcileResult};
use crate::reconcile::{Deadline, POLICY_LABEL, Reconciler};
use grantline_model::normalize::{canonical_set, declared_casing, same_enum_value};
use grantline_model::{AccessWindow, Normalize, PolicyDocument, TimeWindow, VersionMarker};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Declared policy metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_window: Option<AccessWindow>,
}

impl PolicySpec {
    fn apply_to(&self, document: &mut PolicyDocument) {
        document.name = self.name.clone();
        document.description = self.description.clone();
        document.status = merge_enum(document.status.take(), self.status.as_deref());
        document.classification =
            merge_enum(document.classification.take(), self.classification.as_deref());
        document.tags = self.tags.clone();
        canonical_set(&mut document.tags);
        document.time_window = self.time_window.clone();
        document.access_window = self.access_window.as_ref().map(Normalize::normalized);
    }

    fn from_document(document: &PolicyDocument, declared: Option<&PolicySpec>) -> Self {
        let document = document.normalized();
        Self {
            name: document.name,
            description: document.description,
            status: declared_casing(
                document.status.as_deref(),
                declared.and_then(|spec| spec.status.as_deref()),
            ),
            classification: declared_casing(
                document.classification.as_deref(),
                declared.and_then(|spec| spec.classification.as_deref()),
            ),
            tags: document.tags,
            time_window: document.time_window,
            access_window: document.access_window,
        }
    }
}

// A remote value that differs only by case is not a change.
fn merge_enum(remote: Option<String>, declared: Option<&str>) -> Option<String> {
    match (remote, declared) {
        (Some(remote), Some(declared)) if same_enum_value(&remote, declared) => Some(remote),
        (_, declared) => declared.map(str::to_string),
    }
}

/// Policy as observed remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyState {
    pub id: String,
    pub spec: PolicySpec,
    pub version: VersionMarker,
    pub principal_count: usize,
    pub target_count: usize,
}

impl PolicyState {
    fn new(
        document: &PolicyDocument,
        version: VersionMarker,
        declared: Option<&PolicySpec>,
    ) -> Self {
        Self {
            id: document.id.clone(),
            spec: PolicySpec::from_document(document, declared),
            version,
            principal_count: document.principals.len(),
            target_count: document.targets.len(),
        }
    }
}

const UNASSIGNED_ID: &str = "<unassigned>";

#[derive(Clone)]
pub struct Policies {
    reconciler: Arc<Reconciler>,
    deadline: Deadline,
}

impl Policies {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self {
            reconciler,
            deadline: Deadline::none(),
        }
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// Create a policy with empty collections; the remote assigns the id.
    pub async fn create(&self, spec: &PolicySpec) -> ReconcileResult<PolicyState> {
        let mut document = PolicyDocument::new(spec.name.clone());
        spec.apply_to(&mut document);
        let store = self.reconciler.store();
        // No id exists until the remote assigns one.
        let label = format!("policy name {:?}", spec.name);
        let created = match self.deadline.timeout() {
            Some(timeout) => tokio::time::timeout(timeout, store.create_policy(&document))
                .await
                .map_err(|_| ReconcileError::DeadlineExceeded {
                    policy_id: UNASSIGNED_ID.to_string(),
                    key: label.clone(),
                    timeout,
                })?,
            None => store.create_policy(&document).await,
        }
        .map_err(|err| ReconcileError::from_store(UNASSIGNED_ID, &label, 1, err))?;
        tracing::info!(policy_id = %created.document.id, name = %spec.name, "policy created");
        Ok(PolicyState::new(&created.document, created.version, Some(spec)))
    }

    /// Current state, `None` once the policy is gone. `declared` supplies the
    /// casing to report for enum-like fields.
    pub async fn read(
        &self,
        policy_id: &str,
        declared: Option<&PolicySpec>,
    ) -> ReconcileResult<Option<PolicyState>> {
        let result = self
            .reconciler
            .run(policy_id, POLICY_LABEL, self.deadline, |document| Ok(document.clone()))
            .await;
        match result {
            Ok(cycle) => Ok(Some(PolicyState::new(&cycle.value, cycle.version, declared))),
            Err(ReconcileError::PolicyNotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Update scalar metadata; the embedded collections are left as they are.
    pub async fn update(&self, policy_id: &str, spec: &PolicySpec) -> ReconcileResult<PolicyState> {
        let cycle = self
            .reconciler
            .run(policy_id, POLICY_LABEL, self.deadline, |document| {
                spec.apply_to(document);
                Ok(document.clone())
            })
            .await?;
        tracing::info!(policy_id, wrote = cycle.wrote, "policy updated");
        Ok(PolicyState::new(&cycle.value, cycle.version, Some(spec)))
    }

    /// Delete the policy; succeeds when it is already gone.
    pub async fn delete(&self, policy_id: &str) -> ReconcileResult<()> {
        let existed = self.reconciler.delete_policy(policy_id, self.deadline).await?;
        tracing::info!(policy_id, existed, "policy deleted");
        Ok(())
    }
}
