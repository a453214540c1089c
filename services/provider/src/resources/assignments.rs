//! Assignment lifecycle: one principal or target entry inside a shared policy.
//!
//! # Purpose
//! Each assignment owns exactly one entry of its policy. Every operation is a
//! thin call into the [`Reconciler`], so siblings assigned to the same policy
//! never overwrite each other.
//!
//! # Identity
//! The state id is the composite key `<policy_id>:<member_id>:<member_type>`.
//! Key fields are immutable: a change to any of them is a delete followed by a
//! create, reported by [`requires_replacement`].
use crate::error::{ReconcileError, ReconcileResult};
use crate::reconcile::{Deadline, Operation, Reconciler, accessor};
use grantline_model::{Entry, EntryKey, Normalize, PolicyDocument, VersionMarker};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Declared assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub policy_id: String,
    #[serde(flatten)]
    pub entry: Entry,
}

impl Assignment {
    pub fn new(policy_id: impl Into<String>, entry: impl Into<Entry>) -> Self {
        Self {
            policy_id: policy_id.into(),
            entry: entry.into(),
        }
    }

    pub fn key(&self) -> ReconcileResult<EntryKey> {
        self.entry
            .key(&self.policy_id)
            .map_err(|err| ReconcileError::from_model(&self.policy_id, "<invalid key>", err))
    }
}

/// Assignment as observed in the remote policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentState {
    pub id: String,
    pub policy_id: String,
    pub entry: Entry,
    pub version: Option<VersionMarker>,
}

impl AssignmentState {
    fn new(key: &EntryKey, entry: Entry, version: Option<VersionMarker>) -> Self {
        Self {
            id: key.encode(),
            policy_id: key.policy_id.clone(),
            entry,
            version,
        }
    }
}

/// What the policy currently holds under a key, compared to a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stored {
    Absent,
    Same,
    Different,
}

/// A record that no longer satisfies the entry invariants counts as different
/// content, so the lifecycle can overwrite it.
fn compare_stored(document: &PolicyDocument, key: &EntryKey, entry: &Entry) -> Stored {
    match accessor::find(document, key) {
        Ok(None) => Stored::Absent,
        Ok(Some(existing)) if existing == *entry => Stored::Same,
        Ok(Some(_)) => Stored::Different,
        Err(err) => {
            tracing::warn!(id = %key, error = %err, "stored entry is invalid");
            Stored::Different
        }
    }
}

/// Whether moving from `current` to `desired` needs delete-then-create.
pub fn requires_replacement(current: &Assignment, desired: &Assignment) -> bool {
    match (current.key(), desired.key()) {
        (Ok(current), Ok(desired)) => current != desired,
        _ => true,
    }
}

#[derive(Clone)]
pub struct Assignments {
    reconciler: Arc<Reconciler>,
    deadline: Deadline,
}

impl Assignments {
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

    /// Add the entry. Re-applying an identical entry succeeds without a write;
    /// an entry with the same key and other content is a `DuplicateEntry`.
    pub async fn create(&self, desired: &Assignment) -> ReconcileResult<AssignmentState> {
        let key = desired.key()?;
        let label = key.encode();
        let entry = desired.entry.normalized();
        let cycle = self
            .reconciler
            .run(&key.policy_id, &label, self.deadline, |document| {
                if compare_stored(document, &key, &entry) == Stored::Different {
                    return Err(ReconcileError::DuplicateEntry {
                        policy_id: key.policy_id.clone(),
                        key: label.clone(),
                    });
                }
                accessor::apply(document, &key, Operation::Upsert(entry.clone()))
                    .map_err(|err| ReconcileError::from_model(&key.policy_id, &label, err))
            })
            .await?;
        tracing::info!(id = %label, wrote = cycle.wrote, "assignment created");
        Ok(AssignmentState::new(
            &key,
            cycle.value.entry.unwrap_or(entry),
            Some(cycle.version),
        ))
    }

    /// Current state, `None` when the entry or its policy is gone.
    pub async fn read(&self, key: &EntryKey) -> ReconcileResult<Option<AssignmentState>> {
        let observed = self.reconciler.observe(key, self.deadline).await?;
        Ok(observed.map(|(entry, version)| AssignmentState::new(key, entry, Some(version))))
    }

    /// Change the mutable fields of an existing entry.
    pub async fn update(
        &self,
        current: &Assignment,
        desired: &Assignment,
    ) -> ReconcileResult<AssignmentState> {
        let key = current.key()?;
        let desired_key = desired.key()?;
        if key != desired_key {
            return Err(ReconcileError::KeyChange {
                from: key.encode(),
                to: desired_key.encode(),
            });
        }
        let label = key.encode();
        let entry = desired.entry.normalized();
        let cycle = self
            .reconciler
            .run(&key.policy_id, &label, self.deadline, |document| {
                if compare_stored(document, &key, &entry) == Stored::Absent {
                    return Err(ReconcileError::EntryNotFound {
                        policy_id: key.policy_id.clone(),
                        key: label.clone(),
                    });
                }
                accessor::apply(document, &key, Operation::Upsert(entry.clone()))
                    .map_err(|err| ReconcileError::from_model(&key.policy_id, &label, err))
            })
            .await?;
        tracing::info!(id = %label, wrote = cycle.wrote, "assignment updated");
        Ok(AssignmentState::new(
            &key,
            cycle.value.entry.unwrap_or(entry),
            Some(cycle.version),
        ))
    }

    /// Remove the entry; succeeds when it or its policy is already gone.
    pub async fn delete(&self, key: &EntryKey) -> ReconcileResult<()> {
        let reconciled = self
            .reconciler
            .reconcile(key, Operation::Remove, self.deadline)
            .await?;
        tracing::info!(id = %key, outcome = ?reconciled.applied.outcome, "assignment deleted");
        Ok(())
    }

    /// Adopt an existing entry by its composite key.
    pub async fn import(&self, id: &str) -> ReconcileResult<Option<AssignmentState>> {
        let key = EntryKey::decode(id).map_err(|err| ReconcileError::from_model("", id, err))?;
        self.read(&key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::RetryPolicy;
    use crate::store::memory::InMemoryStore;
    use grantline_model::{AuthProfile, DbProfile, MemberType, PrincipalEntry, TargetEntry};
    use serde_json::json;

    async fn fixture() -> (InMemoryStore, Assignments) {
        let store = InMemoryStore::new();
        let mut document = PolicyDocument::new("analysts");
        document.id = "P1".to_string();
        store.seed(document).await;
        let reconciler = Reconciler::new(Arc::new(store.clone()), RetryPolicy::default());
        (store, Assignments::new(Arc::new(reconciler)))
    }

    fn role(id: &str, name: &str) -> Assignment {
        Assignment::new("P1", PrincipalEntry::role(id, name).expect("role"))
    }

    fn target(database_id: &str, roles: &[&str]) -> Assignment {
        let profile = AuthProfile::Db(DbProfile {
            roles: roles.iter().map(|role| role.to_string()).collect(),
            databases: vec![],
        });
        Assignment::new("P1", TargetEntry::new(database_id, profile).expect("target"))
    }

    #[tokio::test]
    async fn create_is_idempotent_for_identical_entries() {
        let (store, assignments) = fixture().await;
        let first = assignments.create(&role("r1", "Readers")).await.expect("create");
        assert_eq!(first.id, "P1:r1:ROLE");
        assignments.create(&role("r1", "Readers")).await.expect("re-apply");
        assert_eq!(store.replace_calls(), 1);
    }

    #[tokio::test]
    async fn conflicting_create_is_a_duplicate() {
        let (store, assignments) = fixture().await;
        assignments.create(&role("r1", "Readers")).await.expect("create");
        let err = assignments
            .create(&role("r1", "Writers"))
            .await
            .expect_err("duplicate");
        assert!(matches!(err, ReconcileError::DuplicateEntry { .. }), "{err}");
        let document = store.snapshot("P1").await.expect("policy");
        assert_eq!(document.principals[0].name.as_deref(), Some("Readers"));
    }

    #[tokio::test]
    async fn create_treats_reordered_sets_as_identical() {
        let (store, assignments) = fixture().await;
        assignments
            .create(&target("db-1", &["writer", "reader"]))
            .await
            .expect("create");
        assignments
            .create(&target("db-1", &["reader", "writer", "reader"]))
            .await
            .expect("re-apply");
        assert_eq!(store.replace_calls(), 1);
    }

    #[tokio::test]
    async fn read_signals_absence() {
        let (_store, assignments) = fixture().await;
        let key = EntryKey::new("P1", "r1", MemberType::Role).expect("key");
        assert_eq!(assignments.read(&key).await.expect("read"), None);

        assignments.create(&role("r1", "Readers")).await.expect("create");
        let state = assignments.read(&key).await.expect("read").expect("present");
        assert_eq!(state.entry, role("r1", "Readers").entry);
    }

    #[tokio::test]
    async fn update_changes_mutable_fields_in_place() {
        let (store, assignments) = fixture().await;
        assignments.create(&role("r0", "Zero")).await.expect("create");
        assignments.create(&role("r1", "Readers")).await.expect("create");
        let updated = assignments
            .update(&role("r1", "Readers"), &role("r1", "Auditors"))
            .await
            .expect("update");
        assert_eq!(updated.entry, role("r1", "Auditors").entry);
        let document = store.snapshot("P1").await.expect("policy");
        assert_eq!(document.principals[0].principal_id, "r0");
        assert_eq!(document.principals[1].name.as_deref(), Some("Auditors"));
    }

    #[tokio::test]
    async fn update_rejects_key_changes_and_missing_entries() {
        let (_store, assignments) = fixture().await;
        let err = assignments
            .update(&role("r1", "Readers"), &role("r2", "Readers"))
            .await
            .expect_err("key change");
        assert!(matches!(err, ReconcileError::KeyChange { .. }), "{err}");
        assert!(requires_replacement(&role("r1", "Readers"), &role("r2", "Readers")));
        assert!(!requires_replacement(&role("r1", "Readers"), &role("r1", "Other")));

        let err = assignments
            .update(&role("r1", "Readers"), &role("r1", "Auditors"))
            .await
            .expect_err("missing");
        assert!(matches!(err, ReconcileError::EntryNotFound { .. }), "{err}");
    }

    /// Seeds `P1` with a ROLE record that carries directory fields.
    async fn fixture_with_invalid_role() -> (InMemoryStore, Assignments) {
        let (store, assignments) = fixture().await;
        let mut document = store.snapshot("P1").await.expect("policy");
        let record = serde_json::from_value(json!({
            "principal_id": "r1",
            "principal_type": "ROLE",
            "name": "Readers",
            "source_directory_name": "corp",
            "source_directory_id": "d1",
        }))
        .expect("record");
        document.principals.push(record);
        store.seed(document).await;
        (store, assignments)
    }

    #[tokio::test]
    async fn invalid_stored_entry_can_be_repaired() {
        let (store, assignments) = fixture_with_invalid_role().await;
        let key = EntryKey::new("P1", "r1", MemberType::Role).expect("key");
        let err = assignments.read(&key).await.expect_err("invalid");
        assert!(matches!(err, ReconcileError::SchemaViolation { .. }), "{err}");

        let err = assignments
            .create(&role("r1", "Readers"))
            .await
            .expect_err("different content");
        assert!(matches!(err, ReconcileError::DuplicateEntry { .. }), "{err}");

        assignments
            .update(&role("r1", "Readers"), &role("r1", "Readers"))
            .await
            .expect("repair");
        let state = assignments.read(&key).await.expect("read").expect("present");
        assert_eq!(state.entry, role("r1", "Readers").entry);
        assert_eq!(store.snapshot("P1").await.expect("policy").principals.len(), 1);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_store, assignments) = fixture().await;
        assignments.create(&role("r1", "Readers")).await.expect("create");
        let key = EntryKey::new("P1", "r1", MemberType::Role).expect("key");
        assignments.delete(&key).await.expect("delete");
        assignments.delete(&key).await.expect("delete again");
        let gone = EntryKey::new("P9", "r1", MemberType::Role).expect("key");
        assignments.delete(&gone).await.expect("policy gone");
    }

    #[tokio::test]
    async fn import_decodes_the_composite_key() {
        let (_store, assignments) = fixture().await;
        assignments.create(&role("r1", "Readers")).await.expect("create");
        let state = assignments
            .import("P1:r1:role")
            .await
            .expect("import")
            .expect("present");
        assert_eq!(state.id, "P1:r1:ROLE");

        let err = assignments.import("P1:r1").await.expect_err("malformed");
        assert!(matches!(err, ReconcileError::MalformedKey { .. }), "{err}");
    }
}
