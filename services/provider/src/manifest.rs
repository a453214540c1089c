//! Apply a declared set of assignments and removals.
//!
//! # Purpose
//! Plays the part of a declarative scheduler: every declaration becomes one
//! task, all tasks run in parallel, and the reconciler serializes the ones that
//! touch the same policy.
//!
//! ```yaml
//! assignments:
//!   - policy_id: P1
//!     principal:
//!       principal_id: u1
//!       principal_type: USER
//!       display_name: Ursula
//!       directory: { name: corp, id: d1 }
//! removals:
//!   - "P1:r9:ROLE"
//! ```
use crate::error::{ReconcileError, ReconcileResult};
use crate::resources::{Assignment, Assignments};
use anyhow::Context;
use grantline_model::{EntryKey, Normalize};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub assignments: Vec<Assignment>,
    /// Composite keys of entries to remove.
    #[serde(default)]
    pub removals: Vec<String>,
}

impl Manifest {
    pub fn from_yaml_str(contents: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(contents).with_context(|| "parse manifest yaml")
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read manifest: {}", path.display()))?;
        Self::from_yaml_str(&contents)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Action {
    Created,
    Updated,
    Unchanged,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyFailure {
    pub id: String,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: Vec<(String, Action)>,
    pub failures: Vec<ApplyFailure>,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn count(&self, action: Action) -> usize {
        self.applied
            .iter()
            .filter(|(_, applied)| *applied == action)
            .count()
    }

    fn record(&mut self, id: String, result: ReconcileResult<Action>) {
        match result {
            Ok(action) => self.applied.push((id, action)),
            Err(err) => {
                tracing::error!(id = %id, code = err.code(), error = %err, "declaration failed");
                self.failures.push(ApplyFailure {
                    id,
                    code: err.code(),
                    message: err.to_string(),
                });
            }
        }
    }
}

pub async fn apply_manifest(assignments: &Assignments, manifest: Manifest) -> ApplyReport {
    let mut tasks = JoinSet::new();
    for desired in manifest.assignments {
        let assignments = assignments.clone();
        tasks.spawn(async move {
            let id = desired
                .key()
                .map(|key| key.encode())
                .unwrap_or_else(|_| format!("{}:<invalid>", desired.policy_id));
            (id, converge(&assignments, &desired).await)
        });
    }
    for raw in manifest.removals {
        let assignments = assignments.clone();
        tasks.spawn(async move {
            let result = match EntryKey::decode(&raw) {
                Ok(key) => assignments.delete(&key).await.map(|()| Action::Removed),
                Err(err) => Err(ReconcileError::from_model("", &raw, err)),
            };
            (raw, result)
        });
    }

    let mut report = ApplyReport::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((id, result)) => report.record(id, result),
            Err(err) => {
                tracing::error!(error = %err, "manifest task failed");
                report.failures.push(ApplyFailure {
                    id: "<task>".to_string(),
                    code: "task_failed",
                    message: err.to_string(),
                });
            }
        }
    }
    report.applied.sort();
    report.failures.sort_by(|left, right| left.id.cmp(&right.id));
    report
}

async fn converge(assignments: &Assignments, desired: &Assignment) -> ReconcileResult<Action> {
    let key = desired.key()?;
    let observed = match assignments.read(&key).await {
        Ok(observed) => observed,
        // The stored record is invalid; overwrite it with the declaration.
        Err(ReconcileError::SchemaViolation { .. }) => {
            return assignments
                .update(desired, desired)
                .await
                .map(|_| Action::Updated);
        }
        Err(err) => return Err(err),
    };
    match observed {
        None => assignments.create(desired).await.map(|_| Action::Created),
        Some(state) if state.entry == desired.entry.normalized() => Ok(Action::Unchanged),
        Some(state) => {
            let current = Assignment::new(state.policy_id, state.entry);
            assignments
                .update(&current, desired)
                .await
                .map(|_| Action::Updated)
        }
    }
}
