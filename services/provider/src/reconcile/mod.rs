//! Conflict-safe reconciliation of entries in shared policy documents.
//!
//! # Purpose
//! Many assignment resources each own one entry of the same remote policy,
//! but the remote service can only replace the whole document. The
//! [`Reconciler`] turns "change my entry" into a safe read-modify-write:
//!
//! 1. take the per-policy critical section ([`locks::PolicyLocks`]);
//! 2. fetch the document and its version marker;
//! 3. normalize it and apply the mutation to a copy;
//! 4. skip the write when the copy equals the normalized document;
//! 5. otherwise replace it, conditioned on the fetched version;
//! 6. on a version conflict or an unavailable remote, back off and start again
//!    from step 2, up to [`RetryPolicy::max_attempts`] times.
//!
//! # Concurrency + ordering guarantees
//! - At most one cycle per policy id runs in this process; different policies
//!   run in parallel.
//! - The conditional write also catches writers outside this process: the
//!   loser re-fetches and re-applies its own change on top of the winner's.
//! - The critical section is released on success, failure, and when the
//!   caller's deadline drops the in-flight future.
use crate::error::{ReconcileError, ReconcileResult};
use crate::store::{PolicyStore, StoreError};
use grantline_model::{Entry, EntryKey, Normalize, PolicyDocument, VersionMarker};
use std::sync::Arc;
use std::time::Duration;

pub mod accessor;
pub mod locks;
pub mod retry;

pub use accessor::{Applied, Operation, Outcome};
pub use locks::PolicyLocks;
pub use retry::RetryPolicy;

/// Where a cycle is; reported on every tracing event of the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Fetching,
    Mutating,
    Writing,
    Retrying,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Fetching => "fetching",
            Phase::Mutating => "mutating",
            Phase::Writing => "writing",
            Phase::Retrying => "retrying",
        }
    }
}

/// Optional time limit for one operation, lock wait included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    timeout: Option<Duration>,
}

impl Deadline {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn within(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Result of one completed cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Cycle<T> {
    pub value: T,
    /// Version of the document after the cycle.
    pub version: VersionMarker,
    /// Whether a replace was sent.
    pub wrote: bool,
    pub attempts: u32,
}

/// Result of reconciling one entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub applied: Applied,
    /// `None` when the policy no longer exists (remove only).
    pub version: Option<VersionMarker>,
    pub wrote: bool,
}

enum Failure {
    Retry(StoreError),
    Fatal(ReconcileError),
}

pub struct Reconciler {
    store: Arc<dyn PolicyStore>,
    locks: PolicyLocks,
    retry: RetryPolicy,
}

impl Reconciler {
    pub fn new(store: Arc<dyn PolicyStore>, retry: RetryPolicy) -> Self {
        Self {
            store,
            locks: PolicyLocks::new(),
            retry,
        }
    }

    pub fn store(&self) -> &Arc<dyn PolicyStore> {
        &self.store
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Upsert or remove the entry `key` names.
    ///
    /// Removing from a policy that no longer exists succeeds with
    /// [`Outcome::Absent`].
    pub async fn reconcile(
        &self,
        key: &EntryKey,
        operation: Operation,
        deadline: Deadline,
    ) -> ReconcileResult<Reconciled> {
        let label = validated_label(key)?;
        let removing = operation == Operation::Remove;
        let result = self
            .run(&key.policy_id, &label, deadline, |document| {
                accessor::apply(document, key, operation.clone())
                    .map_err(|err| ReconcileError::from_model(&key.policy_id, &label, err))
            })
            .await;
        match result {
            Ok(cycle) => Ok(Reconciled {
                applied: cycle.value,
                version: Some(cycle.version),
                wrote: cycle.wrote,
            }),
            Err(ReconcileError::PolicyNotFound { .. }) if removing => Ok(Reconciled {
                applied: Applied {
                    outcome: Outcome::Absent,
                    entry: None,
                },
                version: None,
                wrote: false,
            }),
            Err(err) => Err(err),
        }
    }

    /// Current state of the entry `key` names, `None` if it or its policy is gone.
    pub async fn observe(
        &self,
        key: &EntryKey,
        deadline: Deadline,
    ) -> ReconcileResult<Option<(Entry, VersionMarker)>> {
        let label = validated_label(key)?;
        let result = self
            .run(&key.policy_id, &label, deadline, |document| {
                accessor::find(document, key)
                    .map_err(|err| ReconcileError::from_model(&key.policy_id, &label, err))
            })
            .await;
        match result {
            Ok(cycle) => Ok(cycle.value.map(|entry| (entry, cycle.version))),
            Err(ReconcileError::PolicyNotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Run one fetch-mutate-write cycle against `policy_id`.
    ///
    /// `mutate` sees a normalized copy of the fetched document and may be
    /// called once per attempt; it must derive its changes from the document it
    /// is given. Errors it returns end the cycle without retry. `label` names
    /// what is being reconciled in logs and errors.
    pub async fn run<T, F>(
        &self,
        policy_id: &str,
        label: &str,
        deadline: Deadline,
        mut mutate: F,
    ) -> ReconcileResult<Cycle<T>>
    where
        F: FnMut(&mut PolicyDocument) -> ReconcileResult<T> + Send,
        T: Send,
    {
        let work = async {
            let _guard = self.locks.acquire(policy_id).await;
            self.run_locked(policy_id, label, &mut mutate).await
        };
        within_deadline(policy_id, label, deadline, work).await
    }

    /// Delete a whole policy inside its critical section.
    ///
    /// Returns `false` when the policy was already gone.
    pub async fn delete_policy(
        &self,
        policy_id: &str,
        deadline: Deadline,
    ) -> ReconcileResult<bool> {
        let work = async {
            let _guard = self.locks.acquire(policy_id).await;
            match self.store.delete_policy(policy_id).await {
                Ok(()) => Ok(true),
                Err(StoreError::NotFound(_)) => Ok(false),
                Err(err) => {
                    let err = ReconcileError::from_store(policy_id, POLICY_LABEL, 1, err);
                    metrics::counter!("grantline_reconcile_failures_total", "code" => err.code())
                        .increment(1);
                    Err(err)
                }
            }
        };
        within_deadline(policy_id, POLICY_LABEL, deadline, work).await
    }

    async fn run_locked<T, F>(
        &self,
        policy_id: &str,
        label: &str,
        mutate: &mut F,
    ) -> ReconcileResult<Cycle<T>>
    where
        F: FnMut(&mut PolicyDocument) -> ReconcileResult<T> + Send,
        T: Send,
    {
        let mut backoff = self.retry.backoff();
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            metrics::counter!("grantline_reconcile_attempts_total").increment(1);
            match self.attempt(policy_id, label, attempt, mutate).await {
                Ok(cycle) => return Ok(cycle),
                Err(Failure::Fatal(err)) => {
                    metrics::counter!("grantline_reconcile_failures_total", "code" => err.code())
                        .increment(1);
                    return Err(err);
                }
                Err(Failure::Retry(err)) if attempt >= max_attempts => {
                    let err = ReconcileError::from_store(policy_id, label, attempt, err);
                    metrics::counter!("grantline_reconcile_failures_total", "code" => err.code())
                        .increment(1);
                    tracing::warn!(
                        policy_id,
                        key = label,
                        attempts = attempt,
                        error = %err,
                        "giving up"
                    );
                    return Err(err);
                }
                Err(Failure::Retry(err)) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        policy_id,
                        key = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        phase = Phase::Retrying.as_str(),
                        error = %err,
                        "retrying reconcile"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn attempt<T, F>(
        &self,
        policy_id: &str,
        label: &str,
        attempt: u32,
        mutate: &mut F,
    ) -> Result<Cycle<T>, Failure>
    where
        F: FnMut(&mut PolicyDocument) -> ReconcileResult<T> + Send,
        T: Send,
    {
        let fatal = |err: StoreError| {
            Failure::Fatal(ReconcileError::from_store(policy_id, label, attempt, err))
        };

        tracing::debug!(
            policy_id,
            key = label,
            attempt,
            phase = Phase::Fetching.as_str(),
            "fetching policy"
        );
        let fetched = match self.store.fetch_policy(policy_id).await {
            Ok(fetched) => fetched,
            Err(err) if err.is_retryable() => return Err(Failure::Retry(err)),
            Err(err) => return Err(fatal(err)),
        };

        tracing::debug!(
            policy_id,
            key = label,
            attempt,
            phase = Phase::Mutating.as_str(),
            "applying change"
        );
        let view = fetched.document.normalized();
        let mut candidate = view.clone();
        let value = mutate(&mut candidate).map_err(Failure::Fatal)?;
        if candidate == view {
            metrics::counter!("grantline_reconcile_noop_total").increment(1);
            tracing::debug!(policy_id, key = label, "no drift; skipping write");
            return Ok(Cycle {
                value,
                version: fetched.version,
                wrote: false,
                attempts: attempt,
            });
        }

        tracing::debug!(
            policy_id,
            key = label,
            attempt,
            phase = Phase::Writing.as_str(),
            "writing policy"
        );
        match self
            .store
            .replace_policy(policy_id, &candidate, &fetched.version)
            .await
        {
            Ok(version) => {
                metrics::counter!("grantline_reconcile_writes_total").increment(1);
                tracing::info!(policy_id, key = label, attempt, %version, "policy updated");
                Ok(Cycle {
                    value,
                    version,
                    wrote: true,
                    attempts: attempt,
                })
            }
            Err(err) if err.is_retryable() => {
                if matches!(err, StoreError::VersionConflict { .. }) {
                    metrics::counter!("grantline_reconcile_conflicts_total").increment(1);
                }
                Err(Failure::Retry(err))
            }
            Err(err) => Err(fatal(err)),
        }
    }
}

/// Label used for policy-level operations in logs and errors.
pub const POLICY_LABEL: &str = "policy";

async fn within_deadline<T>(
    policy_id: &str,
    label: &str,
    deadline: Deadline,
    work: impl Future<Output = ReconcileResult<T>>,
) -> ReconcileResult<T> {
    let Some(timeout) = deadline.timeout() else {
        return work.await;
    };
    match tokio::time::timeout(timeout, work).await {
        Ok(result) => result,
        Err(_) => {
            metrics::counter!("grantline_reconcile_failures_total", "code" => "deadline_exceeded")
                .increment(1);
            tracing::warn!(policy_id, key = label, ?timeout, "reconcile deadline exceeded");
            Err(ReconcileError::DeadlineExceeded {
                policy_id: policy_id.to_string(),
                key: label.to_string(),
                timeout,
            })
        }
    }
}

fn validated_label(key: &EntryKey) -> ReconcileResult<String> {
    key.validate()
        .map_err(|err| ReconcileError::from_model(&key.policy_id, &key.encode(), err))?;
    Ok(key.encode())
}
