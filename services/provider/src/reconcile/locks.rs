//! Per-policy critical sections.
//!
//! # Purpose
//! A reconcile cycle is a read-modify-write of a whole policy document, and the
//! remote service offers nothing finer. [`PolicyLocks`] hands out one async
//! mutex per policy id so at most one cycle per policy runs in this process,
//! while cycles on different policies proceed in parallel.
//!
//! # Key invariants
//! - The lock is held by [`PolicyGuard`] and released when the guard drops, on
//!   every exit path including cancellation of the owning future.
//! - Registry entries are reclaimed once no guard or waiter references them.
//! - The registry map is never borrowed across an `.await`.
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

#[derive(Clone, Default)]
pub struct PolicyLocks {
    locks: Arc<LockMap>,
}

impl PolicyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, policy_id: &str) -> PolicyGuard {
        let lock = self
            .locks
            .entry(policy_id.to_string())
            .or_default()
            .value()
            .clone();
        let guard = lock.lock_owned().await;
        PolicyGuard {
            policy_id: policy_id.to_string(),
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of policies with a holder or waiter.
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }
}

pub struct PolicyGuard {
    policy_id: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl PolicyGuard {
    pub fn policy_id(&self) -> &str {
        &self.policy_id
    }
}

impl Drop for PolicyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the registry itself still points at the mutex: nobody waits on it.
        self.locks
            .remove_if(&self.policy_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_policy_is_serialized() {
        let locks = PolicyLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = locks.acquire("p1").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.expect("task");
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn different_policies_do_not_block() {
        let locks = PolicyLocks::new();
        let _p1 = locks.acquire("p1").await;
        let p2 = tokio::time::timeout(Duration::from_millis(100), locks.acquire("p2")).await;
        assert!(p2.is_ok());
        assert_eq!(locks.tracked(), 2);
    }

    #[tokio::test]
    async fn cancelled_holder_releases_lock() {
        let locks = PolicyLocks::new();
        let holder = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("p1").await;
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        holder.abort();
        let _ = holder.await;
        let guard = tokio::time::timeout(Duration::from_millis(200), locks.acquire("p1"))
            .await
            .expect("lock released after cancellation");
        assert_eq!(guard.policy_id(), "p1");
    }
}
