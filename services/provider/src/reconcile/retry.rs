use std::time::Duration;

/// Bounds on how often one reconcile cycle is re-run after a retryable failure.
///
/// Version conflicts and remote unavailability share the same budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            max: self.max_delay,
            current: self.base_delay,
        }
    }
}

/// Doubling delay, capped at the policy maximum.
#[derive(Debug)]
pub struct Backoff {
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn next_delay(&mut self) -> Duration {
        let delay = std::cmp::min(self.current, self.max);
        let next = self.current.checked_mul(2).unwrap_or(self.max);
        self.current = std::cmp::min(next, self.max);
        delay
    }
}
