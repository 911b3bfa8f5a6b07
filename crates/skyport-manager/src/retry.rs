//! Retry budgets for heartbeat failures and link respawns

use std::time::Duration;

/// How often to try, how many consecutive failures to tolerate and how long
/// to back off between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between successful checks
    pub interval: Duration,
    /// Consecutive failures that are fatal; `None` retries forever
    pub max_attempts: Option<u32>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Heartbeat checks every `interval`; `retries` consecutive failures are
    /// fatal and failed probes are retried without delay.
    pub fn heartbeat(interval: Duration, retries: u32) -> Self {
        Self {
            interval,
            max_attempts: Some(retries.max(1)),
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Link respawns: unbounded, backing off 1s, 2s, 4s... up to 30s
    pub fn respawn() -> Self {
        Self {
            interval: Duration::ZERO,
            max_attempts: None,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Whether `consecutive` failures exhaust the budget
    pub fn is_exhausted(&self, consecutive: u32) -> bool {
        matches!(self.max_attempts, Some(max) if consecutive >= max)
    }

    /// Delay before attempt number `attempt` (1-based): `min(initial * 2^(n-1), max)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::heartbeat(Duration::from_secs(10), 3)
    }
}
