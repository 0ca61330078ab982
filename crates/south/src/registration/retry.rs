//! Registration retry policy with exponential backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How registration with core is retried
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay
    pub max_backoff_ms: u64,
    /// Backoff multiplier
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff_ms = initial.as_millis() as u64;
        self.max_backoff_ms = max.as_millis() as u64;
        self
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.clone())
    }
}

/// Tracks attempts made under a `RetryPolicy`
#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    attempts: u32,
    current: Duration,
}

impl Backoff {
    fn new(policy: RetryPolicy) -> Self {
        let current = Duration::from_millis(policy.initial_backoff_ms);
        Self {
            policy,
            attempts: 0,
            current,
        }
    }

    /// Record a failed attempt. Returns the delay before the next attempt,
    /// or None once the attempt budget is spent.
    pub fn on_failure(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if self.attempts >= self.policy.max_attempts.max(1) {
            return None;
        }

        let delay = self.current;
        let max = Duration::from_millis(self.policy.max_backoff_ms);
        self.current = Duration::from_secs_f64(
            (self.current.as_secs_f64() * self.policy.multiplier.max(1.0)).min(max.as_secs_f64()),
        );
        Some(delay.min(max))
    }

    /// Failed attempts so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
