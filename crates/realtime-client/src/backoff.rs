//! Capped exponential reconnect backoff.

use std::time::Duration;

/// Reconnect timing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Consecutive failures after which the channel gives up.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// What to do after a channel failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffDecision {
    /// Retry after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// The failure budget is spent.
    GiveUp { attempts: u32 },
}

/// Consecutive-failure counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackoffState {
    attempt: u32,
}

impl BackoffState {
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Forget past failures (successful open, explicit reconnect, close).
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Count a failure and decide what comes next.
    pub fn record_failure(&mut self, policy: &BackoffPolicy) -> BackoffDecision {
        self.attempt = self.attempt.saturating_add(1);
        if self.attempt >= policy.max_attempts {
            BackoffDecision::GiveUp {
                attempts: self.attempt,
            }
        } else {
            BackoffDecision::Retry {
                attempt: self.attempt,
                delay: policy.delay_for_attempt(self.attempt),
            }
        }
    }
}
