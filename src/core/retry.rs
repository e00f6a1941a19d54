//! Backoff policy and failure classification for the retry path.

use std::time::Duration;

/// Per-operation outcome of one batch attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum OpOutcome<T> {
    /// Applied by the server.
    Success(T),
    /// Failed in a way worth another attempt.
    Retryable(String),
    /// Failed permanently; drop without retrying.
    Fatal(String),
}

/// Attempt ceiling and exponential backoff bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after which an operation is dropped.
    pub max_retries: u32,
    /// Backoff unit. [`backoff`](Self::backoff) doubles it per attempt and the
    /// first retry runs at attempt 1, so it waits `2 * base_delay`.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}

/// Decision for a failed operation after its attempt counter was bumped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue after `delay`.
    Retry {
        /// Backoff before the next attempt.
        delay: Duration,
    },
    /// Attempt ceiling reached.
    GiveUp,
}

impl RetryPolicy {
    /// `min(base * 2^attempt, max)`, saturating.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Decides what to do with an operation that has now failed `attempt` times.
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if attempt < self.max_retries {
            RetryDecision::Retry {
                delay: self.backoff(attempt),
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}
