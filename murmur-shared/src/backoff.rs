//! Reconnection backoff calculation.
//!
//! Pure arithmetic only: the caller draws the jitter from its own random
//! source and owns the timers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry attempts allowed before automatic reconnection gives up.
pub const MAX_RETRY_COUNT: u32 = 5;
/// Base delay for the exponential schedule in milliseconds.
pub const INITIAL_RETRY_DELAY_MS: u64 = 1_000;
/// Upper bound for the exponential part of the delay in milliseconds.
pub const MAX_RETRY_DELAY_MS: u64 = 30_000;
/// Exclusive upper bound of the random jitter in milliseconds.
pub const MAX_JITTER_MS: u64 = 1_000;

/// Bounded exponential backoff with additive jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Retry budget; no attempt is scheduled once the count reaches it.
    pub max_retry_count: u32,
    /// Delay unit doubled per attempt.
    pub initial_delay_ms: u64,
    /// Cap applied before jitter.
    pub max_delay_ms: u64,
    /// Jitter is drawn from `0..max_jitter_ms`.
    pub max_jitter_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retry_count: MAX_RETRY_COUNT,
            initial_delay_ms: INITIAL_RETRY_DELAY_MS,
            max_delay_ms: MAX_RETRY_DELAY_MS,
            max_jitter_ms: MAX_JITTER_MS,
        }
    }
}

impl BackoffPolicy {
    /// `min(initial * 2^retry_count, max)`, without jitter.
    #[must_use]
    pub fn base_delay(&self, retry_count: u32) -> Duration {
        let exponential = self
            .initial_delay_ms
            .saturating_mul(1u64 << retry_count.min(32));
        Duration::from_millis(exponential.min(self.max_delay_ms))
    }

    /// Base delay plus `jitter_ms`, clamped into `0..max_jitter_ms`.
    #[must_use]
    pub fn delay(&self, retry_count: u32, jitter_ms: u64) -> Duration {
        let jitter = jitter_ms.min(self.max_jitter_ms.saturating_sub(1));
        self.base_delay(retry_count) + Duration::from_millis(jitter)
    }

    /// Whether the retry budget is spent.
    #[must_use]
    pub const fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retry_count
    }
}

/// Delay before reconnect attempt `retry_count` under the default policy.
#[must_use]
pub fn reconnect_delay(retry_count: u32, jitter_ms: u64) -> Duration {
    BackoffPolicy::default().delay(retry_count, jitter_ms)
}
