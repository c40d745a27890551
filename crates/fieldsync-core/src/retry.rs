//! Retry eligibility and exponential backoff.
//!
//! `delay = min(base * 2^retry_count, max_delay) ± jitter`, where jitter is a
//! fraction of the capped delay.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::mutation::{ItemStatus, QueueItem};

/// Default number of failed attempts before an item is dead-lettered.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Why a transmission attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Timeout, connection reset, server asked to retry later.
    Transient,
    /// Retrying the same payload cannot succeed.
    Permanent,
}

/// What to do with an item after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to `Pending` with the incremented retry count.
    Retry { retry_count: u32 },
    /// Mark `Failed`; only an explicit user action brings it back.
    GiveUp { retry_count: u32 },
}

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Failed attempts allowed before an item is marked `Failed`.
    pub max_retries: u32,
    /// Delay for the first retry.
    pub base_delay: Duration,
    /// Upper bound on the un-jittered delay.
    pub max_delay: Duration,
    /// Jitter as a fraction of the delay, in `[0.0, 1.0]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(5 * 60),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given retry limit and default delays.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Disable jitter (deterministic delays).
    pub fn without_jitter(mut self) -> Self {
        self.jitter = 0.0;
        self
    }

    /// Whether the item may be retried automatically.
    pub fn should_retry(&self, item: &QueueItem) -> bool {
        item.status != ItemStatus::Failed && item.retry_count < self.max_retries
    }

    /// Decide the fate of an item that just failed an attempt.
    ///
    /// The item is retried only if [`should_retry`](Self::should_retry)
    /// still holds once this attempt is counted.
    pub fn decide(&self, item: &QueueItem, kind: FailureKind) -> RetryDecision {
        let retry_count = item.retry_count.saturating_add(1);
        let attempted = QueueItem {
            retry_count,
            ..item.clone()
        };
        if kind == FailureKind::Permanent || !self.should_retry(&attempted) {
            RetryDecision::GiveUp { retry_count }
        } else {
            RetryDecision::Retry { retry_count }
        }
    }

    /// Capped exponential delay without jitter.
    ///
    /// Non-decreasing in `retry_count` and never above `max_delay`.
    pub fn base_delay_for(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before the next attempt, with jitter from the thread RNG.
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        self.next_delay_with(retry_count, &mut rand::thread_rng())
    }

    /// Delay before the next attempt using the supplied RNG.
    pub fn next_delay_with<R: Rng>(&self, retry_count: u32, rng: &mut R) -> Duration {
        let delay = self.base_delay_for(retry_count);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || delay.is_zero() {
            return delay;
        }

        let factor = 1.0 + rng.gen_range(-jitter..=jitter);
        delay.mul_f64(factor)
    }
}
