//! Retry configuration and backoff for optimistic-concurrency conflicts.
//!
//! Compare-and-swap transactions on the tree engine are retried transparently
//! when another writer commits first. Retries use exponential backoff with
//! jitter:
//!
//! - Base delay doubles with each attempt: `initial_backoff * 2^attempt`
//! - Delay is capped at `max_backoff`
//! - Random jitter of 0–50% of the computed delay is added so contending
//!   writers do not retry in lockstep
//!
//! Only conflicts are retried; validation and policy errors propagate
//! immediately.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy for conflict-retried transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay (before jitter).
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
        }
    }
}

/// Computes the backoff delay for the given 0-indexed attempt, with jitter.
#[must_use]
pub(crate) fn compute_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.min(31);
    let base = config
        .initial_backoff
        .saturating_mul(1u32 << exponent)
        .min(config.max_backoff);
    let jitter_fraction = rand::thread_rng().gen_range(0.0..0.5);
    base + base.mul_f64(jitter_fraction)
}
