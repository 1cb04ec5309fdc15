//! Retry configuration and backoff calculation.
//!
//! The async retry loop lives in `mailroom-store` next to the write queue;
//! this module holds the portable, sync-only pieces:
//!
//! - [`RetryPolicy`]: attempt budget and base delay
//! - [`calculate_backoff_delay`]: `base * 2^attempt`, no jitter

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default total attempts (first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 100;

/// Retry parameters for store writes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts including the first (default: 3). Zero behaves like one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential backoff in ms (default: 100).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt `attempt` (0-indexed), or `None`
    /// when that attempt was the last one allowed.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        let last = self.max_attempts.max(1) - 1;
        (attempt < last)
            .then(|| Duration::from_millis(calculate_backoff_delay(attempt, self.base_delay_ms)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Exponential backoff: `base_delay_ms * 2^attempt`, saturating.
///
/// `attempt` is the zero-based index of the attempt that just failed, so the
/// default policy waits 100 ms, then 200 ms.
#[must_use]
pub fn calculate_backoff_delay(attempt: u32, base_delay_ms: u64) -> u64 {
    base_delay_ms.saturating_mul(1u64 << attempt.min(31))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
