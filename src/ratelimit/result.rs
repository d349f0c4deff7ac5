//! Per-check decision values.

use std::time::Duration;

use super::policy::RateLimitPolicy;
use crate::store::Outcome;

/// The decision returned for a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Permits or whole tokens left after this decision
    pub remaining: u64,
    /// When the current window nominally closes, in epoch milliseconds
    pub reset_at_epoch_ms: i64,
    /// Minimum wait before retrying; 0 when allowed
    pub retry_after_seconds: u64,
}

impl RateLimitResult {
    /// Translate a store outcome evaluated at `now_ms` under `policy`.
    pub fn from_outcome(outcome: Outcome, now_ms: i64, policy: &RateLimitPolicy) -> Self {
        Self {
            allowed: outcome.allowed,
            remaining: outcome.remaining,
            reset_at_epoch_ms: now_ms + policy.window_ms(),
            retry_after_seconds: if outcome.allowed {
                0
            } else {
                policy.window_seconds()
            },
        }
    }

    /// Time left until `reset_at_epoch_ms`, measured from `now_ms`.
    pub fn duration_until_reset(&self, now_ms: i64) -> Duration {
        Duration::from_millis(self.reset_at_epoch_ms.saturating_sub(now_ms).max(0) as u64)
    }
}
