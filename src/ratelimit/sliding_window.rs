//! Sliding window log limiter.
//!
//! Each admitted request leaves one entry per unit of cost in a per-key log.
//! A check trims entries that fell out of the window, counts what is left and
//! appends new entries only when they fit under the limit. Counting is exact
//! over a strictly moving window; state is bounded by the limit and expires
//! with the window.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

use super::backend::Limiter;
use super::key::CounterKey;
use super::policy::{Algorithm, RateLimitPolicy};
use super::result::RateLimitResult;
use crate::clock::Clock;
use crate::store::{AtomicStore, Outcome, Procedure, SlidingWindowArgs, StoreError};

/// Treatment of an entry that is exactly one window old.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowEdge {
    /// Entries with `timestamp >= now - window` still count.
    #[default]
    Inclusive,
    /// Only entries with `timestamp > now - window` count.
    Exclusive,
}

/// An in-memory sliding window log.
///
/// Entries are `(timestamp_ms, member)` pairs ordered like a sorted set, so
/// requests that share a millisecond stay distinct through their members.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlidingWindowLog {
    entries: BTreeSet<(i64, String)>,
}

impl SlidingWindowLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry that lies outside the window ending at `now_ms`.
    pub fn trim(&mut self, now_ms: i64, window_ms: i64, edge: WindowEdge) {
        let bound = now_ms - window_ms;
        let first_live = match edge {
            WindowEdge::Inclusive => bound,
            WindowEdge::Exclusive => bound + 1,
        };
        self.entries = self.entries.split_off(&(first_live, String::new()));
    }

    /// Run one check against the log.
    pub fn admit(&mut self, args: &SlidingWindowArgs) -> Outcome {
        self.trim(args.now_ms, args.window_ms, args.edge);

        let count = self.entries.len() as u64;
        if count + args.cost <= args.limit {
            for ordinal in 0..args.cost {
                self.entries
                    .insert((args.now_ms, entry_member(&args.token, ordinal)));
            }
            Outcome::allowed(args.limit - count - args.cost)
        } else {
            Outcome::denied(0)
        }
    }
}

/// Member name of the `ordinal`-th entry written for a request.
pub fn entry_member(token: &str, ordinal: u64) -> String {
    format!("{}:{}", token, ordinal)
}

/// Limiter that counts requests in a sliding window log.
pub struct SlidingWindowLimiter {
    store: Arc<dyn AtomicStore>,
    clock: Arc<dyn Clock>,
    edge: WindowEdge,
}

impl SlidingWindowLimiter {
    pub fn new(store: Arc<dyn AtomicStore>, clock: Arc<dyn Clock>, edge: WindowEdge) -> Self {
        Self { store, clock, edge }
    }
}

#[async_trait]
impl Limiter for SlidingWindowLimiter {
    fn algorithm(&self) -> Algorithm {
        Algorithm::SlidingWindow
    }

    async fn check(
        &self,
        key: &CounterKey,
        policy: &RateLimitPolicy,
        cost: u64,
    ) -> Result<RateLimitResult, StoreError> {
        debug_assert_eq!(policy.algorithm(), Algorithm::SlidingWindow);

        let storage_key = key.storage_key(Algorithm::SlidingWindow);
        let now_ms = self.clock.now_ms();
        let procedure = Procedure::SlidingWindow(SlidingWindowArgs {
            now_ms,
            window_ms: policy.window_ms(),
            limit: policy.limit(),
            cost,
            token: Uuid::new_v4().to_string(),
            edge: self.edge,
        });

        let outcome = self.store.atomic_apply(&storage_key, &procedure).await?;

        trace!(
            key = %storage_key,
            allowed = outcome.allowed,
            remaining = outcome.remaining,
            "Sliding window check"
        );

        Ok(RateLimitResult::from_outcome(outcome, now_ms, policy))
    }
}
