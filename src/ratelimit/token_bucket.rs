//! Token bucket limiter.
//!
//! The bucket holds up to `limit` tokens and refills continuously so that an
//! empty bucket is full again after one window. Bursts up to capacity are
//! admitted; sustained throughput is bounded by the refill rate.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use super::backend::Limiter;
use super::key::CounterKey;
use super::policy::{Algorithm, RateLimitPolicy};
use super::result::RateLimitResult;
use crate::clock::Clock;
use crate::store::{AtomicStore, Outcome, Procedure, StoreError, TokenBucketArgs};

/// Stored bucket state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    /// Current balance, `0 <= tokens <= capacity`
    pub tokens: f64,
    /// Timestamp of the last refill, epoch milliseconds
    pub last_refill_ms: i64,
}

impl BucketState {
    /// A never-used identity starts with a full bucket.
    pub fn full(capacity: u64, now_ms: i64) -> Self {
        Self {
            tokens: capacity as f64,
            last_refill_ms: now_ms,
        }
    }

    /// Add the tokens accrued since the last refill, capped at capacity.
    pub fn refill(&mut self, now_ms: i64, capacity: u64, window_ms: i64) {
        // A clock that stepped backwards refills nothing.
        let elapsed_ms = (now_ms - self.last_refill_ms).max(0);
        let accrued = elapsed_ms as f64 * capacity as f64 / window_ms as f64;
        self.tokens = (self.tokens + accrued).min(capacity as f64);
        self.last_refill_ms = self.last_refill_ms.max(now_ms);
    }

    /// Run one check against the bucket.
    pub fn take(&mut self, args: &TokenBucketArgs) -> Outcome {
        self.refill(args.now_ms, args.capacity, args.window_ms);

        let cost = args.cost as f64;
        if self.tokens >= cost {
            self.tokens -= cost;
            Outcome::allowed(self.whole_tokens())
        } else {
            Outcome::denied(self.whole_tokens())
        }
    }

    /// Whole tokens available.
    pub fn whole_tokens(&self) -> u64 {
        self.tokens.max(0.0).floor() as u64
    }
}

/// Limiter that debits a continuously refilling bucket.
pub struct TokenBucketLimiter {
    store: Arc<dyn AtomicStore>,
    clock: Arc<dyn Clock>,
}

impl TokenBucketLimiter {
    pub fn new(store: Arc<dyn AtomicStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

#[async_trait]
impl Limiter for TokenBucketLimiter {
    fn algorithm(&self) -> Algorithm {
        Algorithm::TokenBucket
    }

    async fn check(
        &self,
        key: &CounterKey,
        policy: &RateLimitPolicy,
        cost: u64,
    ) -> Result<RateLimitResult, StoreError> {
        debug_assert_eq!(policy.algorithm(), Algorithm::TokenBucket);

        let storage_key = key.storage_key(Algorithm::TokenBucket);
        let now_ms = self.clock.now_ms();
        let procedure = Procedure::TokenBucket(TokenBucketArgs {
            now_ms,
            capacity: policy.limit(),
            window_ms: policy.window_ms(),
            cost,
        });

        let outcome = self.store.atomic_apply(&storage_key, &procedure).await?;

        trace!(
            key = %storage_key,
            allowed = outcome.allowed,
            tokens_remaining = outcome.remaining,
            refill_rate = policy.refill_rate(),
            "Token bucket check"
        );

        Ok(RateLimitResult::from_outcome(outcome, now_ms, policy))
    }
}
