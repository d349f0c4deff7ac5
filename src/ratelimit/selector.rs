//! Maps a policy's algorithm to its limiter.

use std::sync::Arc;

use super::backend::Limiter;
use super::policy::Algorithm;
use super::sliding_window::{SlidingWindowLimiter, WindowEdge};
use super::token_bucket::TokenBucketLimiter;
use crate::clock::Clock;
use crate::store::AtomicStore;

/// Holds one limiter per algorithm over the same store.
pub struct LimiterSelector {
    sliding_window: SlidingWindowLimiter,
    token_bucket: TokenBucketLimiter,
}

impl LimiterSelector {
    pub fn new(store: Arc<dyn AtomicStore>, clock: Arc<dyn Clock>, edge: WindowEdge) -> Self {
        Self {
            sliding_window: SlidingWindowLimiter::new(store.clone(), clock.clone(), edge),
            token_bucket: TokenBucketLimiter::new(store, clock),
        }
    }

    /// The limiter for `algorithm`. Total over the closed set of algorithms;
    /// unknown names are rejected earlier, when the policy is parsed.
    pub fn select(&self, algorithm: Algorithm) -> &dyn Limiter {
        match algorithm {
            Algorithm::SlidingWindow => &self.sliding_window,
            Algorithm::TokenBucket => &self.token_bucket,
        }
    }
}
