//! Limiter trait shared by the admission-control algorithms.

use async_trait::async_trait;

use super::key::CounterKey;
use super::policy::{Algorithm, RateLimitPolicy};
use super::result::RateLimitResult;
use crate::store::StoreError;

/// An admission-control algorithm.
///
/// Implementations hold no counter state of their own: every check is one
/// atomic round trip to the shared store, so a single instance can be
/// reused by any number of concurrent tasks.
#[async_trait]
pub trait Limiter: Send + Sync {
    /// The algorithm this limiter implements.
    fn algorithm(&self) -> Algorithm;

    /// Decide whether `cost` permits can be taken for `key` under `policy`.
    async fn check(
        &self,
        key: &CounterKey,
        policy: &RateLimitPolicy,
        cost: u64,
    ) -> Result<RateLimitResult, StoreError>;
}
