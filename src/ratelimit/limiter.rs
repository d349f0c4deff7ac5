//! Check orchestration and policy management.
//!
//! [`RateLimiter`] resolves a policy, picks the limiter for its algorithm,
//! builds the counter key and runs exactly one store procedure per check.
//! Store failures are surfaced as errors; they are never retried here and
//! never turned into an allow or a deny.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::key::CounterKey;
use super::policy::{Algorithm, PolicyRecord, RateLimitPolicy};
use super::result::RateLimitResult;
use super::selector::LimiterSelector;
use super::sliding_window::WindowEdge;
use crate::clock::{Clock, SystemClock};
use crate::error::{QuotaError, Result};
use crate::store::{AtomicStore, PolicyStore, StoreError};

/// Length of generated policy ids.
const POLICY_ID_LEN: usize = 24;

/// Default budget for one store round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Tunables for [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct LimiterSettings {
    /// Budget for a single store round trip
    pub store_timeout: Duration,
    /// Boundary treatment for sliding window logs
    pub window_edge: WindowEdge,
    /// Ceiling on the cost of a single check, on top of the policy limit
    pub max_cost: Option<u64>,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            store_timeout: DEFAULT_STORE_TIMEOUT,
            window_edge: WindowEdge::default(),
            max_cost: None,
        }
    }
}

/// A check decision together with the policy it was made under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOutcome {
    pub result: RateLimitResult,
    pub limit: u64,
    pub window_seconds: u64,
}

/// Resolves policies and dispatches checks to the matching limiter.
///
/// Holds no counter state; share it behind an `Arc` across any number of
/// tasks.
pub struct RateLimiter {
    policies: Arc<dyn PolicyStore>,
    counters: Arc<dyn AtomicStore>,
    selector: LimiterSelector,
    clock: Arc<dyn Clock>,
    settings: LimiterSettings,
}

impl RateLimiter {
    /// Create a rate limiter over a policy store and a counter store.
    pub fn new(
        policies: Arc<dyn PolicyStore>,
        counters: Arc<dyn AtomicStore>,
        settings: LimiterSettings,
    ) -> Self {
        Self::with_clock(policies, counters, settings, Arc::new(SystemClock))
    }

    /// Create a rate limiter that reads time from `clock`.
    pub fn with_clock(
        policies: Arc<dyn PolicyStore>,
        counters: Arc<dyn AtomicStore>,
        settings: LimiterSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let selector = LimiterSelector::new(counters.clone(), clock.clone(), settings.window_edge);
        Self {
            policies,
            counters,
            selector,
            clock,
            settings,
        }
    }

    /// Create a rate limiter whose policies and counters share one store.
    pub fn from_store<S>(store: Arc<S>, settings: LimiterSettings) -> Self
    where
        S: AtomicStore + PolicyStore + 'static,
    {
        Self::new(store.clone(), store, settings)
    }

    /// Current time according to the limiter's clock.
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Check the rate limit for `identifier` under `policy_id`.
    ///
    /// `cost` defaults to 1 when absent or zero.
    pub async fn check_rate_limit(
        &self,
        policy_id: &str,
        identifier: &str,
        cost: Option<u64>,
    ) -> Result<CheckOutcome> {
        if policy_id.is_empty() {
            return Err(QuotaError::InvalidRequest("policy id is required".to_string()));
        }
        if identifier.is_empty() {
            return Err(QuotaError::InvalidRequest("identifier is required".to_string()));
        }

        let policy = self.get_policy(policy_id).await?;
        let cost = self.resolve_cost(cost, &policy)?;
        let key = CounterKey::new(policy_id, identifier);

        let limiter = self.selector.select(policy.algorithm());
        let result = self
            .bounded(limiter.check(&key, &policy, cost))
            .await
            .map_err(|e| {
                warn!(
                    policy_id = %policy_id,
                    identifier = %identifier,
                    error = %e,
                    "Rate limit check failed"
                );
                e
            })?;

        info!(
            policy_id = %policy_id,
            identifier = %identifier,
            algorithm = %policy.algorithm(),
            cost,
            allowed = result.allowed,
            remaining = result.remaining,
            "Rate limit decision made"
        );

        Ok(CheckOutcome {
            result,
            limit: policy.limit(),
            window_seconds: policy.window_seconds(),
        })
    }

    /// Validate and store a new policy, returning its generated id.
    pub async fn create_policy(&self, record: PolicyRecord) -> Result<(String, RateLimitPolicy)> {
        let policy = RateLimitPolicy::try_from(record)?;
        let policy_id = generate_policy_id();

        self.bounded(self.policies.insert_policy(&policy_id, &PolicyRecord::from(&policy)))
            .await?;

        info!(
            policy_id = %policy_id,
            algorithm = %policy.algorithm(),
            limit = policy.limit(),
            window_seconds = policy.window_seconds(),
            "Registered policy"
        );
        Ok((policy_id, policy))
    }

    /// Fetch and validate a stored policy.
    ///
    /// Records written by other tools go through the same validation as
    /// newly created ones.
    pub async fn get_policy(&self, policy_id: &str) -> Result<RateLimitPolicy> {
        let record = self
            .bounded(self.policies.get_policy(policy_id))
            .await?
            .ok_or_else(|| QuotaError::PolicyNotFound(policy_id.to_string()))?;

        RateLimitPolicy::try_from(record).map_err(|e| {
            warn!(policy_id = %policy_id, error = %e, "Stored policy failed validation");
            e
        })
    }

    /// Delete a policy and every counter namespaced under it.
    ///
    /// Returns the number of counters removed.
    pub async fn delete_policy(&self, policy_id: &str) -> Result<u64> {
        if !self.bounded(self.policies.delete_policy(policy_id)).await? {
            return Err(QuotaError::PolicyNotFound(policy_id.to_string()));
        }

        let mut removed = 0;
        for algorithm in Algorithm::all() {
            let prefix = CounterKey::policy_prefix(algorithm, policy_id);
            removed += self.bounded(self.counters.delete_prefix(&prefix)).await?;
        }

        info!(policy_id = %policy_id, counters_removed = removed, "Deleted policy");
        Ok(removed)
    }

    fn resolve_cost(&self, cost: Option<u64>, policy: &RateLimitPolicy) -> Result<u64> {
        let cost = match cost {
            None | Some(0) => 1,
            Some(c) => c,
        };

        if cost > policy.limit() {
            return Err(QuotaError::InvalidRequest(format!(
                "cost {} exceeds the policy limit of {}",
                cost,
                policy.limit()
            )));
        }
        if let Some(max) = self.settings.max_cost {
            if cost > max {
                return Err(QuotaError::InvalidRequest(format!(
                    "cost {} exceeds the maximum of {}",
                    cost, max
                )));
            }
        }
        Ok(cost)
    }

    /// Run a store operation under the configured timeout.
    async fn bounded<T, F>(&self, op: F) -> std::result::Result<T, StoreError>
    where
        F: Future<Output = std::result::Result<T, StoreError>>,
    {
        let budget = self.settings.store_timeout;
        match tokio::time::timeout(budget, op).await {
            Ok(result) => result,
            Err(_) => {
                debug!(timeout_ms = budget.as_millis() as u64, "Store operation timed out");
                Err(StoreError::Timeout(budget.as_millis() as u64))
            }
        }
    }
}

/// A fresh policy id: 24 lowercase hex characters.
fn generate_policy_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(POLICY_ID_LEN);
    id
}
