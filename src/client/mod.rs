//! Client SDK for the quota service.
//!
//! [`QuotaClient`] wraps the generated tonic client with a local deny cache,
//! a circuit breaker and an explicit [`FailurePolicy`] for when the service
//! cannot answer.

mod breaker;
mod cache;

pub use breaker::{CircuitBreaker, CircuitState};
pub use cache::DenyCache;

use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};
use tracing::{debug, warn};

use crate::grpc::{
    CheckRequest, CheckResponse, CreatePolicyRequest, DeletePolicyRequest, GetPolicyRequest,
    Policy, QuotaServiceClient,
};
use crate::ratelimit::Algorithm;

/// Retry hint handed out when the client denies without a service answer.
const FALLBACK_RETRY_AFTER_SECS: u64 = 30;

/// What to do when the service is unreachable or the breaker is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Allow the request
    #[default]
    Open,
    /// Deny the request
    Closed,
}

/// Client tuning knobs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-call deadline
    pub timeout: Duration,
    /// How long a deny is remembered locally; zero disables the cache
    pub deny_cache_ttl: Duration,
    /// Consecutive failures before the breaker opens
    pub failure_threshold: u32,
    /// Time the breaker stays open before probing again
    pub recovery: Duration,
    pub failure_policy: FailurePolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(3000),
            deny_cache_ttl: Duration::from_millis(1000),
            failure_threshold: 5,
            recovery: Duration::from_secs(30),
            failure_policy: FailurePolicy::Open,
        }
    }
}

/// Where a [`CheckResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    /// Answered by the service
    Service,
    /// A recent deny remembered locally
    Cache,
    /// The failure policy, because the service could not answer
    Fallback,
}

/// Decision returned by [`QuotaClient::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub allowed: bool,
    pub remaining: u64,
    pub reset_at_epoch_ms: i64,
    pub retry_after_seconds: u64,
    pub limit: u64,
    pub window_seconds: u64,
    pub source: DecisionSource,
}

impl CheckResult {
    fn from_response(response: CheckResponse) -> Self {
        Self {
            allowed: response.allowed,
            remaining: response.remaining,
            reset_at_epoch_ms: response.reset_at_epoch_ms,
            retry_after_seconds: response.retry_after_seconds,
            limit: response.limit,
            window_seconds: response.window_seconds,
            source: DecisionSource::Service,
        }
    }

    fn local(allowed: bool, retry_after: Duration, source: DecisionSource) -> Self {
        let retry_after_seconds = if allowed {
            0
        } else {
            retry_after.as_secs_f64().ceil().max(1.0) as u64
        };
        Self {
            allowed,
            remaining: 0,
            reset_at_epoch_ms: Utc::now().timestamp_millis() + retry_after.as_millis() as i64,
            retry_after_seconds,
            limit: 0,
            window_seconds: 0,
            source,
        }
    }
}

/// Errors surfaced by the client.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid endpoint: {0}")]
    Endpoint(#[from] tonic::transport::Error),

    /// The service answered with an error status
    #[error("Service returned {}: {}", .0.code(), .0.message())]
    Status(#[from] Status),

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Response is missing field: {0}")]
    MissingField(&'static str),
}

/// Statuses caused by the request itself rather than service health.
fn is_caller_error(code: Code) -> bool {
    matches!(
        code,
        Code::InvalidArgument
            | Code::NotFound
            | Code::AlreadyExists
            | Code::PermissionDenied
            | Code::Unauthenticated
            | Code::FailedPrecondition
            | Code::OutOfRange
    )
}

/// Rate limit client bound to one policy.
#[derive(Debug)]
pub struct QuotaClient {
    inner: QuotaServiceClient<Channel>,
    policy_id: String,
    config: ClientConfig,
    cache: DenyCache,
    breaker: CircuitBreaker,
}

impl QuotaClient {
    /// Create a client for `endpoint` (e.g. `http://127.0.0.1:8081`).
    ///
    /// The connection is established on first use.
    pub fn connect_lazy(
        endpoint: impl Into<String>,
        policy_id: impl Into<String>,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let channel = Endpoint::from_shared(endpoint.into())?
            .connect_timeout(config.timeout)
            .timeout(config.timeout)
            .connect_lazy();
        Ok(Self::from_channel(channel, policy_id, config))
    }

    pub fn from_channel(channel: Channel, policy_id: impl Into<String>, config: ClientConfig) -> Self {
        Self {
            inner: QuotaServiceClient::new(channel),
            policy_id: policy_id.into(),
            cache: DenyCache::new(config.deny_cache_ttl),
            breaker: CircuitBreaker::new(config.failure_threshold, config.recovery),
            config,
        }
    }

    pub fn policy_id(&self) -> &str {
        &self.policy_id
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    fn cache_key(&self, identifier: &str) -> String {
        format!("{}:{}", self.policy_id, identifier)
    }

    async fn call<T, F>(&self, fut: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<tonic::Response<T>, Status>>,
    {
        match tokio::time::timeout(self.config.timeout, fut).await {
            Ok(response) => Ok(response?.into_inner()),
            Err(_) => Err(ClientError::Timeout(self.config.timeout)),
        }
    }

    fn fallback(&self) -> CheckResult {
        let allowed = self.config.failure_policy == FailurePolicy::Open;
        CheckResult::local(
            allowed,
            Duration::from_secs(FALLBACK_RETRY_AFTER_SECS),
            DecisionSource::Fallback,
        )
    }

    /// Check whether `identifier` may proceed, consuming `cost` permits.
    ///
    /// Only caller errors (unknown policy, bad arguments) are returned as
    /// `Err`; an unhealthy service yields the configured failure policy.
    pub async fn check(&self, identifier: &str, cost: Option<u64>) -> Result<CheckResult, ClientError> {
        let key = self.cache_key(identifier);
        if self.cache.is_denied(&key) {
            debug!(key = %key, "Deny served from local cache");
            return Ok(CheckResult::local(
                false,
                self.config.deny_cache_ttl,
                DecisionSource::Cache,
            ));
        }

        if !self.breaker.allow() {
            warn!(
                policy = ?self.config.failure_policy,
                "Circuit breaker open, applying failure policy"
            );
            return Ok(self.fallback());
        }

        let request = CheckRequest {
            policy_id: self.policy_id.clone(),
            identifier: identifier.to_string(),
            cost,
        };
        let mut inner = self.inner.clone();
        match self.call(inner.check(request)).await {
            Ok(response) => {
                self.breaker.on_success();
                let result = CheckResult::from_response(response);
                if !result.allowed {
                    self.cache.record_deny(&key);
                }
                Ok(result)
            }
            Err(ClientError::Status(status)) if is_caller_error(status.code()) => {
                self.breaker.on_success();
                Err(ClientError::Status(status))
            }
            Err(e) => {
                self.breaker.on_failure();
                warn!(error = %e, "Quota service unreachable, applying failure policy");
                Ok(self.fallback())
            }
        }
    }

    /// Register a new policy and return it with its generated id.
    pub async fn create_policy(
        &self,
        limit: i64,
        window_seconds: i64,
        algorithm: Algorithm,
    ) -> Result<Policy, ClientError> {
        let request = CreatePolicyRequest {
            limit,
            window_seconds,
            algorithm: algorithm.as_str().to_string(),
        };
        let mut inner = self.inner.clone();
        self.call(inner.create_policy(request))
            .await?
            .policy
            .ok_or(ClientError::MissingField("policy"))
    }

    pub async fn get_policy(&self, policy_id: &str) -> Result<Policy, ClientError> {
        let mut inner = self.inner.clone();
        self.call(inner.get_policy(GetPolicyRequest {
            policy_id: policy_id.to_string(),
        }))
        .await
    }

    /// Delete a policy, returning how many counters were removed.
    pub async fn delete_policy(&self, policy_id: &str) -> Result<u64, ClientError> {
        let mut inner = self.inner.clone();
        let response = self
            .call(inner.delete_policy(DeletePolicyRequest {
                policy_id: policy_id.to_string(),
            }))
            .await?;
        Ok(response.counters_removed)
    }
}
