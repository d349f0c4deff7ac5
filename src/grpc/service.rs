//! Quota service implementation.

use std::sync::Arc;
use tonic::metadata::MetadataValue;
use tonic::{Request, Response, Status};
use tracing::{debug, instrument, warn};

use super::messages::check_response::Code;
use super::messages::{
    CheckRequest, CheckResponse, CreatePolicyRequest, CreatePolicyResponse, DeletePolicyRequest,
    DeletePolicyResponse, GetPolicyRequest, Policy,
};
use super::proto::quota_service_server::QuotaService;

use crate::ratelimit::{PolicyRecord, RateLimitPolicy, RateLimiter};

/// Implementation of the `quotad.v1.QuotaService` gRPC interface.
pub struct QuotaServiceImpl {
    /// The rate limiter instance
    rate_limiter: Arc<RateLimiter>,
}

impl QuotaServiceImpl {
    /// Create a new QuotaServiceImpl with the given rate limiter.
    pub fn new(rate_limiter: Arc<RateLimiter>) -> Self {
        Self { rate_limiter }
    }
}

fn policy_message(policy_id: &str, policy: &RateLimitPolicy) -> Policy {
    Policy {
        policy_id: policy_id.to_string(),
        limit: policy.limit() as i64,
        window_seconds: policy.window_seconds() as i64,
        algorithm: policy.algorithm().as_str().to_string(),
    }
}

fn require_policy_id(policy_id: &str) -> Result<(), Status> {
    if policy_id.is_empty() {
        warn!("Received request with empty policy id");
        return Err(Status::invalid_argument("policy_id is required"));
    }
    Ok(())
}

#[tonic::async_trait]
impl QuotaService for QuotaServiceImpl {
    /// Decide whether a request for an identifier is within quota.
    ///
    /// A denial is a normal response with code `OVER_LIMIT` and a
    /// `retry-after` header; store failures surface as `UNAVAILABLE`.
    #[instrument(
        skip(self, request),
        fields(
            policy_id = %request.get_ref().policy_id,
            identifier = %request.get_ref().identifier,
            cost = ?request.get_ref().cost
        )
    )]
    async fn check(
        &self,
        request: Request<CheckRequest>,
    ) -> Result<Response<CheckResponse>, Status> {
        let req = request.into_inner();

        let outcome = self
            .rate_limiter
            .check_rate_limit(&req.policy_id, &req.identifier, req.cost)
            .await?;
        let result = outcome.result;
        let until_reset = result.duration_until_reset(self.rate_limiter.now_ms());

        let code = if result.allowed {
            Code::Ok
        } else {
            debug!(policy_id = %req.policy_id, identifier = %req.identifier, "Rate limit exceeded");
            Code::OverLimit
        };

        let mut response = Response::new(CheckResponse {
            allowed: result.allowed,
            remaining: result.remaining,
            reset_at_epoch_ms: result.reset_at_epoch_ms,
            retry_after_seconds: result.retry_after_seconds,
            limit: outcome.limit,
            window_seconds: outcome.window_seconds,
            code: code.into(),
            duration_until_reset: Some(prost_types::Duration {
                seconds: until_reset.as_secs() as i64,
                nanos: until_reset.subsec_nanos() as i32,
            }),
        });

        let headers = response.metadata_mut();
        headers.insert("x-ratelimit-limit", MetadataValue::from(outcome.limit));
        headers.insert("x-ratelimit-remaining", MetadataValue::from(result.remaining));
        headers.insert("x-ratelimit-reset", MetadataValue::from(result.reset_at_epoch_ms));
        if !result.allowed {
            headers.insert("retry-after", MetadataValue::from(result.retry_after_seconds));
        }

        Ok(response)
    }

    #[instrument(skip(self, request), fields(algorithm = %request.get_ref().algorithm))]
    async fn create_policy(
        &self,
        request: Request<CreatePolicyRequest>,
    ) -> Result<Response<CreatePolicyResponse>, Status> {
        let req = request.into_inner();
        let record = PolicyRecord::new(req.algorithm, req.limit, req.window_seconds);

        let (policy_id, policy) = self.rate_limiter.create_policy(record).await?;

        Ok(Response::new(CreatePolicyResponse {
            policy: Some(policy_message(&policy_id, &policy)),
            policy_id,
        }))
    }

    #[instrument(skip(self, request), fields(policy_id = %request.get_ref().policy_id))]
    async fn get_policy(
        &self,
        request: Request<GetPolicyRequest>,
    ) -> Result<Response<Policy>, Status> {
        let req = request.into_inner();
        require_policy_id(&req.policy_id)?;

        let policy = self.rate_limiter.get_policy(&req.policy_id).await?;
        Ok(Response::new(policy_message(&req.policy_id, &policy)))
    }

    #[instrument(skip(self, request), fields(policy_id = %request.get_ref().policy_id))]
    async fn delete_policy(
        &self,
        request: Request<DeletePolicyRequest>,
    ) -> Result<Response<DeletePolicyResponse>, Status> {
        let req = request.into_inner();
        require_policy_id(&req.policy_id)?;

        let counters_removed = self.rate_limiter.delete_policy(&req.policy_id).await?;
        Ok(Response::new(DeletePolicyResponse {
            policy_id: req.policy_id,
            counters_removed,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ratelimit::LimiterSettings;
    use crate::store::MemoryStore;

    fn service() -> QuotaServiceImpl {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let limiter = RateLimiter::with_clock(store.clone(), store, LimiterSettings::default(), clock);
        QuotaServiceImpl::new(Arc::new(limiter))
    }

    async fn create(service: &QuotaServiceImpl, algorithm: &str, limit: i64, window: i64) -> String {
        service
            .create_policy(Request::new(CreatePolicyRequest {
                limit,
                window_seconds: window,
                algorithm: algorithm.to_string(),
            }))
            .await
            .unwrap()
            .into_inner()
            .policy_id
    }

    fn check_request(policy_id: &str, identifier: &str) -> Request<CheckRequest> {
        Request::new(CheckRequest {
            policy_id: policy_id.to_string(),
            identifier: identifier.to_string(),
            cost: None,
        })
    }

    #[tokio::test]
    async fn test_check_allowed_then_over_limit() {
        let service = service();
        let id = create(&service, "sliding_window", 1, 30).await;

        let response = service.check(check_request(&id, "u1")).await.unwrap();
        assert!(response.metadata().get("retry-after").is_none());
        assert_eq!(response.metadata().get("x-ratelimit-remaining").unwrap(), "0");
        let body = response.into_inner();
        assert!(body.allowed);
        assert_eq!(body.code(), Code::Ok);
        assert_eq!(body.limit, 1);
        assert_eq!(body.window_seconds, 30);
        assert_eq!(body.duration_until_reset.unwrap().seconds, 30);

        let response = service.check(check_request(&id, "u1")).await.unwrap();
        assert_eq!(response.metadata().get("retry-after").unwrap(), "30");
        let body = response.into_inner();
        assert!(!body.allowed);
        assert_eq!(body.code(), Code::OverLimit);
        assert_eq!(body.retry_after_seconds, 30);
    }

    #[tokio::test]
    async fn test_check_unknown_policy_not_found() {
        let service = service();
        let status = service.check(check_request("nope", "u1")).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn test_create_policy_rejects_invalid() {
        let service = service();
        let status = service
            .create_policy(Request::new(CreatePolicyRequest {
                limit: 0,
                window_seconds: 10,
                algorithm: "sliding_window".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status = service
            .create_policy(Request::new(CreatePolicyRequest {
                limit: 10,
                window_seconds: 10,
                algorithm: "round_robin".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_get_and_delete_policy() {
        let service = service();
        let id = create(&service, "TOKEN_BUCKET", 60, 60).await;

        let policy = service
            .get_policy(Request::new(GetPolicyRequest { policy_id: id.clone() }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(policy.policy_id, id);
        assert_eq!(policy.algorithm, "token_bucket");
        assert_eq!(policy.limit, 60);

        service.check(check_request(&id, "u1")).await.unwrap();

        let deleted = service
            .delete_policy(Request::new(DeletePolicyRequest { policy_id: id.clone() }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(deleted.counters_removed, 1);

        let status = service
            .get_policy(Request::new(GetPolicyRequest { policy_id: id.clone() }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);

        let status = service
            .delete_policy(Request::new(DeletePolicyRequest { policy_id: id }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn test_empty_policy_id_rejected() {
        let service = service();
        let status = service
            .get_policy(Request::new(GetPolicyRequest { policy_id: String::new() }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }
}
