//! RateKeeper gRPC service implementation.

use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument, warn};

use super::proto::ratekeeper::v1::{
    check_response::Code, rate_keeper_server::RateKeeper, CheckRequest, CheckResponse,
    ResetRequest, ResetResponse, StatusRequest, StatusResponse,
};
use super::{status_from_error, to_proto_duration};
use crate::error::RateKeeperError;
use crate::ratelimit::RateLimiterBackend;

/// Implementation of the RateKeeper gRPC interface over any backend.
pub struct RateKeeperService<R: RateLimiterBackend> {
    /// The rate limiter instance
    rate_limiter: Arc<R>,
}

impl<R: RateLimiterBackend> RateKeeperService<R> {
    /// Create a new service with the given rate limiter.
    pub fn new(rate_limiter: Arc<R>) -> Self {
        Self { rate_limiter }
    }
}

fn require_operation(operation: &str) -> Result<(), Status> {
    if operation.is_empty() {
        warn!("Received rate limit request with empty operation");
        return Err(Status::invalid_argument("operation is required"));
    }
    Ok(())
}

fn role_of(role: &str) -> Option<&str> {
    (!role.is_empty()).then_some(role)
}

#[tonic::async_trait]
impl<R: RateLimiterBackend + 'static> RateKeeper for RateKeeperService<R> {
    /// Record one event if it fits, or report how long to wait.
    #[instrument(
        skip(self, request),
        fields(
            operation = %request.get_ref().operation,
            key = %request.get_ref().key,
            role = %request.get_ref().role
        )
    )]
    async fn check(
        &self,
        request: Request<CheckRequest>,
    ) -> Result<Response<CheckResponse>, Status> {
        let req = request.into_inner();
        require_operation(&req.operation)?;
        let role = role_of(&req.role);

        let response = match self.rate_limiter.check(&req.operation, &req.key, role).await {
            Ok(admission) => CheckResponse {
                code: Code::Ok.into(),
                limit: admission.limit,
                remaining: admission.remaining,
                retry_after: None,
                message: String::new(),
                reset_after: Some(to_proto_duration(admission.reset_after)),
            },
            Err(err @ RateKeeperError::RateLimited { .. }) => {
                let retry_after = err.retry_after().unwrap_or_default();
                let limit = match self.rate_limiter.status(&req.operation, &req.key, role).await {
                    Ok(status) => status.limit,
                    Err(e) => {
                        warn!(error = %e, "Could not read limit for over-limit response");
                        0
                    }
                };
                CheckResponse {
                    code: Code::OverLimit.into(),
                    limit,
                    remaining: 0,
                    retry_after: Some(to_proto_duration(retry_after)),
                    message: err.to_string(),
                    reset_after: None,
                }
            }
            Err(err) => {
                warn!(error = %err, "Rate limit check failed");
                return Err(status_from_error(err));
            }
        };

        debug!(
            operation = %req.operation,
            code = ?response.code(),
            remaining = response.remaining,
            "Rate limit decision made"
        );

        Ok(Response::new(response))
    }

    #[instrument(skip(self, request), fields(operation = %request.get_ref().operation))]
    async fn reset(
        &self,
        request: Request<ResetRequest>,
    ) -> Result<Response<ResetResponse>, Status> {
        let req = request.into_inner();
        require_operation(&req.operation)?;

        self.rate_limiter
            .reset(&req.operation, &req.key)
            .await
            .map_err(status_from_error)?;

        info!(operation = %req.operation, key = %req.key, "Rate limit reset");
        Ok(Response::new(ResetResponse {}))
    }

    #[instrument(skip(self, request), fields(operation = %request.get_ref().operation))]
    async fn status(
        &self,
        request: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let req = request.into_inner();
        require_operation(&req.operation)?;

        let status = self
            .rate_limiter
            .status(&req.operation, &req.key, role_of(&req.role))
            .await
            .map_err(status_from_error)?;

        Ok(Response::new(StatusResponse {
            limit: status.limit,
            used: status.used,
            remaining: status.remaining,
            window: Some(to_proto_duration(status.window)),
            reset_after: Some(to_proto_duration(status.reset_after)),
        }))
    }
}
