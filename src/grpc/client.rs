//! Client backend for a remote RateKeeper service.

use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

use super::proto::ratekeeper::v1::{
    check_response::Code, rate_keeper_client::RateKeeperClient, CheckRequest, ResetRequest,
    StatusRequest,
};
use super::{error_from_status, from_proto_duration};
use crate::error::{RateKeeperError, Result};
use crate::ratelimit::{Admission, RateLimitStatus, RateLimiterBackend};

/// A [`RateLimiterBackend`] that asks a shared RateKeeper service.
///
/// Every application instance pointing at the same service shares one set of
/// windows. Each check is a single RPC with no retry.
#[derive(Debug, Clone)]
pub struct RemoteRateLimiter {
    client: RateKeeperClient<Channel>,
}

impl RemoteRateLimiter {
    /// Connect to a service, e.g. `http://127.0.0.1:8081`.
    pub async fn connect(endpoint: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        info!(endpoint = %endpoint, "Connecting to remote rate limiter");

        let channel = Endpoint::from_shared(endpoint)
            .map_err(RateKeeperError::Grpc)?
            .connect()
            .await?;
        Ok(Self::from_channel(channel))
    }

    pub fn from_channel(channel: Channel) -> Self {
        Self {
            client: RateKeeperClient::new(channel),
        }
    }
}

#[async_trait]
impl RateLimiterBackend for RemoteRateLimiter {
    async fn check(&self, operation: &str, key: &str, role: Option<&str>) -> Result<Admission> {
        let response = self
            .client
            .clone()
            .check(CheckRequest {
                operation: operation.to_string(),
                key: key.to_string(),
                role: role.unwrap_or_default().to_string(),
            })
            .await
            .map_err(error_from_status)?
            .into_inner();

        match response.code() {
            Code::Ok => Ok(Admission {
                limit: response.limit,
                remaining: response.remaining,
                reset_after: from_proto_duration(response.reset_after),
            }),
            Code::OverLimit => {
                debug!(operation = %operation, key = %key, "Remote rate limit exceeded");
                Err(RateKeeperError::RateLimited {
                    operation: operation.to_string(),
                    retry_after: from_proto_duration(response.retry_after),
                })
            }
            Code::Unknown => Err(RateKeeperError::Remote(tonic::Status::internal(
                "remote rate limiter returned no decision",
            ))),
        }
    }

    async fn reset(&self, operation: &str, key: &str) -> Result<()> {
        self.client
            .clone()
            .reset(ResetRequest {
                operation: operation.to_string(),
                key: key.to_string(),
            })
            .await
            .map_err(error_from_status)?;
        Ok(())
    }

    async fn status(&self, operation: &str, key: &str, role: Option<&str>) -> Result<RateLimitStatus> {
        let response = self
            .client
            .clone()
            .status(StatusRequest {
                operation: operation.to_string(),
                key: key.to_string(),
                role: role.unwrap_or_default().to_string(),
            })
            .await
            .map_err(error_from_status)?
            .into_inner();

        Ok(RateLimitStatus {
            limit: response.limit,
            used: response.used,
            remaining: response.remaining,
            window: from_proto_duration(response.window),
            reset_after: from_proto_duration(response.reset_after),
        })
    }
}
