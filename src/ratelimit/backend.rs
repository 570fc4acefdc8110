//! Rate limiter trait for abstracting local and remote implementations.

use async_trait::async_trait;
use std::sync::Arc;

use super::store::RateStore;
use super::tracker::{Admission, RateLimitStatus, RateTracker};
use crate::error::Result;

/// Trait for rate limiter implementations.
///
/// This trait abstracts over an in-process `RateTracker` and the
/// `RemoteRateLimiter` client so the guard can work with either.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Admit or deny one event for `key` under `operation`.
    async fn check(&self, operation: &str, key: &str, role: Option<&str>) -> Result<Admission>;

    /// Forget every event recorded for `key` under `operation`.
    async fn reset(&self, operation: &str, key: &str) -> Result<()>;

    /// Report window usage without recording an event.
    async fn status(&self, operation: &str, key: &str, role: Option<&str>) -> Result<RateLimitStatus>;
}

#[async_trait]
impl<S: RateStore> RateLimiterBackend for RateTracker<S> {
    async fn check(&self, operation: &str, key: &str, role: Option<&str>) -> Result<Admission> {
        RateTracker::check(self, operation, key, role).await
    }

    async fn reset(&self, operation: &str, key: &str) -> Result<()> {
        RateTracker::reset(self, operation, key).await
    }

    async fn status(&self, operation: &str, key: &str, role: Option<&str>) -> Result<RateLimitStatus> {
        RateTracker::status(self, operation, key, role).await
    }
}

#[async_trait]
impl<B: RateLimiterBackend + ?Sized> RateLimiterBackend for Arc<B> {
    async fn check(&self, operation: &str, key: &str, role: Option<&str>) -> Result<Admission> {
        (**self).check(operation, key, role).await
    }

    async fn reset(&self, operation: &str, key: &str) -> Result<()> {
        (**self).reset(operation, key).await
    }

    async fn status(&self, operation: &str, key: &str, role: Option<&str>) -> Result<RateLimitStatus> {
        (**self).status(operation, key, role).await
    }
}
