//! Rate limiting as a wrapper around write handlers.

use async_trait::async_trait;
use std::future::Future;
use tracing::{trace, warn};

use super::identity::{Caller, IdentityResolver};
use crate::error::RateKeeperError;
use crate::ratelimit::RateLimiterBackend;

/// A write operation that receives the resolved caller.
///
/// Handler errors must be able to carry a [`RateKeeperError`] so the guard can
/// hand rejections back through the same channel.
#[async_trait]
pub trait WriteHandler<C: ?Sized + Sync, A: Send + 'static>: Send + Sync {
    type Output: Send;
    type Error: From<RateKeeperError> + Send;

    async fn handle(&self, ctx: &C, args: A, caller: &Caller) -> Result<Self::Output, Self::Error>;
}

/// A [`WriteHandler`] built from an async function of the args and the caller.
///
/// The request context is not passed on; use a struct impl when the handler
/// needs it.
pub struct HandlerFn<F>(F);

/// Adapt `f` into a [`WriteHandler`].
pub fn handler_fn<F>(f: F) -> HandlerFn<F> {
    HandlerFn(f)
}

#[async_trait]
impl<C, A, F, Fut, O, E> WriteHandler<C, A> for HandlerFn<F>
where
    C: ?Sized + Sync,
    A: Send + 'static,
    F: Fn(A, Caller) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, E>> + Send + 'static,
    O: Send,
    E: From<RateKeeperError> + Send,
{
    type Output = O;
    type Error = E;

    async fn handle(&self, _ctx: &C, args: A, caller: &Caller) -> Result<O, E> {
        (self.0)(args, caller.clone()).await
    }
}

/// Wraps a handler so every call is checked against the limit for `operation`.
///
/// [`call`](Self::call) resolves the caller, checks the limiter, and forwards
/// to the handler only on admission. Limiter errors are returned as they are;
/// nothing is retried.
///
/// Guards also implement [`WriteHandler`], so they nest. When nested, only the
/// outermost guard's resolver runs; inner guards reuse the caller it produced.
pub struct RateLimitedHandler<H, R, B> {
    operation: String,
    handler: H,
    resolver: R,
    limiter: B,
}

impl<H, R, B> RateLimitedHandler<H, R, B> {
    pub fn new(operation: impl Into<String>, handler: H, resolver: R, limiter: B) -> Self {
        Self {
            operation: operation.into(),
            handler,
            resolver,
            limiter,
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn inner(&self) -> &H {
        &self.handler
    }
}

impl<H, R, B> RateLimitedHandler<H, R, B>
where
    B: RateLimiterBackend,
{
    /// Resolve the caller, check the limit, then run the handler.
    pub async fn call<C, A>(&self, ctx: &C, args: A) -> Result<H::Output, H::Error>
    where
        C: ?Sized + Sync,
        A: Send + 'static,
        H: WriteHandler<C, A>,
        R: IdentityResolver<C>,
    {
        let caller = self.resolve_caller(ctx).await;
        self.guarded(ctx, args, &caller).await
    }

    /// Resolution failures count as unauthenticated; they never skip the check.
    async fn resolve_caller<C>(&self, ctx: &C) -> Caller
    where
        C: ?Sized + Sync,
        R: IdentityResolver<C>,
    {
        match self.resolver.resolve(ctx).await {
            Ok(identity) => Caller::from(identity),
            Err(e) => {
                warn!(
                    operation = %self.operation,
                    error = %e,
                    "Identity resolution failed, treating caller as anonymous"
                );
                Caller::Anonymous
            }
        }
    }

    async fn guarded<C, A>(&self, ctx: &C, args: A, caller: &Caller) -> Result<H::Output, H::Error>
    where
        C: ?Sized + Sync,
        A: Send + 'static,
        H: WriteHandler<C, A>,
    {
        self.limiter
            .check(&self.operation, caller.subject(), Some(caller.role()))
            .await?;

        trace!(
            operation = %self.operation,
            subject = caller.subject(),
            "Rate limit passed, invoking handler"
        );

        self.handler.handle(ctx, args, caller).await
    }
}

#[async_trait]
impl<C, A, H, R, B> WriteHandler<C, A> for RateLimitedHandler<H, R, B>
where
    C: ?Sized + Sync,
    A: Send + 'static,
    H: WriteHandler<C, A>,
    R: Send + Sync,
    B: RateLimiterBackend,
{
    type Output = H::Output;
    type Error = H::Error;

    async fn handle(&self, ctx: &C, args: A, caller: &Caller) -> Result<Self::Output, Self::Error> {
        self.guarded(ctx, args, caller).await
    }
}
