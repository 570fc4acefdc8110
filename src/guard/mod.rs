//! Rate limiting guard for write handlers.
//!
//! A guard resolves who is calling, checks that caller's window for the
//! guarded operation, and only then runs the wrapped handler.

mod identity;
mod rate_limited;

pub use identity::{Caller, Identity, IdentityResolver};
pub use rate_limited::{handler_fn, HandlerFn, RateLimitedHandler, WriteHandler};
