//! Caller identity as seen by the guard.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ratelimit::{ANONYMOUS_SUBJECT, GUEST_ROLE};

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub role: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: role.into(),
        }
    }
}

/// The resolved caller of a guarded operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Authenticated(Identity),
    Anonymous,
}

impl Caller {
    /// Subject used in the rate limit key.
    pub fn subject(&self) -> &str {
        match self {
            Caller::Authenticated(identity) => &identity.user_id,
            Caller::Anonymous => ANONYMOUS_SUBJECT,
        }
    }

    /// Role used to pick the multiplier.
    pub fn role(&self) -> &str {
        match self {
            Caller::Authenticated(identity) => &identity.role,
            Caller::Anonymous => GUEST_ROLE,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Caller::Authenticated(identity) => Some(identity),
            Caller::Anonymous => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Caller::Authenticated(_))
    }
}

impl From<Option<Identity>> for Caller {
    fn from(identity: Option<Identity>) -> Self {
        identity.map_or(Caller::Anonymous, Caller::Authenticated)
    }
}

/// Looks up the caller for a request context.
///
/// Supplied by the surrounding authentication layer. `Ok(None)` means the
/// request carries no credentials.
#[async_trait]
pub trait IdentityResolver<C: ?Sized + Sync>: Send + Sync {
    async fn resolve(&self, ctx: &C) -> Result<Option<Identity>>;
}

#[async_trait]
impl<C, F> IdentityResolver<C> for F
where
    C: ?Sized + Sync,
    F: Fn(&C) -> Result<Option<Identity>> + Send + Sync,
{
    async fn resolve(&self, ctx: &C) -> Result<Option<Identity>> {
        self(ctx)
    }
}
