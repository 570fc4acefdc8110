//! Error types for the Ratekeeper service.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Ratekeeper operations.
///
/// Configuration errors (`Config`, `UnknownOperation`) are deployment defects and
/// should fail loudly. `RateLimited` is the expected, user-facing rejection.
#[derive(Error, Debug)]
pub enum RateKeeperError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// An operation name with no entry in the limit table
    #[error("Configuration error: unknown rate limit operation `{0}`")]
    UnknownOperation(String),

    /// The caller has used up the window for this operation
    #[error(
        "Rate limit exceeded for {operation}. Try again in {} seconds.",
        whole_seconds(.retry_after)
    )]
    RateLimited {
        operation: String,
        retry_after: Duration,
    },

    /// The caller's identity could not be established
    #[error("Identity resolution failed: {0}")]
    Identity(String),

    /// The state store stopped accepting requests
    #[error("Rate limit store is unavailable")]
    StoreUnavailable,

    /// Error status returned by a remote rate limit service
    #[error("Remote rate limiter error: {0}")]
    Remote(#[from] tonic::Status),

    /// gRPC transport errors
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::transport::Error),

    /// Rules file parse errors
    #[error("Failed to parse rate limit rules: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RateKeeperError {
    /// True for the recoverable over-limit rejection.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RateKeeperError::RateLimited { .. })
    }

    /// True for errors caused by a missing or invalid limit configuration.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            RateKeeperError::Config(_) | RateKeeperError::UnknownOperation(_) | RateKeeperError::Yaml(_)
        )
    }

    /// Suggested wait before retrying, if this is an over-limit rejection.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RateKeeperError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Round a wait up to whole seconds, never reporting zero.
pub(crate) fn whole_seconds(duration: &Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 || secs == 0 {
        secs + 1
    } else {
        secs
    }
}

/// Result type alias for Ratekeeper operations.
pub type Result<T> = std::result::Result<T, RateKeeperError>;
