//! Rate limit key generation.

/// Subject used for callers with no resolved identity.
pub const ANONYMOUS_SUBJECT: &str = "anonymous";

/// A key that uniquely identifies one rolling window.
///
/// The key is composed of the operation name and the caller subject
/// (a user id, or [`ANONYMOUS_SUBJECT`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RateKey {
    /// The operation this window belongs to
    pub operation: String,
    /// The caller the window is tracked for
    pub subject: String,
}

impl RateKey {
    /// Create a new key from an operation and subject.
    pub fn new(operation: &str, subject: &str) -> Self {
        Self {
            operation: operation.to_string(),
            subject: subject.to_string(),
        }
    }

    /// Key for an unauthenticated caller.
    pub fn anonymous(operation: &str) -> Self {
        Self::new(operation, ANONYMOUS_SUBJECT)
    }

    pub fn is_anonymous(&self) -> bool {
        self.subject == ANONYMOUS_SUBJECT
    }
}

impl std::fmt::Display for RateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.operation, self.subject)
    }
}
