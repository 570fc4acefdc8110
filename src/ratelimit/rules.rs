//! Operation limits and role multipliers.
//!
//! The limit table maps each named write operation to a base budget, and each
//! role to a multiplier applied to that budget. It is loaded once at startup
//! (from YAML, or the built-in defaults) and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

use crate::error::{RateKeeperError, Result};

/// Role used when the caller does not supply one.
pub const BASE_ROLE: &str = "user";
/// Role assigned to unauthenticated callers.
pub const GUEST_ROLE: &str = "guest";

/// Multiplier for roles missing from the table.
const BASE_MULTIPLIER: u64 = 1;

/// Longest window whose millisecond count fits an epoch timestamp.
const MAX_WINDOW: Duration = Duration::from_millis(i64::MAX as u64);

/// Time unit for window lengths written by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of one unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

/// Window length, either in milliseconds (`window: 60000`) or by unit (`window: minute`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WindowSpec {
    Millis(u64),
    Unit(TimeUnit),
}

impl WindowSpec {
    pub fn duration(&self) -> Duration {
        match self {
            WindowSpec::Millis(ms) => Duration::from_millis(*ms),
            WindowSpec::Unit(unit) => unit.duration(),
        }
    }
}

/// Base limit for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationLimit {
    /// Events allowed per window for the base role
    pub max_events: u64,
    /// Length of the rolling window
    pub window: WindowSpec,
    /// Tokens one accepted event consumes
    #[serde(default = "default_tokens")]
    pub tokens: u64,
}

fn default_tokens() -> u64 {
    1
}

impl OperationLimit {
    pub fn new(max_events: u64, window_ms: u64) -> Self {
        Self {
            max_events,
            window: WindowSpec::Millis(window_ms),
            tokens: default_tokens(),
        }
    }
}

/// A limit after the caller's role multiplier has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLimit {
    /// Token capacity of the window
    pub max_events: u64,
    /// Length of the rolling window
    pub window: Duration,
    /// Tokens one accepted event consumes
    pub tokens: u64,
    /// Multiplier that was applied
    pub multiplier: u64,
}

/// The complete limit table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitTable {
    /// Operation name to base limit
    #[serde(default)]
    pub operations: BTreeMap<String, OperationLimit>,
    /// Role name to multiplier
    #[serde(default = "default_roles")]
    pub roles: BTreeMap<String, u64>,
    /// Role assumed when none is given
    #[serde(default = "default_base_role")]
    pub base_role: String,
}

fn default_roles() -> BTreeMap<String, u64> {
    [(GUEST_ROLE, 1), (BASE_ROLE, 1), ("premium", 5), ("admin", 100)]
        .into_iter()
        .map(|(role, multiplier)| (role.to_string(), multiplier))
        .collect()
}

fn default_base_role() -> String {
    BASE_ROLE.to_string()
}

impl Default for LimitTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl LimitTable {
    /// The table used when no rules file is configured.
    pub fn builtin() -> Self {
        const MINUTE_MS: u64 = 60_000;

        let operations = [
            ("SEND_MESSAGE", OperationLimit::new(10, MINUTE_MS)),
            ("CREATE_POST", OperationLimit::new(5, MINUTE_MS)),
            ("UPDATE_PROFILE", OperationLimit::new(20, MINUTE_MS)),
            ("DELETE_ITEM", OperationLimit::new(10, MINUTE_MS)),
            ("UPLOAD_FILE", OperationLimit::new(10, 60 * MINUTE_MS)),
            ("AUTH_ATTEMPT", OperationLimit::new(5, 15 * MINUTE_MS)),
        ]
        .into_iter()
        .map(|(name, limit)| (name.to_string(), limit))
        .collect();

        Self {
            operations,
            roles: default_roles(),
            base_role: default_base_role(),
        }
    }

    /// Load a table from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load a table from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let table: LimitTable = serde_yaml::from_str(yaml)?;
        table.validate()?;
        Ok(table)
    }

    /// Reject tables that could never admit anything sensibly.
    pub fn validate(&self) -> Result<()> {
        for (name, limit) in &self.operations {
            if name.is_empty() {
                return Err(RateKeeperError::Config(
                    "operation names must not be empty".to_string(),
                ));
            }
            let window = limit.window.duration();
            if window.is_zero() {
                return Err(RateKeeperError::Config(format!(
                    "operation `{}` has a zero-length window",
                    name
                )));
            }
            if window > MAX_WINDOW {
                return Err(RateKeeperError::Config(format!(
                    "operation `{}` has a window longer than {} ms",
                    name,
                    MAX_WINDOW.as_millis()
                )));
            }
            if limit.tokens == 0 {
                return Err(RateKeeperError::Config(format!(
                    "operation `{}` must consume at least one token per event",
                    name
                )));
            }
        }
        Ok(())
    }

    /// The longest window of any operation, or zero for an empty table.
    pub fn longest_window(&self) -> Duration {
        self.operations
            .values()
            .map(|limit| limit.window.duration())
            .max()
            .unwrap_or_default()
    }

    /// Multiplier for a role, falling back to the base multiplier.
    pub fn multiplier(&self, role: Option<&str>) -> u64 {
        let role = role.unwrap_or(&self.base_role);
        self.roles.get(role).copied().unwrap_or(BASE_MULTIPLIER)
    }

    /// Compute the effective limit for an operation and role.
    pub fn resolve(&self, operation: &str, role: Option<&str>) -> Result<ResolvedLimit> {
        let base = self.operations.get(operation).ok_or_else(|| {
            error!(operation = %operation, "Rate limit requested for unknown operation");
            RateKeeperError::UnknownOperation(operation.to_string())
        })?;

        let multiplier = self.multiplier(role);

        Ok(ResolvedLimit {
            max_events: base.max_events.saturating_mul(multiplier),
            window: base.window.duration(),
            tokens: base.tokens,
            multiplier,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_send_message() {
        let table = LimitTable::builtin();
        let limit = table.resolve("SEND_MESSAGE", Some("user")).unwrap();
        assert_eq!(limit.max_events, 10);
        assert_eq!(limit.window, Duration::from_secs(60));
        assert_eq!(limit.tokens, 1);
        assert_eq!(limit.multiplier, 1);
    }

    #[test]
    fn test_role_multiplier_applied() {
        let table = LimitTable::builtin();
        let limit = table.resolve("SEND_MESSAGE", Some("admin")).unwrap();
        assert_eq!(limit.max_events, 1000);
        assert_eq!(limit.window, Duration::from_secs(60));
    }

    #[test]
    fn test_unknown_role_uses_base_multiplier() {
        let table = LimitTable::builtin();
        let limit = table.resolve("CREATE_POST", Some("wizard")).unwrap();
        assert_eq!(limit.max_events, 5);
        assert_eq!(limit.multiplier, 1);
    }

    #[test]
    fn test_missing_role_uses_base_role() {
        let yaml = r#"
operations:
  SEND_MESSAGE:
    max_events: 3
    window: 1000
roles:
  member: 2
base_role: member
"#;
        let table = LimitTable::from_yaml(yaml).unwrap();
        assert_eq!(table.resolve("SEND_MESSAGE", None).unwrap().max_events, 6);
    }

    #[test]
    fn test_unknown_operation_is_configuration_error() {
        let table = LimitTable::builtin();
        let err = table.resolve("LAUNCH_ROCKET", Some("admin")).unwrap_err();
        assert!(matches!(err, RateKeeperError::UnknownOperation(ref op) if op == "LAUNCH_ROCKET"));
    }

    #[test]
    fn test_parse_window_forms() {
        let yaml = r#"
operations:
  SEND_MESSAGE:
    max_events: 10
    window: 60000
  UPLOAD_FILE:
    max_events: 3
    window: hour
    tokens: 2
"#;
        let table = LimitTable::from_yaml(yaml).unwrap();

        let send = table.resolve("SEND_MESSAGE", None).unwrap();
        assert_eq!(send.window, Duration::from_secs(60));

        let upload = table.resolve("UPLOAD_FILE", None).unwrap();
        assert_eq!(upload.window, Duration::from_secs(3600));
        assert_eq!(upload.tokens, 2);

        // Default roles are kept when the file omits them
        assert_eq!(table.multiplier(Some("admin")), 100);
    }

    #[test]
    fn test_zero_window_rejected() {
        let yaml = r#"
operations:
  BROKEN:
    max_events: 10
    window: 0
"#;
        let err = LimitTable::from_yaml(yaml).unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_window_beyond_timestamp_range_rejected() {
        for window in ["9223372036854775808", "18446744073709551615"] {
            let yaml = format!(
                "operations:\n  FOREVER:\n    max_events: 1\n    window: {}\n",
                window
            );
            let err = LimitTable::from_yaml(&yaml).unwrap_err();
            assert!(err.is_configuration_error(), "window {} accepted", window);
        }

        let yaml = "operations:\n  LONG:\n    max_events: 1\n    window: 9223372036854775807\n";
        assert!(LimitTable::from_yaml(yaml).is_ok());
    }

    #[test]
    fn test_longest_window() {
        assert_eq!(LimitTable::builtin().longest_window(), Duration::from_secs(3600));

        let empty = LimitTable {
            operations: BTreeMap::new(),
            ..LimitTable::builtin()
        };
        assert_eq!(empty.longest_window(), Duration::ZERO);
    }

    #[test]
    fn test_zero_tokens_rejected() {
        let yaml = r#"
operations:
  BROKEN:
    max_events: 10
    window: second
    tokens: 0
"#;
        assert!(LimitTable::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_multiplier_saturates() {
        let mut table = LimitTable::builtin();
        table.roles.insert("root".to_string(), u64::MAX);
        let limit = table.resolve("SEND_MESSAGE", Some("root")).unwrap();
        assert_eq!(limit.max_events, u64::MAX);
    }

    #[test]
    fn test_time_unit_duration() {
        assert_eq!(TimeUnit::Second.duration(), Duration::from_secs(1));
        assert_eq!(TimeUnit::Minute.duration(), Duration::from_secs(60));
        assert_eq!(TimeUnit::Hour.duration(), Duration::from_secs(3600));
        assert_eq!(TimeUnit::Day.duration(), Duration::from_secs(86400));
    }
}
