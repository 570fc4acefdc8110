//! Configuration management for Ratekeeper.
//!
//! Settings come from an optional YAML file, then from `RATEKEEPER__*`
//! environment variables (`RATEKEEPER__SERVER__GRPC_ADDR=0.0.0.0:8081`).

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::error::{RateKeeperError, Result};
use crate::ratelimit::TrackerSettings;

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "RATEKEEPER";

/// Main configuration for the Ratekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatekeeperConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// gRPC server address
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
        }
    }
}

fn default_grpc_addr() -> SocketAddr {
    (Ipv4Addr::LOCALHOST, 8081).into()
}

/// Which store holds the event logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Sharded concurrent map
    #[default]
    Memory,
    /// Single owner task behind a channel
    Actor,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Path to the rules file; the built-in table is used when unset
    pub rules_path: Option<String>,

    /// Event log store
    #[serde(default)]
    pub store: StoreKind,

    /// Chance that a check also sweeps stale keys
    #[serde(default = "default_sweep_probability")]
    pub sweep_probability: f64,

    /// Events older than this many seconds are dropped by sweeps
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Period of the background sweep in seconds; 0 disables it
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            store: StoreKind::default(),
            sweep_probability: default_sweep_probability(),
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_sweep_probability() -> f64 {
    0.01
}

fn default_retention_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl RateLimitingConfig {
    /// Tracker housekeeping settings derived from this section.
    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            sweep_probability: self.sweep_probability,
            retention: Duration::from_secs(self.retention_secs),
        }
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,

    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl RatekeeperConfig {
    /// Load configuration from an optional file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: RatekeeperConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RateKeeperError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        Self::load(Some(Path::new(path)))
    }

    pub fn validate(&self) -> Result<()> {
        let p = self.rate_limiting.sweep_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(RateKeeperError::Config(format!(
                "sweep_probability must be between 0 and 1, got {}",
                p
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RatekeeperConfig::default();
        assert_eq!(config.server.grpc_addr, "127.0.0.1:8081".parse().unwrap());
        assert_eq!(config.rate_limiting.store, StoreKind::Memory);
        assert_eq!(config.rate_limiting.sweep_interval(), Some(Duration::from_secs(300)));
        assert_eq!(
            config.rate_limiting.tracker_settings().retention,
            Duration::from_secs(3600)
        );
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_load_from_yaml_file() {
        let path = std::env::temp_dir().join(format!("ratekeeper-config-{}.yaml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
server:
  grpc_addr: "0.0.0.0:9000"
rate_limiting:
  store: actor
  sweep_probability: 0.5
  sweep_interval_secs: 0
logging:
  format: json
"#
        )
        .unwrap();

        let config = RatekeeperConfig::from_file(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.server.grpc_addr.port(), 9000);
        assert_eq!(config.rate_limiting.store, StoreKind::Actor);
        assert_eq!(config.rate_limiting.sweep_probability, 0.5);
        assert_eq!(config.rate_limiting.sweep_interval(), None);
        assert_eq!(config.rate_limiting.retention_secs, 3600);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_probability_rejected() {
        let mut config = RatekeeperConfig::default();
        config.rate_limiting.sweep_probability = 1.5;
        assert!(config.validate().unwrap_err().is_configuration_error());
    }
}
