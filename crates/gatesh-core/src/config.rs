//! Configuration parsing.
//!
//! `gatesh.toml` carries the policy defaults applied to absent gate fields and
//! the daemon's runtime settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policy::PolicyDefaults;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateshConfig {
    /// Defaults applied to absent policy fields.
    #[serde(default)]
    pub defaults: PolicyDefaults,

    /// Daemon runtime settings.
    #[serde(default)]
    pub daemon: DaemonConfig,
}

/// Daemon runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Manifest files or directories to load gates and objects from.
    #[serde(default)]
    pub manifests: Vec<PathBuf>,

    /// Gates evaluated concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How often the worker pool looks for due gates.
    #[serde(default = "default_tick_interval", with = "humantime_serde")]
    pub tick_interval: Duration,

    /// Timeout for resolving one target.
    #[serde(default = "default_target_timeout", with = "humantime_serde")]
    pub target_timeout: Duration,

    /// Port of the `/metrics` endpoint.
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

const fn default_workers() -> usize {
    4
}

const fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}

const fn default_target_timeout() -> Duration {
    Duration::from_secs(10)
}

const fn default_metrics_port() -> u16 {
    9100
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            manifests: Vec::new(),
            workers: default_workers(),
            tick_interval: default_tick_interval(),
            target_timeout: default_target_timeout(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl GateshConfig {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a value is out of range.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Rejects values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Validation(msg.to_string()));
        if self.daemon.workers == 0 {
            return invalid("daemon.workers must be at least 1");
        }
        if self.daemon.tick_interval.is_zero() {
            return invalid("daemon.tick_interval must be greater than zero");
        }
        if self.daemon.target_timeout.is_zero() {
            return invalid("daemon.target_timeout must be greater than zero");
        }
        if self.defaults.consolidation_count == 0 {
            return invalid("defaults.consolidation_count must be at least 1");
        }
        if self.defaults.evaluation_period.is_zero() {
            return invalid("defaults.evaluation_period must be greater than zero");
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = GateshConfig::from_toml("").unwrap();
        assert_eq!(config, GateshConfig::default());
        assert_eq!(config.defaults.evaluation_period, Duration::from_secs(60));
        assert_eq!(config.daemon.workers, 4);
        assert_eq!(config.daemon.metrics_port, 9100);
    }

    #[test]
    fn parses_humantime_durations() {
        let config = GateshConfig::from_toml(
            r#"
            [defaults]
            evaluation_period = "2m"
            consolidation_count = 3
            consolidation_delay = "15s"

            [daemon]
            manifests = ["gates/", "objects.yaml"]
            workers = 8
            tick_interval = "500ms"
            target_timeout = "3s"
            "#,
        )
        .unwrap();
        assert_eq!(config.defaults.evaluation_period, Duration::from_secs(120));
        assert_eq!(config.defaults.consolidation_count, 3);
        assert_eq!(config.daemon.manifests.len(), 2);
        assert_eq!(config.daemon.tick_interval, Duration::from_millis(500));
        assert_eq!(config.daemon.target_timeout, Duration::from_secs(3));
    }

    #[test]
    fn rejects_out_of_range_values() {
        for bad in [
            "[daemon]\nworkers = 0",
            "[daemon]\ntick_interval = \"0s\"",
            "[defaults]\nconsolidation_count = 0",
            "[defaults]\nevaluation_period = \"0s\"",
        ] {
            assert!(
                matches!(GateshConfig::from_toml(bad), Err(ConfigError::Validation(_))),
                "{bad} should be rejected"
            );
        }
        assert!(matches!(
            GateshConfig::from_toml("[daemon]\nworkers = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn toml_survives_a_file_round_trip() {
        let mut config = GateshConfig::default();
        config.daemon.workers = 2;
        config.defaults.consolidation_delay = Duration::from_secs(30);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml().unwrap().as_bytes()).unwrap();
        assert_eq!(GateshConfig::from_file(file.path()).unwrap(), config);
    }
}
