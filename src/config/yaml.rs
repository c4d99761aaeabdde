//! YAML configuration parsing.
//!
//! Harness settings come from three layers, later ones winning:
//! built-in defaults, an optional YAML file, then `OPCHECK_*` environment
//! variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::timeout::TimeoutPolicy;
use crate::core::queue::Concurrency;

/// Environment variable overriding the base timeout, in seconds.
pub const ENV_TIMEOUT_SECS: &str = "OPCHECK_TIMEOUT_SECS";
/// Environment variable forcing the constrained-hardware multiplier on or off.
pub const ENV_CONSTRAINED: &str = "OPCHECK_CONSTRAINED";
/// Environment variable selecting shared queues.
pub const ENV_SHARE_QUEUES: &str = "OPCHECK_SHARE_QUEUES";

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML.
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An environment variable held an unusable value.
    #[error("invalid value '{value}' for environment variable {var}")]
    InvalidEnv { var: String, value: String },
}

/// Whether checks get their own queue or reuse per-suite queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueReuse {
    /// A new queue for every check, named after the suite and check.
    #[default]
    Fresh,
    /// One serial and one concurrent queue per suite run.
    Shared,
}

/// Harness configuration (opcheck.yaml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Base timeout for asynchronous waits, in seconds.
    pub timeout_secs: f64,
    /// Multiplier applied on throughput-constrained hardware.
    pub constrained_multiplier: u32,
    /// Force constrained mode on or off; detected from the target when unset.
    pub constrained: Option<bool>,
    /// Queue reuse between checks.
    pub queue_reuse: QueueReuse,
    /// Budget of the "concurrent" queue kind; unbounded when unset.
    pub concurrent_limit: Option<usize>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: TimeoutPolicy::DEFAULT_BASE.as_secs_f64(),
            constrained_multiplier: TimeoutPolicy::DEFAULT_CONSTRAINED_MULTIPLIER,
            constrained: None,
            queue_reuse: QueueReuse::Fresh,
            concurrent_limit: None,
        }
    }
}

impl HarnessConfig {
    /// The timeout policy described by this configuration.
    ///
    /// A timeout that cannot be represented as a [`Duration`] falls back to
    /// [`TimeoutPolicy::DEFAULT_BASE`].
    pub fn timeout_policy(&self) -> TimeoutPolicy {
        let base = Duration::try_from_secs_f64(self.timeout_secs)
            .ok()
            .filter(|base| !base.is_zero())
            .unwrap_or(TimeoutPolicy::DEFAULT_BASE);
        TimeoutPolicy {
            base,
            constrained_multiplier: self.constrained_multiplier,
            constrained: self
                .constrained
                .unwrap_or_else(TimeoutPolicy::is_constrained_target),
        }
    }

    /// Concurrency budget for concurrent queues.
    pub fn concurrent_budget(&self) -> Concurrency {
        match self.concurrent_limit {
            Some(n) => Concurrency::Limited(n),
            None => Concurrency::Unbounded,
        }
    }

    /// Apply `OPCHECK_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        ConfigLoader::apply_env(self, |var| std::env::var(var).ok())
    }
}

/// YAML configuration loader.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<HarnessConfig, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<HarnessConfig, ConfigError> {
        let config: HarnessConfig = if yaml.trim().is_empty() {
            HarnessConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        Self::validate(&config)?;
        Ok(config)
    }

    /// Defaults, then the optional file, then the environment.
    pub fn resolve(path: Option<&Path>) -> Result<HarnessConfig, ConfigError> {
        let config = match path {
            Some(path) => Self::load(path)?,
            None => HarnessConfig::default(),
        };
        let config = config.with_env_overrides()?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Apply overrides using `lookup` to read variables.
    pub fn apply_env(
        mut config: HarnessConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<HarnessConfig, ConfigError> {
        if let Some(value) = lookup(ENV_TIMEOUT_SECS) {
            config.timeout_secs = value
                .trim()
                .parse::<f64>()
                .map_err(|_| invalid_env(ENV_TIMEOUT_SECS, &value))?;
        }
        if let Some(value) = lookup(ENV_CONSTRAINED) {
            config.constrained =
                Some(parse_bool(&value).ok_or_else(|| invalid_env(ENV_CONSTRAINED, &value))?);
        }
        if let Some(value) = lookup(ENV_SHARE_QUEUES) {
            let shared =
                parse_bool(&value).ok_or_else(|| invalid_env(ENV_SHARE_QUEUES, &value))?;
            config.queue_reuse = if shared {
                QueueReuse::Shared
            } else {
                QueueReuse::Fresh
            };
        }
        Ok(config)
    }

    /// Validate a configuration.
    pub fn validate(config: &HarnessConfig) -> Result<(), ConfigError> {
        let representable = Duration::try_from_secs_f64(config.timeout_secs).is_ok();
        if config.timeout_secs <= 0.0 || !representable {
            return Err(ConfigError::InvalidConfig(format!(
                "timeout_secs must be a positive number, got {}",
                config.timeout_secs
            )));
        }
        if config.constrained_multiplier == 0 {
            return Err(ConfigError::InvalidConfig(
                "constrained_multiplier must be at least 1".into(),
            ));
        }
        if config.concurrent_limit == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "concurrent_limit must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn invalid_env(var: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
