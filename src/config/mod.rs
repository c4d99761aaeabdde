//! Configuration loading and parsing.
//!
//! This module provides YAML-based harness configuration and the timeout
//! policy derived from it.

mod timeout;
mod yaml;

pub use timeout::TimeoutPolicy;
pub use yaml::{
    ConfigError, ConfigLoader, HarnessConfig, QueueReuse, ENV_CONSTRAINED, ENV_SHARE_QUEUES,
    ENV_TIMEOUT_SECS,
};
