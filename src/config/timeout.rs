//! Timeout policy for asynchronous waits.

use std::time::Duration;

use tracing::warn;

use super::yaml::{ConfigLoader, HarnessConfig};

/// Bound applied to every asynchronous wait in a conformance check.
///
/// The base timeout is stretched by a multiplier when the harness runs on
/// throughput-constrained hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub base: Duration,
    pub constrained_multiplier: u32,
    pub constrained: bool,
}

impl TimeoutPolicy {
    pub const DEFAULT_BASE: Duration = Duration::from_secs(10);
    pub const DEFAULT_CONSTRAINED_MULTIPLIER: u32 = 3;

    /// Policy from defaults and `OPCHECK_*` environment overrides.
    ///
    /// Invalid environment values are ignored in favour of the defaults.
    pub fn detect() -> Self {
        Self::detect_with(|var| std::env::var(var).ok())
    }

    fn detect_with(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let config = ConfigLoader::apply_env(HarnessConfig::default(), lookup)
            .and_then(|config| ConfigLoader::validate(&config).map(|()| config));
        match config {
            Ok(config) => config.timeout_policy(),
            Err(e) => {
                warn!(error = %e, "ignoring timeout overrides from the environment");
                Self::default()
            }
        }
    }

    /// The effective timeout, saturating at [`Duration::MAX`].
    pub fn timeout(&self) -> Duration {
        if self.constrained {
            self.base
                .checked_mul(self.constrained_multiplier.max(1))
                .unwrap_or(Duration::MAX)
        } else {
            self.base
        }
    }

    /// Whether the build target is a mobile ARM platform.
    pub fn is_constrained_target() -> bool {
        cfg!(all(
            any(target_arch = "arm", target_arch = "aarch64"),
            any(
                target_os = "ios",
                target_os = "watchos",
                target_os = "tvos",
                target_os = "android"
            )
        ))
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            base: Self::DEFAULT_BASE,
            constrained_multiplier: Self::DEFAULT_CONSTRAINED_MULTIPLIER,
            constrained: Self::is_constrained_target(),
        }
    }
}
