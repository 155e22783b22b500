use std::time::Duration;

use crate::config::helpers::{parse_duration_env, parse_optional_env};
use crate::error::ConfigError;

/// Health ping and liveness settings.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Interval between SDK health pings.
    pub interval: Duration,
    /// Consecutive ping failures before the sidecar shuts down (0 = never).
    pub failure_threshold: u32,
    /// Liveness fails once the last successful ping is older than this.
    pub max_ping_age: Duration,
    /// Port of the liveness endpoint.
    pub port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            failure_threshold: 5,
            max_ping_age: Duration::from_secs(10),
            port: 9001,
        }
    }
}

impl HealthConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let interval = parse_duration_env("HEALTH_INTERVAL", defaults.interval)?;
        if interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "HEALTH_INTERVAL".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            interval,
            failure_threshold: parse_optional_env(
                "HEALTH_FAILURE_THRESHOLD",
                defaults.failure_threshold,
            )?,
            max_ping_age: parse_duration_env("LIVENESS_MAX_PING_AGE", defaults.max_ping_age)?,
            port: parse_optional_env("HEALTH_PORT", defaults.port)?,
        })
    }

    /// Whether ping failures can ever end the process.
    pub fn failures_are_fatal(&self) -> bool {
        self.failure_threshold > 0
    }
}
