use std::time::Duration;

use crate::config::helpers::{parse_bool_env, parse_duration_env, parse_optional_env};
use crate::error::ConfigError;

/// Startup, reservation and shutdown timing.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// How long to wait for the readiness marker after launching the server.
    pub ready_timeout: Duration,
    /// Pause between the SDK shutdown call and cancelling the loops.
    pub shutdown_grace: Duration,
    /// Upper bound on total teardown time.
    pub shutdown_timeout: Duration,
    /// Reservation length; the reservation loop renews at half this interval.
    pub reserve_duration: Duration,
    /// Allocate on first player connect and release on last disconnect.
    pub player_driven_allocation: bool,
    /// Number of finished sessions kept in memory.
    pub session_history: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(120),
            shutdown_grace: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(8),
            reserve_duration: Duration::from_secs(600),
            player_driven_allocation: false,
            session_history: 10,
        }
    }
}

impl LifecycleConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let reserve_duration = parse_duration_env("RESERVE_DURATION", defaults.reserve_duration)?;
        if reserve_duration < Duration::from_secs(2) {
            return Err(ConfigError::InvalidValue {
                key: "RESERVE_DURATION".to_string(),
                message: "must be at least 2s".to_string(),
            });
        }

        Ok(Self {
            ready_timeout: parse_duration_env("READY_TIMEOUT", defaults.ready_timeout)?,
            shutdown_grace: parse_duration_env("SHUTDOWN_GRACE", defaults.shutdown_grace)?,
            shutdown_timeout: parse_duration_env("SHUTDOWN_TIMEOUT", defaults.shutdown_timeout)?,
            reserve_duration,
            player_driven_allocation: parse_bool_env(
                "PLAYER_DRIVEN_ALLOCATION",
                defaults.player_driven_allocation,
            )?,
            session_history: parse_optional_env("SESSION_HISTORY", defaults.session_history)?,
        })
    }

    /// Interval at which the reservation is renewed.
    pub fn reserve_interval(&self) -> Duration {
        self.reserve_duration / 2
    }
}
