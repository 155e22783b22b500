use std::time::Duration;

use crate::config::helpers::{parse_duration_env, parse_optional_env};
use crate::error::ConfigError;

/// Metrics endpoint and periodic sampling settings.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Port of the `/metrics` endpoint.
    pub metrics_port: u16,
    /// Full export pass interval.
    pub export_interval: Duration,
    /// High-frequency performance sampling interval.
    pub perf_interval: Duration,
    /// Capacity of the performance sample queue.
    pub perf_queue_capacity: usize,
    /// Resource (CPU / RSS) sampling interval.
    pub resource_interval: Duration,
    /// Maximum concurrent resource samples.
    pub resource_workers: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_port: 9090,
            export_interval: Duration::from_secs(30),
            perf_interval: Duration::from_millis(100),
            perf_queue_capacity: 100,
            resource_interval: Duration::from_secs(10),
            resource_workers: 2,
        }
    }
}

impl TelemetryConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            metrics_port: parse_optional_env("METRICS_PORT", defaults.metrics_port)?,
            export_interval: parse_duration_env("METRICS_INTERVAL", defaults.export_interval)?,
            perf_interval: parse_duration_env("PERF_INTERVAL", defaults.perf_interval)?,
            perf_queue_capacity: parse_optional_env(
                "PERF_QUEUE_CAPACITY",
                defaults.perf_queue_capacity,
            )?
            .max(1),
            resource_interval: parse_duration_env("RESOURCE_INTERVAL", defaults.resource_interval)?,
            resource_workers: parse_optional_env("RESOURCE_WORKERS", defaults.resource_workers)?
                .max(1),
        };

        for (key, value) in [
            ("METRICS_INTERVAL", config.export_interval),
            ("PERF_INTERVAL", config.perf_interval),
            ("RESOURCE_INTERVAL", config.resource_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }

        Ok(config)
    }
}
