use std::time::Duration;

use crate::config::helpers::{optional_env, parse_duration_env, parse_optional_env};
use crate::error::ConfigError;

/// Connection settings for the Agones SDK sidecar.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Host of the SDK REST gateway.
    pub host: String,
    /// Port of the SDK REST gateway.
    pub port: u16,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Consecutive failures before the circuit opens.
    pub circuit_max_failures: u32,
    /// Time since the last failure after which an open circuit closes again.
    pub circuit_cooldown: Duration,
    /// Labels applied to the GameServer at startup.
    pub labels: Vec<(String, String)>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 9358,
            request_timeout: Duration::from_secs(5),
            circuit_max_failures: 5,
            circuit_cooldown: Duration::from_secs(30),
            labels: vec![
                ("game".to_string(), "assetto-corsa".to_string()),
                ("version".to_string(), "1.0".to_string()),
                ("type".to_string(), "racing".to_string()),
                ("region".to_string(), "weu".to_string()),
            ],
        }
    }
}

impl OrchestratorConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let mut labels = Vec::with_capacity(defaults.labels.len());
        for (key, default_value) in defaults.labels {
            let env_key = format!("SERVER_LABEL_{}", key.to_ascii_uppercase());
            let value = optional_env(&env_key)?.unwrap_or(default_value);
            labels.push((key, value));
        }

        Ok(Self {
            host: optional_env("AGONES_SDK_HTTP_HOST")?.unwrap_or(defaults.host),
            port: parse_optional_env("AGONES_SDK_HTTP_PORT", defaults.port)?,
            request_timeout: parse_duration_env("SDK_REQUEST_TIMEOUT", defaults.request_timeout)?,
            circuit_max_failures: parse_optional_env(
                "CIRCUIT_MAX_FAILURES",
                defaults.circuit_max_failures,
            )?
            .max(1),
            circuit_cooldown: parse_duration_env("CIRCUIT_COOLDOWN", defaults.circuit_cooldown)?,
            labels,
        })
    }

    /// Base URL of the SDK REST gateway.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Token bucket settings per operation class.
#[derive(Debug, Clone, Copy)]
pub struct BucketConfig {
    /// Tokens added per second.
    pub per_second: f64,
    /// Bucket capacity.
    pub burst: u32,
}

/// Rate limits guarding SDK calls and local work.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub health: BucketConfig,
    pub metrics: BucketConfig,
    pub command: BucketConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            health: BucketConfig {
                per_second: 1.0,
                burst: 2,
            },
            metrics: BucketConfig {
                per_second: 0.2,
                burst: 1,
            },
            command: BucketConfig {
                per_second: 10.0,
                burst: 10,
            },
        }
    }
}

impl RateLimitConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            health: resolve_bucket("HEALTH", defaults.health)?,
            metrics: resolve_bucket("METRICS", defaults.metrics)?,
            command: resolve_bucket("COMMAND", defaults.command)?,
        })
    }
}

fn resolve_bucket(class: &str, defaults: BucketConfig) -> Result<BucketConfig, ConfigError> {
    let rate_key = format!("RATE_{class}_PER_SEC");
    let per_second: f64 = parse_optional_env(&rate_key, defaults.per_second)?;
    if !(per_second.is_finite() && per_second > 0.0) {
        return Err(ConfigError::InvalidValue {
            key: rate_key,
            message: "must be a positive number".to_string(),
        });
    }
    Ok(BucketConfig {
        per_second,
        burst: parse_optional_env(&format!("RATE_{class}_BURST"), defaults.burst)?.max(1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url() {
        let config = OrchestratorConfig {
            host: "127.0.0.1".to_string(),
            port: 59358,
            ..Default::default()
        };
        assert_eq!(config.base_url(), "http://127.0.0.1:59358");
    }

    #[test]
    fn test_default_labels() {
        let config = OrchestratorConfig::default();
        assert!(
            config
                .labels
                .iter()
                .any(|(k, v)| k == "game" && v == "assetto-corsa")
        );
        assert_eq!(config.labels.len(), 4);
    }
}
