//! Configuration for the sidecar.
//!
//! Every section reads its own env vars through [`helpers`] and falls back to
//! defaults that match the production deployment. Command-line flags are
//! applied on top with [`Config::apply_cli`].

pub(crate) mod helpers;
mod health;
mod lifecycle;
mod orchestrator;
mod supervisor;
mod telemetry;

pub use health::HealthConfig;
pub use helpers::parse_duration;
pub use lifecycle::LifecycleConfig;
pub use orchestrator::{BucketConfig, OrchestratorConfig, RateLimitConfig};
pub use supervisor::SupervisorConfig;
pub use telemetry::TelemetryConfig;

use crate::cli::Cli;
use crate::config::helpers::optional_env;
use crate::error::ConfigError;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    fn resolve() -> Result<Self, ConfigError> {
        match optional_env("LOG_FORMAT")?.as_deref() {
            None | Some("pretty") | Some("text") => Ok(Self::Pretty),
            Some("json") => Ok(Self::Json),
            Some(other) => Err(ConfigError::InvalidValue {
                key: "LOG_FORMAT".to_string(),
                message: format!("expected 'pretty' or 'json', got '{other}'"),
            }),
        }
    }
}

/// Full sidecar configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub supervisor: SupervisorConfig,
    pub orchestrator: OrchestratorConfig,
    pub rate_limits: RateLimitConfig,
    pub health: HealthConfig,
    pub telemetry: TelemetryConfig,
    pub lifecycle: LifecycleConfig,
    pub log_format: LogFormat,
    pub debug: bool,
}

impl Config {
    /// Load configuration from the environment (after `.env` has been read).
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            supervisor: SupervisorConfig::resolve()?,
            orchestrator: OrchestratorConfig::resolve()?,
            rate_limits: RateLimitConfig::resolve()?,
            health: HealthConfig::resolve()?,
            telemetry: TelemetryConfig::resolve()?,
            lifecycle: LifecycleConfig::resolve()?,
            log_format: LogFormat::resolve()?,
            debug: helpers::parse_bool_env("DEBUG", false)?,
        })
    }

    /// Overlay command-line flags. Flags only override when given.
    pub fn apply_cli(&mut self, cli: &Cli) -> Result<(), ConfigError> {
        if let Some(input) = &cli.input {
            self.supervisor.program = input.clone();
        }
        if let Some(args) = &cli.args {
            self.supervisor.args = args.clone();
        }
        if let Some(raw) = &cli.shutdown_timeout {
            self.lifecycle.shutdown_timeout =
                parse_duration(raw).map_err(|message| ConfigError::InvalidValue {
                    key: "--shutdown-timeout".to_string(),
                    message,
                })?;
        }
        if let Some(raw) = &cli.reserve_duration {
            let duration = parse_duration(raw).map_err(|message| ConfigError::InvalidValue {
                key: "--reserve-duration".to_string(),
                message,
            })?;
            if duration < std::time::Duration::from_secs(2) {
                return Err(ConfigError::InvalidValue {
                    key: "--reserve-duration".to_string(),
                    message: "must be at least 2s".to_string(),
                });
            }
            self.lifecycle.reserve_duration = duration;
        }
        if let Some(port) = cli.metrics_port {
            self.telemetry.metrics_port = port;
        }
        if let Some(port) = cli.health_port {
            self.health.port = port;
        }
        if cli.player_driven_allocation {
            self.lifecycle.player_driven_allocation = true;
        }
        if cli.debug {
            self.debug = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use clap::Parser;

    use super::*;

    #[test]
    fn test_cli_overrides_defaults() {
        let cli = Cli::parse_from([
            "ac-sidecar",
            "-i",
            "/opt/ac/run.sh",
            "--args",
            "--port 9600",
            "--shutdown-timeout",
            "15s",
            "--reserve-duration",
            "5m",
            "--metrics-port",
            "19090",
            "--player-driven-allocation",
        ]);
        let mut config = Config::default();
        config.apply_cli(&cli).unwrap();

        assert_eq!(config.supervisor.program, PathBuf::from("/opt/ac/run.sh"));
        assert_eq!(config.supervisor.arg_list(), vec!["--port", "9600"]);
        assert_eq!(config.lifecycle.shutdown_timeout, Duration::from_secs(15));
        assert_eq!(config.lifecycle.reserve_duration, Duration::from_secs(300));
        assert_eq!(config.lifecycle.reserve_interval(), Duration::from_secs(150));
        assert_eq!(config.telemetry.metrics_port, 19090);
        assert_eq!(config.health.port, 9001);
        assert!(config.lifecycle.player_driven_allocation);
    }

    #[test]
    fn test_cli_without_flags_keeps_defaults() {
        let cli = Cli::parse_from(["ac-sidecar"]);
        let mut config = Config::default();
        config.apply_cli(&cli).unwrap();

        assert_eq!(config.supervisor.program, PathBuf::from("./start-server.sh"));
        assert_eq!(config.lifecycle.shutdown_timeout, Duration::from_secs(8));
        assert_eq!(config.lifecycle.reserve_duration, Duration::from_secs(600));
        assert!(!config.lifecycle.player_driven_allocation);
    }

    #[test]
    fn test_cli_rejects_bad_duration() {
        let cli = Cli::parse_from(["ac-sidecar", "--shutdown-timeout", "soon"]);
        let mut config = Config::default();
        let err = config.apply_cli(&cli).unwrap_err();
        assert!(err.to_string().contains("--shutdown-timeout"));
    }

    #[test]
    fn test_cli_rejects_tiny_reservation() {
        let cli = Cli::parse_from(["ac-sidecar", "--reserve-duration", "1s"]);
        let mut config = Config::default();
        assert!(config.apply_cli(&cli).is_err());
    }
}
