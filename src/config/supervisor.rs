use std::path::PathBuf;
use std::time::Duration;

use crate::config::helpers::{optional_env, parse_duration_env, parse_optional_env};
use crate::error::ConfigError;

/// Settings for the wrapped game-server process.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Executable (usually a start script) to launch.
    pub program: PathBuf,
    /// Whitespace-separated argument string passed to the program.
    pub args: String,
    /// Lines longer than this are truncated before they reach the parser.
    pub max_line_bytes: usize,
    /// Capacity of the queue between the output interceptors and the lifecycle engine.
    pub event_queue_capacity: usize,
    /// How long an interceptor may wait on a full event queue before dropping the event.
    pub dispatch_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("./start-server.sh"),
            args: String::new(),
            max_line_bytes: 8192,
            event_queue_capacity: 256,
            dispatch_timeout: Duration::from_millis(100),
        }
    }
}

impl SupervisorConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_line_bytes = parse_optional_env("MAX_LINE_BYTES", defaults.max_line_bytes)?;
        if max_line_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAX_LINE_BYTES".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            program: optional_env("SERVER_SCRIPT")?
                .map(PathBuf::from)
                .unwrap_or(defaults.program),
            args: optional_env("SERVER_ARGS")?.unwrap_or(defaults.args),
            max_line_bytes,
            event_queue_capacity: parse_optional_env(
                "EVENT_QUEUE_CAPACITY",
                defaults.event_queue_capacity,
            )?
            .max(1),
            dispatch_timeout: parse_duration_env(
                "LINE_DISPATCH_TIMEOUT",
                defaults.dispatch_timeout,
            )?,
        })
    }

    /// Split the argument string the way a shell would for plain words.
    pub fn arg_list(&self) -> Vec<String> {
        self.args.split_whitespace().map(str::to_string).collect()
    }
}
