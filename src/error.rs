//! Error types shared across the sidecar.

use std::time::Duration;

use thiserror::Error;

use crate::supervisor::SupervisorError;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting was not provided.
    #[error("Missing required configuration: {key}")]
    MissingRequired {
        /// Environment key or flag name.
        key: String,
    },

    /// A setting was present but could not be parsed.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue {
        /// Environment key or flag name.
        key: String,
        /// What was wrong with it.
        message: String,
    },
}

/// Errors returned by calls into the orchestrator control API.
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    /// The request never produced a response (connect refused, timeout, ...).
    #[error("{operation} request failed: {reason}")]
    Request {
        /// SDK operation name.
        operation: &'static str,
        /// Transport-level reason.
        reason: String,
    },

    /// The SDK answered with a non-success status.
    #[error("{operation} returned HTTP {status}")]
    Status {
        /// SDK operation name.
        operation: &'static str,
        /// HTTP status code.
        status: u16,
    },

    /// The response body could not be decoded.
    #[error("{operation} response could not be decoded: {reason}")]
    Decode {
        /// SDK operation name.
        operation: &'static str,
        /// Decoder message.
        reason: String,
    },

    /// The circuit breaker is open; the call was not attempted.
    #[error("{operation} rejected: circuit open")]
    CircuitOpen {
        /// SDK operation name.
        operation: &'static str,
    },
}

impl OrchestratorError {
    /// Name of the SDK operation that failed.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Request { operation, .. }
            | Self::Status { operation, .. }
            | Self::Decode { operation, .. }
            | Self::CircuitOpen { operation } => operation,
        }
    }

    /// Short label used for the `error_type` metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request { .. } => "sdk_request",
            Self::Status { .. } => "sdk_status",
            Self::Decode { .. } => "sdk_decode",
            Self::CircuitOpen { .. } => "sdk_circuit_open",
        }
    }
}

/// Fatal errors that end the sidecar with a non-zero exit status.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Could not connect to the orchestrator SDK: {0}")]
    Connect(#[source] OrchestratorError),

    #[error("Failed to set up GameServer metadata: {0}")]
    Setup(#[source] OrchestratorError),

    #[error("Could not mark the GameServer ready: {0}")]
    Ready(#[source] OrchestratorError),

    #[error("Timed out after {0:?} waiting for the server to become ready")]
    ReadyTimeout(Duration),

    #[error("Cancelled while waiting for the server to become ready")]
    Cancelled,

    #[error("Failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Failed to bind telemetry listener on port {port}: {reason}")]
    Telemetry {
        /// Port that could not be bound.
        port: u16,
        /// Bind error.
        reason: String,
    },

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("Game server exited unexpectedly: {status}")]
    ProcessExited {
        /// Human-readable exit status.
        status: String,
    },
}
