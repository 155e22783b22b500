//! Error types for the game server supervisor.

use thiserror::Error;

/// Result type for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Errors that can occur while launching or watching the game server.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The executable could not be started.
    #[error("Failed to start '{program}': {reason}")]
    SpawnFailed {
        /// Program path.
        program: String,
        /// Reason for failure.
        reason: String,
    },

    /// A standard stream was not captured.
    #[error("Child {stream} was not piped")]
    StreamUnavailable {
        /// Which stream.
        stream: &'static str,
    },

    /// Waiting on the child failed.
    #[error("Failed to wait for game server: {0}")]
    Wait(#[source] std::io::Error),
}
