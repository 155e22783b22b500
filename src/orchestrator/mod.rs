//! Control-plane client for the fleet orchestrator (Agones).
//!
//! [`Orchestrator`] is the small operation set the sidecar relies on. The
//! production implementation is [`AgonesClient`], which talks to the local
//! SDK sidecar's REST gateway; [`GuardedOrchestrator`] wraps any
//! implementation with a circuit breaker.

mod agones;
mod guarded;

pub use agones::AgonesClient;
pub use guarded::GuardedOrchestrator;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::OrchestratorError;

/// Result type for orchestrator calls.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// GameServer state reported when an allocation has happened.
pub const STATE_ALLOCATED: &str = "Allocated";

/// GameServer state reported while waiting for an allocation.
pub const STATE_READY: &str = "Ready";

/// A port exposed by the GameServer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameServerPort {
    pub name: String,
    pub port: u16,
}

/// Snapshot of the GameServer resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GameServerInfo {
    pub name: String,
    pub labels: HashMap<String, String>,
    /// Lifecycle state as reported by the orchestrator (`Ready`, `Allocated`, ...).
    pub state: String,
    pub ports: Vec<GameServerPort>,
}

impl GameServerInfo {
    pub fn is_allocated(&self) -> bool {
        self.state == STATE_ALLOCATED
    }

    pub fn is_ready(&self) -> bool {
        self.state == STATE_READY
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Operations the sidecar needs from the orchestrator.
///
/// Every call is fallible and may be retried by the caller.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn health(&self) -> Result<()>;

    async fn ready(&self) -> Result<()>;

    async fn shutdown(&self) -> Result<()>;

    async fn allocate(&self) -> Result<()>;

    /// Hold the server for `duration` so it is not reclaimed.
    async fn reserve(&self, duration: Duration) -> Result<()>;

    async fn set_label(&self, key: &str, value: &str) -> Result<()>;

    async fn set_annotation(&self, key: &str, value: &str) -> Result<()>;

    async fn game_server(&self) -> Result<GameServerInfo>;

    /// Re-establish the connection after failures.
    async fn reconnect(&self) -> Result<()>;
}
