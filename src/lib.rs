//! Agones sidecar for an Assetto Corsa dedicated server.
//!
//! The sidecar launches the game server, classifies every line it prints,
//! and turns those events into GameServer lifecycle calls, annotations and
//! Prometheus metrics. Periodic loops keep the orchestrator informed of the
//! server's health and reservation, and a liveness endpoint lets the
//! orchestrator probe the sidecar itself.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod monitor;
pub mod orchestrator;
pub mod parser;
pub mod resilience;
pub mod signals;
pub mod state;
pub mod supervisor;
pub mod telemetry;
pub mod testing;

pub use app::Sidecar;
pub use config::Config;
pub use error::{ConfigError, OrchestratorError, StartupError};
