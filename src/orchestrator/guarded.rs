//! Circuit-breaker wrapper around an [`Orchestrator`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::OrchestratorError;
use crate::orchestrator::{GameServerInfo, Orchestrator, Result};
use crate::resilience::CircuitBreaker;

/// Fails fast with [`OrchestratorError::CircuitOpen`] while the breaker is
/// open, and feeds every call outcome back into it.
pub struct GuardedOrchestrator {
    inner: Arc<dyn Orchestrator>,
    breaker: Arc<CircuitBreaker>,
}

impl GuardedOrchestrator {
    pub fn new(inner: Arc<dyn Orchestrator>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn guard<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        if self.breaker.is_open() {
            return Err(OrchestratorError::CircuitOpen { operation });
        }
        match call.await {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Orchestrator for GuardedOrchestrator {
    async fn health(&self) -> Result<()> {
        self.guard("health", self.inner.health()).await
    }

    async fn ready(&self) -> Result<()> {
        self.guard("ready", self.inner.ready()).await
    }

    /// Shutdown is always attempted, even with the circuit open.
    async fn shutdown(&self) -> Result<()> {
        self.inner.shutdown().await
    }

    async fn allocate(&self) -> Result<()> {
        self.guard("allocate", self.inner.allocate()).await
    }

    async fn reserve(&self, duration: Duration) -> Result<()> {
        self.guard("reserve", self.inner.reserve(duration)).await
    }

    async fn set_label(&self, key: &str, value: &str) -> Result<()> {
        self.guard("set_label", self.inner.set_label(key, value))
            .await
    }

    async fn set_annotation(&self, key: &str, value: &str) -> Result<()> {
        self.guard("set_annotation", self.inner.set_annotation(key, value))
            .await
    }

    async fn game_server(&self) -> Result<GameServerInfo> {
        self.guard("game_server", self.inner.game_server()).await
    }

    /// Reconnecting bypasses the breaker; it is how an open circuit recovers.
    async fn reconnect(&self) -> Result<()> {
        self.inner.reconnect().await
    }
}
