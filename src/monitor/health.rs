//! Periodic SDK health pings.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;

use crate::config::HealthConfig;
use crate::error::OrchestratorError;
use crate::lifecycle::{LifecycleEngine, ShutdownReason};
use crate::resilience::OpClass;

/// Result of a single health ping.
#[derive(Debug)]
pub enum HealthResult {
    Ok,
    /// The ping was not permitted before cancellation.
    Skipped,
    Failed(OrchestratorError),
}

/// Pings the orchestrator on a fixed interval.
pub struct HealthRunner {
    config: HealthConfig,
    engine: Arc<LifecycleEngine>,
    consecutive_failures: u32,
}

impl HealthRunner {
    pub fn new(config: HealthConfig, engine: Arc<LifecycleEngine>) -> Self {
        Self {
            config,
            engine,
            consecutive_failures: 0,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Run until cancelled or until failures become fatal.
    pub async fn run(mut self) {
        tracing::info!(
            "Starting health loop with interval {:?}",
            self.config.interval
        );
        let cancel = self.engine.cancel_token().clone();
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            if self.tick().await {
                break;
            }
        }
        tracing::debug!("Health loop stopped");
    }

    /// One iteration. Returns `true` when the loop should stop.
    pub async fn tick(&mut self) -> bool {
        match self.check_health().await {
            HealthResult::Ok => {
                if self.consecutive_failures > 0 {
                    tracing::info!(
                        failures = self.consecutive_failures,
                        "Health pings recovered"
                    );
                }
                self.consecutive_failures = 0;
                false
            }
            HealthResult::Skipped => self.engine.cancel_token().is_cancelled(),
            HealthResult::Failed(e) => {
                self.consecutive_failures += 1;
                tracing::warn!(
                    failures = self.consecutive_failures,
                    "Health check failed: {}",
                    e
                );
                let metrics = self.engine.metrics();
                metrics.health_ping_failures.inc();
                metrics.error(e.kind());

                if let Err(e) = self.engine.sdk().reconnect().await {
                    tracing::warn!("SDK reconnect failed: {}", e);
                }

                if self.config.failures_are_fatal()
                    && self.consecutive_failures >= self.config.failure_threshold
                {
                    tracing::error!(
                        failures = self.consecutive_failures,
                        "Health check failures exceeded threshold"
                    );
                    self.engine
                        .shutdown(ShutdownReason::HealthCheckFailed {
                            failures: self.consecutive_failures,
                        })
                        .await;
                    return true;
                }
                false
            }
        }
    }

    /// Send a single ping, respecting the health rate limit.
    pub async fn check_health(&self) -> HealthResult {
        if self
            .engine
            .limiter()
            .wait(OpClass::Health, self.engine.cancel_token())
            .await
            .is_err()
        {
            return HealthResult::Skipped;
        }

        match self.engine.sdk().health().await {
            Ok(()) => {
                let age = {
                    let mut state = self.engine.state().write().await;
                    let age = state.health_ping_age();
                    state.record_health_ping();
                    age
                };
                self.engine
                    .metrics()
                    .last_health_ping_seconds
                    .set(age.as_secs_f64());
                HealthResult::Ok
            }
            Err(e) => HealthResult::Failed(e),
        }
    }
}

/// Spawn the health loop as a background task.
pub fn spawn_health(
    config: HealthConfig,
    engine: Arc<LifecycleEngine>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(HealthRunner::new(config, engine).run())
}
