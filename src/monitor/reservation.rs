//! Keeps the GameServer reserved so an idle server is not reclaimed.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::lifecycle::LifecycleEngine;

/// Renew the reservation once. Failures are logged and counted only.
pub async fn renew(engine: &LifecycleEngine, duration: Duration) -> bool {
    if engine.state().read().await.is_shutting_down() {
        return false;
    }
    match engine.sdk().reserve(duration).await {
        Ok(()) => {
            tracing::debug!("Reservation renewed for {:?}", duration);
            engine.observe_reservation().await;
            true
        }
        Err(e) => {
            tracing::warn!("Failed to renew reservation: {}", e);
            engine.metrics().error(e.kind());
            false
        }
    }
}

/// Renew every `duration / 2` until cancelled.
pub async fn run(engine: Arc<LifecycleEngine>) {
    let duration = engine.config().reserve_duration;
    let period = engine.config().reserve_interval();
    tracing::info!("Starting reservation loop, renewing {:?} every {:?}", duration, period);

    let cancel = engine.cancel_token().clone();
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                renew(&engine, duration).await;
            }
        }
    }
    tracing::debug!("Reservation loop stopped");
}

pub fn spawn_reservation(engine: Arc<LifecycleEngine>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(engine))
}
