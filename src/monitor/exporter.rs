//! Slow metrics export pass.
//!
//! Every `export_interval` the exporter snapshots [`ServerState`] under a
//! single read lock, republishes every tracked figure, polls the GameServer
//! for external allocation and ports, and mirrors a few fields into
//! annotations.
//!
//! [`ServerState`]: crate::state::ServerState

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

use crate::lifecycle::LifecycleEngine;
use crate::resilience::OpClass;
use crate::state::{LifecyclePhase, Player, SessionKind};

/// Point-in-time copy of everything the exporter publishes.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub phase: LifecyclePhase,
    pub ready: bool,
    pub allocated: bool,
    pub players: Vec<Player>,
    pub active_cars: HashMap<String, u32>,
    pub session: Option<SessionFigures>,
    pub track_grip: f64,
    pub track_temp: f64,
    pub air_temp: f64,
    pub tick_rate: f64,
    pub ping_age: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionFigures {
    pub kind: SessionKind,
    pub elapsed: Duration,
    pub time_left: Option<u64>,
}

/// Outcome of one export pass.
#[derive(Debug, PartialEq, Eq)]
pub enum ExportResult {
    Exported,
    /// The metrics rate limit was exhausted.
    Throttled,
}

pub struct MetricsExporter {
    engine: Arc<LifecycleEngine>,
    interval: Duration,
}

impl MetricsExporter {
    pub fn new(engine: Arc<LifecycleEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    pub async fn snapshot(&self) -> Snapshot {
        let state = self.engine.state().read().await;
        Snapshot {
            phase: state.phase(),
            ready: state.is_ready(),
            allocated: state.is_allocated(),
            players: state.connected_players().cloned().collect(),
            active_cars: state.active_cars().clone(),
            session: state.current_session().map(|s| SessionFigures {
                kind: s.kind,
                elapsed: s.elapsed(),
                time_left: s.remaining_secs(),
            }),
            track_grip: state.track_grip,
            track_temp: state.track_temp,
            air_temp: state.air_temp,
            tick_rate: state.tick_rate,
            ping_age: state.health_ping_age(),
        }
    }

    pub async fn export_once(&self) -> ExportResult {
        if !self.engine.limiter().allow(OpClass::Metrics) {
            tracing::debug!("Metrics export throttled");
            return ExportResult::Throttled;
        }
        let started = Instant::now();

        let snapshot = self.snapshot().await;
        self.publish(&snapshot);
        let allocated = self
            .poll_game_server()
            .await
            .unwrap_or(snapshot.allocated);
        self.mirror_annotations(&snapshot, allocated).await;

        tracing::debug!(
            phase = %snapshot.phase,
            players = snapshot.players.len(),
            "Metrics exported"
        );
        self.engine
            .metrics()
            .update_rate_seconds
            .set(started.elapsed().as_secs_f64());
        ExportResult::Exported
    }

    fn publish(&self, s: &Snapshot) {
        let m = self.engine.metrics();
        m.state.set(s.phase.gauge_value());
        m.players.set(s.players.len() as i64);
        m.last_health_ping_seconds.set(s.ping_age.as_secs_f64());

        if let Some(session) = &s.session {
            m.session_type.set(session.kind.gauge_value());
            m.session_duration_seconds
                .with_label_values(&[session.kind.as_str()])
                .set(session.elapsed.as_secs_f64());
            if let Some(left) = session.time_left {
                let left = left.saturating_sub(session.elapsed.as_secs());
                m.session_time_left_seconds.set(left as f64);
            }
        }

        m.track_grip_level.set(s.track_grip);
        m.track_temperature_celsius.set(s.track_temp);
        m.air_temperature_celsius.set(s.air_temp);
        m.tick_rate.set(s.tick_rate);

        for player in &s.players {
            let pair = [player.name.as_str(), player.steam_id.as_str()];
            m.player_latency_ms
                .with_label_values(&pair)
                .set(f64::from(player.latency_ms));
            m.packet_loss_percent
                .with_label_values(&pair)
                .set(player.packet_loss_percent);
            m.player_latency_distribution_ms
                .with_label_values(&[player.name.as_str()])
                .observe(f64::from(player.latency_ms));
            if let Some(best) = player.best_lap_ms {
                m.player_best_lap_ms.with_label_values(&pair).set(best as f64);
            }
        }

        m.car_count.reset();
        for (car, count) in &s.active_cars {
            m.car_count
                .with_label_values(&[car.as_str()])
                .set(i64::from(*count));
        }
    }

    /// Follow the orchestrator's view of the allocation. Returns `None` when
    /// the poll failed or the reported state says nothing about allocation.
    async fn poll_game_server(&self) -> Option<bool> {
        let info = match self.engine.sdk().game_server().await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("Failed to get GameServer status: {}", e);
                self.engine.metrics().error(e.kind());
                return None;
            }
        };
        tracing::debug!(state = %info.state, "GameServer status");

        let ports = &self.engine.metrics().ports;
        ports.reset();
        for port in &info.ports {
            ports
                .with_label_values(&[port.name.as_str(), &port.port.to_string()])
                .set(1);
        }

        if info.is_allocated() {
            self.engine.observe_external_allocation().await;
            Some(true)
        } else if info.is_ready() {
            self.engine.observe_external_release().await;
            Some(false)
        } else {
            None
        }
    }

    async fn mirror_annotations(&self, s: &Snapshot, allocated: bool) {
        if !self.engine.limiter().allow(OpClass::Command) {
            tracing::debug!("Annotation mirror throttled");
            return;
        }
        let values = [
            ("players", s.players.len().to_string()),
            ("ready", s.ready.to_string()),
            ("allocated", allocated.to_string()),
        ];
        for (key, value) in values {
            if let Err(e) = self.engine.sdk().set_annotation(key, &value).await {
                tracing::warn!(key, "Failed to update annotation: {}", e);
                self.engine.metrics().error(e.kind());
            }
        }
    }

    pub async fn run(self) {
        tracing::info!("Starting metrics exporter with interval {:?}", self.interval);
        let cancel = self.engine.cancel_token().clone();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.export_once().await;
                }
            }
        }
        tracing::debug!("Metrics exporter stopped");
    }
}
