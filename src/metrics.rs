//! Prometheus collectors for the game server.
//!
//! Every series carries the server identity (`server_id`, `server_name`,
//! `server_type`) as constant labels. Collectors are registered into a
//! caller-supplied [`Registry`] so tests can use an isolated one.

use std::collections::HashMap;

use prometheus::{
    Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Opts, Registry, exponential_buckets, linear_buckets,
};

use crate::state::{Player, ServerIdentity};

#[derive(Debug, Clone)]
pub struct Metrics {
    /// Lifecycle phase (0 starting .. 4 shutting down).
    pub state: Gauge,
    pub players: IntGauge,
    pub player_connects: IntCounter,
    pub player_disconnects: IntCounter,
    pub session_changes: IntCounter,
    /// Current session type (practice 0, qualifying 1, race 2, unknown -1).
    pub session_type: Gauge,
    pub session_duration_seconds: GaugeVec,
    pub session_start_timestamp: GaugeVec,
    pub session_time_left_seconds: Gauge,
    /// Length of sessions at the moment they were archived.
    pub completed_session_seconds: HistogramVec,
    /// Seconds since the last successful health ping.
    pub last_health_ping_seconds: Gauge,
    pub health_ping_failures: IntCounter,
    pub errors: IntCounterVec,
    pub auth_successes: IntCounter,
    pub network_bytes_received: IntCounter,
    pub network_bytes_sent: IntCounter,
    pub cpu_usage_percent: Gauge,
    pub memory_usage_bytes: Gauge,
    pub car_usage: IntCounterVec,
    pub car_count: IntGaugeVec,
    pub track_usage: IntCounterVec,
    pub player_latency_ms: GaugeVec,
    pub player_best_lap_ms: GaugeVec,
    pub packet_loss_percent: GaugeVec,
    pub player_latency_distribution_ms: HistogramVec,
    pub track_grip_level: Gauge,
    pub track_temperature_celsius: Gauge,
    pub air_temperature_celsius: Gauge,
    pub tick_rate: Gauge,
    pub fps: Gauge,
    pub tick_time_ms: Histogram,
    pub ports: IntGaugeVec,
    /// Duration of the last full export pass.
    pub update_rate_seconds: Gauge,
    pub lobby_registrations: IntCounter,
    pub starts: IntCounter,
    pub ends: IntCounter,
    pub log_events: IntCounterVec,
    pub ai_slots: IntGauge,
    pub server_info: IntGaugeVec,
}

struct Builder<'a> {
    registry: &'a Registry,
    labels: HashMap<String, String>,
}

impl Builder<'_> {
    fn opts(&self, name: &str, help: &str) -> Opts {
        Opts::new(name, help).const_labels(self.labels.clone())
    }

    fn hopts(&self, name: &str, help: &str, buckets: Vec<f64>) -> HistogramOpts {
        HistogramOpts::new(name, help)
            .const_labels(self.labels.clone())
            .buckets(buckets)
    }

    fn register<C: prometheus::core::Collector + Clone + 'static>(
        &self,
        collector: C,
    ) -> Result<C, prometheus::Error> {
        self.registry.register(Box::new(collector.clone()))?;
        Ok(collector)
    }

    fn gauge(&self, name: &str, help: &str) -> Result<Gauge, prometheus::Error> {
        self.register(Gauge::with_opts(self.opts(name, help))?)
    }

    fn int_gauge(&self, name: &str, help: &str) -> Result<IntGauge, prometheus::Error> {
        self.register(IntGauge::with_opts(self.opts(name, help))?)
    }

    fn counter(&self, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
        self.register(IntCounter::with_opts(self.opts(name, help))?)
    }

    fn gauge_vec(
        &self,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<GaugeVec, prometheus::Error> {
        self.register(GaugeVec::new(self.opts(name, help), labels)?)
    }

    fn int_gauge_vec(
        &self,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<IntGaugeVec, prometheus::Error> {
        self.register(IntGaugeVec::new(self.opts(name, help), labels)?)
    }

    fn counter_vec(
        &self,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<IntCounterVec, prometheus::Error> {
        self.register(IntCounterVec::new(self.opts(name, help), labels)?)
    }
}

impl Metrics {
    pub fn register_into(
        registry: &Registry,
        identity: &ServerIdentity,
    ) -> Result<Self, prometheus::Error> {
        let b = Builder {
            registry,
            labels: HashMap::from([
                ("server_id".to_string(), identity.id.clone()),
                ("server_name".to_string(), identity.name.clone()),
                ("server_type".to_string(), identity.kind.clone()),
            ]),
        };

        Ok(Self {
            state: b.gauge(
                "assetto_server_state",
                "Current server state (0=starting, 1=ready, 2=allocated, 3=reserved, 4=shutdown)",
            )?,
            players: b.int_gauge(
                "assetto_server_players_total",
                "Current number of connected players",
            )?,
            player_connects: b.counter(
                "assetto_server_player_connects_total",
                "Total number of player connections",
            )?,
            player_disconnects: b.counter(
                "assetto_server_player_disconnects_total",
                "Total number of player disconnections",
            )?,
            session_changes: b.counter(
                "assetto_server_session_changes_total",
                "Total number of session changes",
            )?,
            session_type: b.gauge(
                "assetto_server_session_type",
                "Current session type (0=practice, 1=qualifying, 2=race, -1=unknown)",
            )?,
            session_duration_seconds: b.gauge_vec(
                "assetto_server_session_duration_seconds",
                "Duration of the current session in seconds",
                &["session_type"],
            )?,
            session_start_timestamp: b.gauge_vec(
                "assetto_server_session_start_timestamp",
                "Unix timestamp of the current session start",
                &["session_type"],
            )?,
            session_time_left_seconds: b.gauge(
                "assetto_server_session_time_left_seconds",
                "Time left in the current session in seconds",
            )?,
            completed_session_seconds: b.register(HistogramVec::new(
                b.hopts(
                    "assetto_server_completed_session_seconds",
                    "Length of finished sessions in seconds",
                    exponential_buckets(60.0, 2.0, 8)?,
                ),
                &["session_type"],
            )?)?,
            last_health_ping_seconds: b.gauge(
                "assetto_server_last_health_ping_seconds",
                "Seconds since the last successful health ping",
            )?,
            health_ping_failures: b.counter(
                "assetto_server_health_ping_failures_total",
                "Total number of failed health pings",
            )?,
            errors: b.counter_vec(
                "assetto_server_errors_total",
                "Total number of server errors",
                &["error_type"],
            )?,
            auth_successes: b.counter(
                "assetto_server_auth_successes_total",
                "Total number of successful Steam authentications",
            )?,
            network_bytes_received: b.counter(
                "assetto_server_network_bytes_received_total",
                "Total bytes received",
            )?,
            network_bytes_sent: b.counter(
                "assetto_server_network_bytes_sent_total",
                "Total bytes sent",
            )?,
            cpu_usage_percent: b.gauge(
                "assetto_server_cpu_usage_percent",
                "CPU usage of the sidecar process",
            )?,
            memory_usage_bytes: b.gauge(
                "assetto_server_memory_usage_bytes",
                "Resident memory of the sidecar process",
            )?,
            car_usage: b.counter_vec(
                "assetto_server_car_usage_total",
                "Number of times each car was picked",
                &["car_name"],
            )?,
            car_count: b.int_gauge_vec(
                "assetto_server_car_count",
                "Cars currently on track by model",
                &["car_model"],
            )?,
            track_usage: b.counter_vec(
                "assetto_server_track_usage_total",
                "Number of sessions per track",
                &["track_name"],
            )?,
            player_latency_ms: b.gauge_vec(
                "assetto_server_player_latency_ms",
                "Player latency in milliseconds",
                &["player_name", "steam_id"],
            )?,
            player_best_lap_ms: b.gauge_vec(
                "assetto_server_player_best_lap_ms",
                "Player best lap in milliseconds",
                &["player_name", "steam_id"],
            )?,
            packet_loss_percent: b.gauge_vec(
                "assetto_server_packet_loss_percent",
                "Player packet loss percentage",
                &["player_name", "steam_id"],
            )?,
            player_latency_distribution_ms: b.register(HistogramVec::new(
                b.hopts(
                    "assetto_server_player_latency_distribution_ms",
                    "Distribution of player latency in milliseconds",
                    exponential_buckets(10.0, 1.5, 10)?,
                ),
                &["player_name"],
            )?)?,
            track_grip_level: b.gauge("assetto_server_track_grip_level", "Track grip level")?,
            track_temperature_celsius: b.gauge(
                "assetto_server_track_temperature_celsius",
                "Track temperature in Celsius",
            )?,
            air_temperature_celsius: b.gauge(
                "assetto_server_air_temperature_celsius",
                "Air temperature in Celsius",
            )?,
            tick_rate: b.gauge("assetto_server_tick_rate", "Server tick rate")?,
            fps: b.gauge("assetto_server_fps", "Current server FPS")?,
            tick_time_ms: b.register(Histogram::with_opts(
                b.hopts(
                    "assetto_server_tick_time_ms",
                    "Server tick processing time in milliseconds",
                    linear_buckets(0.0, 5.0, 20)?,
                ),
            )?)?,
            ports: b.int_gauge_vec(
                "assetto_server_ports_total",
                "Ports exposed by the game server",
                &["port_type", "port"],
            )?,
            update_rate_seconds: b.gauge(
                "assetto_server_update_rate_seconds",
                "Duration of the last metrics export pass",
            )?,
            lobby_registrations: b.counter(
                "assetto_server_lobby_registrations_total",
                "Total number of lobby registrations",
            )?,
            starts: b.counter("assetto_server_starts_total", "Total number of server starts")?,
            ends: b.counter("assetto_server_ends_total", "Total number of session ends")?,
            log_events: b.counter_vec(
                "assetto_server_log_events_total",
                "Classified server output lines by event type",
                &["event_type"],
            )?,
            ai_slots: b.int_gauge("assetto_server_ai_slots", "AI slots reported by the server")?,
            server_info: b.int_gauge_vec(
                "assetto_server_info",
                "Server build information",
                &["version"],
            )?,
        })
    }

    /// Count an error of the given type.
    pub fn error(&self, error_type: &str) {
        self.errors.with_label_values(&[error_type]).inc();
    }

    /// Drop every per-player series for a player who left.
    pub fn remove_player_series(&self, player: &Player) {
        let pair = [player.name.as_str(), player.steam_id.as_str()];
        let results = [
            self.player_latency_ms.remove_label_values(&pair),
            self.player_best_lap_ms.remove_label_values(&pair),
            self.packet_loss_percent.remove_label_values(&pair),
            self.player_latency_distribution_ms
                .remove_label_values(&[player.name.as_str()]),
        ];
        for e in results.into_iter().filter_map(Result::err) {
            tracing::debug!(steam_id = %player.steam_id, "Player series not present: {}", e);
        }
    }
}
