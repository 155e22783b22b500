//! Applies parsed output events to the shared state and drives the
//! orchestrator through ready, allocation and shutdown.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::LifecycleConfig;
use crate::lifecycle::ready::ReadyNotifier;
use crate::metrics::Metrics;
use crate::orchestrator::Orchestrator;
use crate::parser::{OutputEvent, is_valid_steam_id};
use crate::resilience::{OpClass, RateLimiter};
use crate::state::{LifecyclePhase, Player, PlayerJoin, Session, SessionKind, SharedState};
use crate::supervisor::{ExitOutcome, LineEvent};

/// Car label used when the server did not print a model.
const UNKNOWN_CAR: &str = "unknown";

/// Why the sidecar is shutting down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The server logged the end of its session.
    SessionEnded,
    /// Health pings kept failing.
    HealthCheckFailed { failures: u32 },
    /// The game server process exited on its own.
    ProcessExited { status: String },
    /// The sidecar received a termination signal.
    Signal,
    /// Startup could not complete.
    StartupFailed { reason: String },
}

impl ShutdownReason {
    fn clears_players(&self) -> bool {
        matches!(self, Self::SessionEnded)
    }
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SessionEnded => write!(f, "session ended"),
            Self::HealthCheckFailed { failures } => {
                write!(f, "{} consecutive health check failures", failures)
            }
            Self::ProcessExited { status } => write!(f, "game server exited ({})", status),
            Self::Signal => write!(f, "termination signal"),
            Self::StartupFailed { reason } => write!(f, "startup failed: {}", reason),
        }
    }
}

/// Everything the engine needs, wired once at startup.
pub struct LifecycleEngine {
    state: SharedState,
    sdk: Arc<dyn Orchestrator>,
    metrics: Arc<Metrics>,
    limiter: Arc<RateLimiter>,
    ready: ReadyNotifier,
    cancel: CancellationToken,
    config: LifecycleConfig,
}

impl LifecycleEngine {
    pub fn new(
        state: SharedState,
        sdk: Arc<dyn Orchestrator>,
        metrics: Arc<Metrics>,
        limiter: Arc<RateLimiter>,
        ready: ReadyNotifier,
        cancel: CancellationToken,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            state,
            sdk,
            metrics,
            limiter,
            ready,
            cancel,
            config,
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn sdk(&self) -> &Arc<dyn Orchestrator> {
        &self.sdk
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Root cancellation token; cancelled once shutdown completes.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Consume queued line events until cancellation or the queue closes.
    ///
    /// A panic while applying one event is counted and the loop continues.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<LineEvent>) {
        loop {
            let msg = tokio::select! {
                _ = self.cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            if AssertUnwindSafe(self.handle(msg))
                .catch_unwind()
                .await
                .is_err()
            {
                tracing::error!("Recovered from panic while applying server output");
                self.metrics.error("panic");
            }
        }
        tracing::debug!("Lifecycle event loop stopped");
    }

    pub async fn handle(&self, msg: LineEvent) {
        match msg {
            LineEvent::Parsed(event) => self.apply(event).await,
            LineEvent::Fault { stream, reason } => {
                tracing::error!(%stream, reason = %reason, "Output handling fault");
                self.metrics.error("panic");
            }
        }
    }

    /// Apply one classified event.
    pub async fn apply(&self, event: OutputEvent) {
        self.metrics
            .log_events
            .with_label_values(&[event.kind()])
            .inc();

        match event {
            OutputEvent::ServerStarting => {
                tracing::info!("Game server starting up");
                self.metrics.starts.inc();
                self.publish_phase().await;
            }
            OutputEvent::LobbyRegistered => self.on_ready().await,
            OutputEvent::SessionEnded => {
                tracing::info!("Session ended, initiating shutdown");
                self.metrics.ends.inc();
                self.shutdown(ShutdownReason::SessionEnded).await;
            }
            OutputEvent::PlayerConnected {
                name,
                steam_id,
                car_model,
            } => {
                self.on_player_connected(Player::new(name, steam_id, car_model))
                    .await
            }
            OutputEvent::PlayerDisconnected { name, steam_id } => {
                self.on_player_disconnected(&name, &steam_id).await
            }
            OutputEvent::SessionChanged {
                kind,
                track,
                remaining,
            } => self.on_session_changed(kind, track, remaining).await,
            OutputEvent::ServerError { message } => {
                tracing::warn!(message = %message, "Game server reported an error");
                self.metrics.error("server_error");
            }
            OutputEvent::SteamAuthSucceeded => {
                tracing::debug!("Steam authentication succeeded");
                self.metrics.auth_successes.inc();
            }
            OutputEvent::SteamApiFailure { message } => {
                tracing::warn!(message = %message, "Steam API failure");
                self.metrics.error("steam_api");
            }
            OutputEvent::NetworkStats { received, sent } => {
                self.metrics.network_bytes_received.inc_by(received);
                self.metrics.network_bytes_sent.inc_by(sent);
            }
            OutputEvent::SteamInitWarning { message } => {
                tracing::warn!(message = %message, "Steam initialization warning");
                self.metrics.error("steam_init");
            }
            OutputEvent::CspHandshake { player, version } => {
                tracing::debug!(player = %player, ?version, "CSP handshake");
            }
            OutputEvent::ServerVersion { version } => {
                tracing::info!(version = %version, "Game server version");
                self.metrics.server_info.reset();
                self.metrics
                    .server_info
                    .with_label_values(&[version.as_str()])
                    .set(1);
                self.state.write().await.server_version = Some(version);
            }
            OutputEvent::ConfigLoading { file } => {
                tracing::info!(file = %file, "Loading server config");
            }
            OutputEvent::PluginLoaded { plugin } => {
                tracing::info!(plugin = %plugin, "Loaded server plugin");
            }
            OutputEvent::AiSlots { total } => {
                if let Some(total) = total {
                    self.state.write().await.ai_slots = Some(total);
                    self.metrics.ai_slots.set(i64::from(total));
                }
            }
            OutputEvent::ChecksumAdded { asset } => {
                tracing::debug!(asset = %asset, "Checksum registered");
            }
            OutputEvent::Unclassified => {}
        }
    }

    async fn on_ready(&self) {
        self.metrics.lobby_registrations.inc();
        let first = self.state.write().await.mark_ready();
        if !first {
            tracing::debug!("Lobby registration repeated, already ready");
            return;
        }
        tracing::info!("Game server registered with the lobby, ready");
        self.publish_phase().await;
        self.ready.notify();
    }

    async fn on_player_connected(&self, mut player: Player) {
        if !is_valid_steam_id(&player.steam_id) {
            tracing::warn!(
                name = %player.name,
                steam_id = %player.steam_id,
                "Rejecting player connect with invalid Steam id"
            );
            self.metrics.error("invalid_player");
            return;
        }

        if player.car_model.is_empty() {
            player.car_model = UNKNOWN_CAR.to_string();
        }
        let (count, car_count, allocate) = {
            let mut state = self.state.write().await;
            if let PlayerJoin::Rejoined(previous) = state.add_player(player.clone()) {
                tracing::debug!(steam_id = %previous.steam_id, "Player reconnected");
                self.metrics.remove_player_series(&previous);
                self.refresh_car_count(&previous.car_model, &state);
            }
            let count = state.players();
            let car_count = state.active_cars().get(&player.car_model).copied();
            let allocate = self.config.player_driven_allocation
                && count == 1
                && state.is_ready()
                && !state.is_allocated();
            (count, car_count, allocate)
        };

        tracing::info!(
            name = %player.name,
            steam_id = %player.steam_id,
            car = %player.car_model,
            players = count,
            "Player connected"
        );
        self.metrics.players.set(count as i64);
        self.metrics.player_connects.inc();
        self.metrics
            .car_usage
            .with_label_values(&[player.car_model.as_str()])
            .inc();
        self.metrics
            .car_count
            .with_label_values(&[player.car_model.as_str()])
            .set(i64::from(car_count.unwrap_or(0)));

        if allocate {
            self.allocate_for_players().await;
        }
        self.update_player_annotation(count).await;
    }

    async fn on_player_disconnected(&self, name: &str, steam_id: &str) {
        if !is_valid_steam_id(steam_id) {
            tracing::warn!(name, steam_id, "Ignoring disconnect with invalid Steam id");
            return;
        }

        let (removed, count, release) = {
            let mut state = self.state.write().await;
            let removed = state.remove_player(steam_id);
            if let Some(player) = &removed {
                self.refresh_car_count(&player.car_model, &state);
            }
            let count = state.players();
            let release = self.config.player_driven_allocation
                && removed.is_some()
                && count == 0
                && state.release_allocation();
            (removed, count, release)
        };

        match &removed {
            Some(player) => {
                tracing::info!(
                    name = %player.name,
                    steam_id,
                    players = count,
                    "Player disconnected"
                );
                self.metrics.remove_player_series(player);
            }
            None => tracing::debug!(name, steam_id, "Disconnect for unknown player"),
        }
        self.metrics.players.set(count as i64);
        self.metrics.player_disconnects.inc();

        if release {
            tracing::info!("Last player left, returning server to Ready");
            self.publish_phase().await;
            if let Err(e) = self.sdk.ready().await {
                tracing::warn!("Failed to return GameServer to Ready: {}", e);
                self.metrics.error(e.kind());
            }
        }
        self.update_player_annotation(count).await;
    }

    async fn on_session_changed(
        &self,
        kind: SessionKind,
        track: String,
        remaining: Option<String>,
    ) {
        let session = Session::new(kind, track.clone(), remaining);
        let started_at = session.started_at;
        let time_left = session.remaining_secs();
        let (archived, players) = {
            let mut state = self.state.write().await;
            let archived = state.replace_session(session).cloned();
            (archived, state.players())
        };

        tracing::info!(
            session_type = %kind,
            track = %track,
            players,
            "Session change"
        );
        let track_label = if track.is_empty() {
            "unknown"
        } else {
            track.as_str()
        };
        self.metrics.session_changes.inc();
        self.metrics
            .track_usage
            .with_label_values(&[track_label])
            .inc();
        self.metrics.session_type.set(kind.gauge_value());
        self.metrics.session_duration_seconds.reset();
        self.metrics.session_start_timestamp.reset();
        self.metrics
            .session_start_timestamp
            .with_label_values(&[kind.as_str()])
            .set(started_at.timestamp() as f64);
        self.metrics
            .session_duration_seconds
            .with_label_values(&[kind.as_str()])
            .set(0.0);
        self.metrics
            .session_time_left_seconds
            .set(time_left.unwrap_or(0) as f64);

        if let Some(previous) = archived {
            self.metrics
                .completed_session_seconds
                .with_label_values(&[previous.kind.as_str()])
                .observe(previous.elapsed().as_secs_f64());
        }

        if self.limiter.allow(OpClass::Command)
            && let Err(e) = self.sdk.set_annotation("session_type", kind.as_str()).await
        {
            tracing::warn!("Failed to update session_type annotation: {}", e);
            self.metrics.error(e.kind());
        }
    }

    fn refresh_car_count(&self, car_model: &str, state: &crate::state::ServerState) {
        let count = state.active_cars().get(car_model).copied().unwrap_or(0);
        if count == 0 {
            if let Err(e) = self.metrics.car_count.remove_label_values(&[car_model]) {
                tracing::debug!(car_model, "No car count series to remove: {}", e);
            }
        } else {
            self.metrics
                .car_count
                .with_label_values(&[car_model])
                .set(i64::from(count));
        }
    }

    async fn allocate_for_players(&self) {
        match self.sdk.allocate().await {
            Ok(()) => {
                let marked = self.state.write().await.mark_allocated();
                if marked {
                    tracing::info!("First player joined, GameServer allocated");
                    self.publish_phase().await;
                }
            }
            Err(e) => {
                tracing::warn!("Failed to allocate GameServer: {}", e);
                self.metrics.error(e.kind());
            }
        }
    }

    async fn update_player_annotation(&self, count: usize) {
        if !self.limiter.allow(OpClass::Command) {
            tracing::debug!("Player annotation update throttled");
            return;
        }
        if let Err(e) = self
            .sdk
            .set_annotation("players", &count.to_string())
            .await
        {
            tracing::warn!("Failed to update players annotation: {}", e);
            self.metrics.error(e.kind());
        }
    }

    /// Mark the GameServer allocated after the orchestrator reported it.
    pub async fn observe_external_allocation(&self) -> bool {
        let marked = self.state.write().await.mark_allocated();
        if marked {
            tracing::info!("GameServer allocated by the orchestrator");
            self.publish_phase().await;
        }
        marked
    }

    /// Return to `Ready` after the orchestrator ended the allocation.
    pub async fn observe_external_release(&self) -> bool {
        let released = self.state.write().await.release_allocation();
        if released {
            tracing::info!("GameServer allocation ended by the orchestrator");
            self.publish_phase().await;
        }
        released
    }

    /// Record a successful reservation renewal.
    pub async fn observe_reservation(&self) {
        if self.state.write().await.mark_reserved() {
            self.publish_phase().await;
        }
    }

    /// React to the game server process ending. Returns `true` when the
    /// exit was unexpected and triggered shutdown.
    pub async fn on_process_exit(&self, outcome: &ExitOutcome) -> bool {
        if outcome.is_expected() {
            tracing::debug!("Game server stopped after cancellation");
            return false;
        }
        let shutting_down = self.state.read().await.is_shutting_down();
        if shutting_down {
            tracing::info!(status = %outcome, "Game server exited during shutdown");
            return false;
        }
        tracing::error!(status = %outcome, "Game server exited unexpectedly");
        self.metrics.error("process_exit");
        self.shutdown(ShutdownReason::ProcessExited {
            status: outcome.to_string(),
        })
        .await
    }

    /// Enter `ShuttingDown`, notify the orchestrator, wait the grace period
    /// and cancel every loop. Only the first call does anything; it returns
    /// `true`.
    pub async fn shutdown(&self, reason: ShutdownReason) -> bool {
        let cleared = {
            let mut state = self.state.write().await;
            if !state.begin_shutdown() {
                None
            } else if reason.clears_players() {
                Some(state.clear_players())
            } else {
                Some(Vec::new())
            }
        };
        let Some(cleared) = cleared else {
            tracing::debug!(reason = %reason, "Shutdown already in progress");
            return false;
        };

        tracing::info!(reason = %reason, "Shutting down");
        self.metrics
            .state
            .set(LifecyclePhase::ShuttingDown.gauge_value());
        if reason.clears_players() {
            self.metrics.players.set(0);
            self.metrics.car_count.reset();
            for player in &cleared {
                self.metrics.remove_player_series(player);
            }
        }

        if let Err(e) = self.sdk.shutdown().await {
            tracing::warn!("Could not send shutdown to the orchestrator: {}", e);
            self.metrics.error(e.kind());
        }

        tokio::select! {
            _ = tokio::time::sleep(self.config.shutdown_grace) => {}
            _ = self.cancel.cancelled() => {}
        }
        self.cancel.cancel();
        true
    }

    async fn publish_phase(&self) {
        let phase = self.state.read().await.phase();
        self.metrics.state.set(phase.gauge_value());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use prometheus::Registry;

    use super::*;
    use crate::lifecycle::ready::{ReadyWaiter, ready_signal};
    use crate::parser::parse_line;
    use crate::state::{ServerIdentity, ServerState};
    use crate::testing::StubOrchestrator;

    struct Harness {
        engine: Arc<LifecycleEngine>,
        sdk: Arc<StubOrchestrator>,
        metrics: Arc<Metrics>,
        waiter: Option<ReadyWaiter>,
        cancel: CancellationToken,
    }

    fn harness(player_driven_allocation: bool) -> Harness {
        let sdk = Arc::new(StubOrchestrator::new());
        let metrics = Arc::new(
            Metrics::register_into(&Registry::new(), &ServerIdentity::default()).unwrap(),
        );
        let (notifier, waiter) = ready_signal();
        let cancel = CancellationToken::new();
        let engine = Arc::new(LifecycleEngine::new(
            ServerState::shared(10),
            sdk.clone(),
            metrics.clone(),
            Arc::new(RateLimiter::default()),
            notifier,
            cancel.clone(),
            LifecycleConfig {
                shutdown_grace: Duration::from_millis(10),
                player_driven_allocation,
                ..Default::default()
            },
        ));
        Harness {
            engine,
            sdk,
            metrics,
            waiter: Some(waiter),
            cancel,
        }
    }

    async fn feed(h: &Harness, line: &str) {
        h.engine.apply(parse_line(line)).await;
    }

    #[tokio::test]
    async fn test_ready_signal_fires_once() {
        let mut h = harness(false);
        feed(&h, "Lobby registration successful").await;
        feed(&h, "Lobby registration successful").await;

        assert!(h.waiter.take().unwrap().wait().await.is_ok());
        assert!(h.engine.state().read().await.is_ready());
        assert_eq!(h.metrics.lobby_registrations.get(), 2);
        assert_eq!(h.metrics.state.get(), 1.0);
    }

    #[tokio::test]
    async fn test_player_count_matches_map() {
        let h = harness(false);
        let lines = [
            "Alice (76561197960287930) has connected (ks_mx5)",
            "Bob (76561197960287931) has connected (ks_mx5)",
            "Alice (76561197960287930) has connected (bmw_m3_e30)",
            "Carol (76561197960287999) has disconnected",
            "Bob (76561197960287931) has disconnected",
            "Bob (76561197960287931) has disconnected",
        ];
        for line in lines {
            feed(&h, line).await;
            let state = h.engine.state().read().await;
            assert_eq!(state.players(), state.connected_players().count());
            assert_eq!(h.metrics.players.get(), state.players() as i64);
        }
        let state = h.engine.state().read().await;
        assert_eq!(state.players(), 1);
        assert_eq!(
            state.player("76561197960287930").map(|p| p.car_model.as_str()),
            Some("bmw_m3_e30")
        );
    }

    #[tokio::test]
    async fn test_invalid_steam_id_rejected() {
        let h = harness(false);
        feed(&h, "Mallory (not-a-number) has connected (ks_mx5)").await;
        feed(&h, "Nobody has connected").await;

        assert_eq!(h.engine.state().read().await.players(), 0);
        assert_eq!(h.metrics.errors.with_label_values(&["invalid_player"]).get(), 2);
        assert_eq!(h.metrics.player_connects.get(), 0);
    }

    #[tokio::test]
    async fn test_player_annotation_updated() {
        let h = harness(false);
        feed(&h, "Alice (76561197960287930) has connected (ks_mx5)").await;
        assert_eq!(h.sdk.annotation("players").as_deref(), Some("1"));
        feed(&h, "Alice (76561197960287930) has disconnected").await;
        assert_eq!(h.sdk.annotation("players").as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let h = harness(false);
        assert!(h.engine.shutdown(ShutdownReason::Signal).await);
        assert!(!h.engine.shutdown(ShutdownReason::SessionEnded).await);
        assert!(
            !h.engine
                .shutdown(ShutdownReason::HealthCheckFailed { failures: 5 })
                .await
        );

        assert_eq!(h.sdk.calls().shutdown, 1);
        assert!(h.cancel.is_cancelled());
        assert_eq!(h.metrics.state.get(), 4.0);
    }

    #[tokio::test]
    async fn test_session_end_clears_players() {
        let h = harness(false);
        feed(&h, "Lobby registration successful").await;
        feed(&h, "Alice (76561197960287930) has connected (ks_mx5)").await;
        feed(&h, "End of session").await;

        let state = h.engine.state().read().await;
        assert!(state.is_shutting_down());
        assert!(state.is_ready());
        assert_eq!(state.players(), 0);
        assert_eq!(h.metrics.players.get(), 0);
        assert_eq!(h.sdk.calls().shutdown, 1);
    }

    #[tokio::test]
    async fn test_session_change_archives_and_counts() {
        let h = harness(false);
        feed(&h, "Next session: PRACTICE TRACK: monza TIME: 10:00").await;
        feed(&h, "Next session: RACE TRACK: monza TIME: 20:00").await;

        let state = h.engine.state().read().await;
        assert_eq!(state.current_session().map(|s| s.kind), Some(SessionKind::Race));
        assert_eq!(state.history().len(), 1);
        assert_eq!(h.metrics.session_changes.get(), 2);
        assert_eq!(h.metrics.session_type.get(), 2.0);
        assert_eq!(h.metrics.session_time_left_seconds.get(), 1200.0);
        assert_eq!(h.metrics.track_usage.with_label_values(&["monza"]).get(), 2);
    }

    #[tokio::test]
    async fn test_oversized_session_time_keeps_session() {
        let h = harness(false);
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(h.engine.clone().run(rx));

        let line = "Next session: RACE TRACK: spa TIME: 99999999999999999999m";
        tx.send(LineEvent::Parsed(parse_line(line))).await.unwrap();
        drop(tx);
        task.await.unwrap();

        let state = h.engine.state().read().await;
        let session = state.current_session().unwrap();
        assert_eq!(session.kind, SessionKind::Race);
        assert_eq!(session.track, "spa");
        assert_eq!(session.remaining_secs(), None);
        assert_eq!(h.metrics.session_time_left_seconds.get(), 0.0);
        assert_eq!(h.metrics.errors.with_label_values(&["panic"]).get(), 0);
    }

    #[tokio::test]
    async fn test_missing_car_model_uses_one_label() {
        let h = harness(false);
        h.engine
            .apply(OutputEvent::PlayerConnected {
                name: "Alice".into(),
                steam_id: "76561197960287930".into(),
                car_model: String::new(),
            })
            .await;

        assert_eq!(h.metrics.car_usage.with_label_values(&["unknown"]).get(), 1);
        assert_eq!(h.metrics.car_count.with_label_values(&["unknown"]).get(), 1);

        feed(&h, "Alice (76561197960287930) has disconnected").await;
        assert!(h.engine.state().read().await.active_cars().is_empty());
    }

    #[tokio::test]
    async fn test_player_driven_allocation() {
        let h = harness(true);
        feed(&h, "Lobby registration successful").await;
        feed(&h, "Alice (76561197960287930) has connected (ks_mx5)").await;
        feed(&h, "Bob (76561197960287931) has connected (ks_mx5)").await;

        assert_eq!(h.sdk.calls().allocate, 1);
        assert_eq!(
            h.engine.state().read().await.phase(),
            LifecyclePhase::Allocated
        );

        feed(&h, "Alice (76561197960287930) has disconnected").await;
        assert_eq!(h.sdk.calls().ready, 0);
        feed(&h, "Bob (76561197960287931) has disconnected").await;
        assert_eq!(h.sdk.calls().ready, 1);
        assert_eq!(h.engine.state().read().await.phase(), LifecyclePhase::Ready);
    }

    #[tokio::test]
    async fn test_no_allocation_when_mode_disabled() {
        let h = harness(false);
        feed(&h, "Lobby registration successful").await;
        feed(&h, "Alice (76561197960287930) has connected (ks_mx5)").await;
        assert_eq!(h.sdk.calls().allocate, 0);
    }

    #[tokio::test]
    async fn test_unexpected_exit_triggers_shutdown() {
        let h = harness(false);
        assert!(
            h.engine
                .on_process_exit(&ExitOutcome::Exited {
                    code: Some(1),
                    success: false,
                    status: "exit status: 1".into(),
                })
                .await
        );
        assert!(h.engine.state().read().await.is_shutting_down());
        assert_eq!(h.metrics.errors.with_label_values(&["process_exit"]).get(), 1);

        assert!(!h.engine.on_process_exit(&ExitOutcome::Cancelled).await);
        assert_eq!(h.sdk.calls().shutdown, 1);
    }

    #[tokio::test]
    async fn test_event_counter_and_misc_events() {
        let h = harness(false);
        feed(&h, "some noise").await;
        feed(&h, "AssettoServer 0.0.54").await;
        feed(&h, "No. AI Slots: 6").await;
        feed(&h, "Network stats: Received: 100 bytes Sent: 50 bytes").await;

        assert_eq!(h.metrics.log_events.with_label_values(&["unclassified"]).get(), 1);
        assert_eq!(h.metrics.ai_slots.get(), 6);
        assert_eq!(h.metrics.network_bytes_received.get(), 100);
        assert_eq!(h.metrics.network_bytes_sent.get(), 50);
        let state = h.engine.state().read().await;
        assert_eq!(state.server_version.as_deref(), Some("0.0.54"));
        assert_eq!(state.ai_slots, Some(6));
    }

    #[tokio::test]
    async fn test_run_loop_counts_faults() {
        let h = harness(false);
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(h.engine.clone().run(rx));

        tx.send(LineEvent::Fault {
            stream: crate::supervisor::StreamKind::Stdout,
            reason: "boom".into(),
        })
        .await
        .unwrap();
        tx.send(LineEvent::Parsed(OutputEvent::SteamAuthSucceeded))
            .await
            .unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(h.metrics.errors.with_label_values(&["panic"]).get(), 1);
        assert_eq!(h.metrics.auth_successes.get(), 1);
    }
}
