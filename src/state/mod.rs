//! Shared server state.
//!
//! One [`ServerState`] exists per process and is shared as [`SharedState`].
//! Every mutation goes through a method here so that the player count always
//! matches the connected player map and the shutdown flag never resets.
//! Callers must not hold the lock across SDK calls or other I/O.

mod player;
mod session;

pub use player::Player;
pub use session::{Session, SessionHistory, SessionKind};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Handle shared by every task.
pub type SharedState = Arc<RwLock<ServerState>>;

/// Lifecycle phase derived from the state flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Starting,
    Ready,
    Allocated,
    Reserved,
    ShuttingDown,
}

impl LifecyclePhase {
    /// Value published on the server state gauge.
    pub fn gauge_value(&self) -> f64 {
        match self {
            Self::Starting => 0.0,
            Self::Ready => 1.0,
            Self::Allocated => 2.0,
            Self::Reserved => 3.0,
            Self::ShuttingDown => 4.0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ShuttingDown)
    }
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Allocated => "allocated",
            Self::Reserved => "reserved",
            Self::ShuttingDown => "shutting_down",
        };
        write!(f, "{}", s)
    }
}

/// Identity assigned from the GameServer metadata at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerIdentity {
    pub id: String,
    pub name: String,
    pub kind: String,
}

/// Outcome of [`ServerState::add_player`].
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerJoin {
    /// A new Steam id joined.
    Joined,
    /// The Steam id was already connected; its entry was replaced.
    Rejoined(Player),
}

#[derive(Debug)]
pub struct ServerState {
    identity: ServerIdentity,
    identity_assigned: bool,

    ready: bool,
    allocated: bool,
    reserved: bool,
    shutting_down: bool,

    connected_players: HashMap<String, Player>,
    active_cars: HashMap<String, u32>,

    /// Last successful SDK health ping.
    last_health_ping: Instant,
    pub tick_rate: f64,
    pub track_grip: f64,
    pub track_temp: f64,
    pub air_temp: f64,

    current_session: Option<Session>,
    history: SessionHistory,

    /// Server build reported in the log banner.
    pub server_version: Option<String>,
    /// AI slot count reported by the server.
    pub ai_slots: Option<u32>,
    pub restarted_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            identity: ServerIdentity::default(),
            identity_assigned: false,
            ready: false,
            allocated: false,
            reserved: false,
            shutting_down: false,
            connected_players: HashMap::new(),
            active_cars: HashMap::new(),
            last_health_ping: Instant::now(),
            tick_rate: 0.0,
            track_grip: 0.0,
            track_temp: 0.0,
            air_temp: 0.0,
            current_session: None,
            history: SessionHistory::new(history_capacity),
            server_version: None,
            ai_slots: None,
            restarted_at: Utc::now(),
        }
    }

    /// Wrap a fresh state for sharing between tasks.
    pub fn shared(history_capacity: usize) -> SharedState {
        Arc::new(RwLock::new(Self::new(history_capacity)))
    }

    /// Assign the server identity. Only the first call has an effect.
    pub fn assign_identity(&mut self, identity: ServerIdentity) -> bool {
        if self.identity_assigned {
            return false;
        }
        self.identity = identity;
        self.identity_assigned = true;
        true
    }

    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    pub fn phase(&self) -> LifecyclePhase {
        if self.shutting_down {
            LifecyclePhase::ShuttingDown
        } else if !self.ready {
            LifecyclePhase::Starting
        } else if self.allocated && self.reserved {
            LifecyclePhase::Reserved
        } else if self.allocated {
            LifecyclePhase::Allocated
        } else {
            LifecyclePhase::Ready
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_allocated(&self) -> bool {
        self.allocated
    }

    pub fn is_reserved(&self) -> bool {
        self.reserved
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Mark the server ready. Returns `true` only on the first transition.
    pub fn mark_ready(&mut self) -> bool {
        if self.ready || self.shutting_down {
            return false;
        }
        self.ready = true;
        true
    }

    /// Mark the server allocated. Refused before the server has been ready.
    pub fn mark_allocated(&mut self) -> bool {
        if !self.ready || self.allocated || self.shutting_down {
            return false;
        }
        self.allocated = true;
        true
    }

    /// Return to `Ready` after an allocation ends.
    pub fn release_allocation(&mut self) -> bool {
        if !self.allocated || self.shutting_down {
            return false;
        }
        self.allocated = false;
        self.reserved = false;
        true
    }

    /// Record a successful reservation renewal.
    pub fn mark_reserved(&mut self) -> bool {
        if self.reserved || self.shutting_down {
            return false;
        }
        self.reserved = true;
        true
    }

    /// Enter `ShuttingDown`. Returns `true` only for the first caller.
    pub fn begin_shutdown(&mut self) -> bool {
        if self.shutting_down {
            return false;
        }
        self.shutting_down = true;
        true
    }

    /// Number of connected players; always equal to the player map size.
    pub fn players(&self) -> usize {
        self.connected_players.len()
    }

    pub fn player(&self, steam_id: &str) -> Option<&Player> {
        self.connected_players.get(steam_id)
    }

    pub fn connected_players(&self) -> impl Iterator<Item = &Player> {
        self.connected_players.values()
    }

    pub fn active_cars(&self) -> &HashMap<String, u32> {
        &self.active_cars
    }

    pub fn add_player(&mut self, player: Player) -> PlayerJoin {
        *self
            .active_cars
            .entry(player.car_model.clone())
            .or_insert(0) += 1;
        match self.connected_players.insert(player.steam_id.clone(), player) {
            Some(previous) => {
                self.release_car(&previous.car_model);
                PlayerJoin::Rejoined(previous)
            }
            None => PlayerJoin::Joined,
        }
    }

    /// Remove exactly the given Steam id.
    pub fn remove_player(&mut self, steam_id: &str) -> Option<Player> {
        let removed = self.connected_players.remove(steam_id)?;
        self.release_car(&removed.car_model);
        Some(removed)
    }

    /// Drop every connected player, returning them.
    pub fn clear_players(&mut self) -> Vec<Player> {
        self.active_cars.clear();
        self.connected_players.drain().map(|(_, p)| p).collect()
    }

    fn release_car(&mut self, car_model: &str) {
        if let Some(count) = self.active_cars.get_mut(car_model) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.active_cars.remove(car_model);
            }
        }
    }

    pub fn current_session(&self) -> Option<&Session> {
        self.current_session.as_ref()
    }

    /// Replace the active session, archiving the previous one.
    pub fn replace_session(&mut self, session: Session) -> Option<&Session> {
        if let Some(mut previous) = self.current_session.replace(session) {
            previous.ended_at = Some(Utc::now());
            self.history.push(previous);
            return self.history.latest();
        }
        None
    }

    pub fn history(&self) -> &SessionHistory {
        &self.history
    }

    pub fn record_health_ping(&mut self) {
        self.last_health_ping = Instant::now();
    }

    pub fn last_health_ping(&self) -> Instant {
        self.last_health_ping
    }

    pub fn health_ping_age(&self) -> Duration {
        self.last_health_ping.elapsed()
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(name: &str, id: &str, car: &str) -> Player {
        Player::new(name, id, car)
    }

    #[test]
    fn test_phase_progression() {
        let mut state = ServerState::default();
        assert_eq!(state.phase(), LifecyclePhase::Starting);

        assert!(state.mark_ready());
        assert_eq!(state.phase(), LifecyclePhase::Ready);

        assert!(state.mark_allocated());
        assert_eq!(state.phase(), LifecyclePhase::Allocated);

        assert!(state.mark_reserved());
        assert_eq!(state.phase(), LifecyclePhase::Reserved);

        assert!(state.begin_shutdown());
        assert_eq!(state.phase(), LifecyclePhase::ShuttingDown);
        assert!(state.phase().is_terminal());
    }

    #[test]
    fn test_reserved_without_allocation_stays_ready() {
        let mut state = ServerState::default();
        state.mark_ready();
        state.mark_reserved();
        assert_eq!(state.phase(), LifecyclePhase::Ready);
    }

    #[test]
    fn test_ready_fires_once() {
        let mut state = ServerState::default();
        assert!(state.mark_ready());
        assert!(!state.mark_ready());
        assert!(state.is_ready());
    }

    #[test]
    fn test_allocation_requires_ready() {
        let mut state = ServerState::default();
        assert!(!state.mark_allocated());
        state.mark_ready();
        assert!(state.mark_allocated());
        assert!(state.release_allocation());
        assert_eq!(state.phase(), LifecyclePhase::Ready);
    }

    #[test]
    fn test_shutdown_is_monotonic() {
        let mut state = ServerState::default();
        state.mark_ready();
        assert!(state.begin_shutdown());
        assert!(!state.begin_shutdown());
        assert!(!state.mark_allocated());
        assert!(!state.release_allocation());
        assert!(state.is_shutting_down());
    }

    #[test]
    fn test_identity_assigned_once() {
        let mut state = ServerState::default();
        assert!(state.assign_identity(ServerIdentity {
            id: "ac-1".into(),
            name: "ac-1".into(),
            kind: "racing".into(),
        }));
        assert!(!state.assign_identity(ServerIdentity::default()));
        assert_eq!(state.identity().id, "ac-1");
    }

    #[test]
    fn test_player_count_tracks_map() {
        let mut state = ServerState::default();
        assert_eq!(state.add_player(driver("Alice", "1", "ks_mx5")), PlayerJoin::Joined);
        assert_eq!(state.add_player(driver("Bob", "2", "ks_mx5")), PlayerJoin::Joined);
        assert_eq!(state.players(), 2);
        assert_eq!(state.active_cars().get("ks_mx5"), Some(&2));

        // Reconnect with a different car replaces the entry.
        let rejoin = state.add_player(driver("Alice", "1", "bmw_m3"));
        assert!(matches!(rejoin, PlayerJoin::Rejoined(p) if p.car_model == "ks_mx5"));
        assert_eq!(state.players(), 2);
        assert_eq!(state.active_cars().get("ks_mx5"), Some(&1));
        assert_eq!(state.active_cars().get("bmw_m3"), Some(&1));

        assert!(state.remove_player("3").is_none());
        assert_eq!(state.players(), 2);

        let removed = state.remove_player("2").unwrap();
        assert_eq!(removed.name, "Bob");
        assert_eq!(state.players(), 1);
        assert!(state.active_cars().get("ks_mx5").is_none());
        assert!(state.player("1").is_some());
    }

    #[test]
    fn test_clear_players() {
        let mut state = ServerState::default();
        state.add_player(driver("Alice", "1", "a"));
        state.add_player(driver("Bob", "2", "b"));
        let cleared = state.clear_players();
        assert_eq!(cleared.len(), 2);
        assert_eq!(state.players(), 0);
        assert!(state.active_cars().is_empty());
    }

    #[test]
    fn test_replace_session_archives_previous() {
        let mut state = ServerState::new(2);
        assert!(
            state
                .replace_session(Session::new(SessionKind::Practice, "monza", None))
                .is_none()
        );

        let archived = state
            .replace_session(Session::new(SessionKind::Race, "monza", None))
            .cloned()
            .unwrap();
        assert_eq!(archived.kind, SessionKind::Practice);
        assert!(archived.ended_at.is_some());
        assert_eq!(state.current_session().map(|s| s.kind), Some(SessionKind::Race));

        state.replace_session(Session::new(SessionKind::Qualifying, "spa", None));
        state.replace_session(Session::new(SessionKind::Race, "spa", None));
        assert_eq!(state.history().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_ping_age() {
        let mut state = ServerState::default();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(state.health_ping_age() >= Duration::from_secs(5));
        state.record_health_ping();
        assert_eq!(state.health_ping_age(), Duration::ZERO);
    }
}
