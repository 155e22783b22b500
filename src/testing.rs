//! Test doubles shared by unit and integration tests.
//!
//! Provides:
//! - [`StubOrchestrator`]: an in-memory orchestrator that counts calls and
//!   records labels/annotations, with runtime failure toggling
//! - [`CollectSink`]: an output sink that records everything it is given
//! - [`engine_with`]: a lifecycle engine wired to a stub and a private registry
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ac_sidecar::testing::StubOrchestrator;
//!
//! # async fn example() {
//! let sdk = Arc::new(StubOrchestrator::new().with_state("Ready"));
//! sdk.set_failing(true);
//! assert_eq!(sdk.calls().health, 0);
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use prometheus::Registry;
use tokio_util::sync::CancellationToken;

use crate::config::LifecycleConfig;
use crate::error::OrchestratorError;
use crate::lifecycle::{LifecycleEngine, ready_signal};
use crate::metrics::Metrics;
use crate::orchestrator::{GameServerInfo, GameServerPort, Orchestrator, Result};
use crate::resilience::RateLimiter;
use crate::state::{ServerIdentity, ServerState};
use crate::supervisor::{OutputSink, StreamKind};

/// Per-operation call counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub health: u32,
    pub ready: u32,
    pub shutdown: u32,
    pub allocate: u32,
    pub reserve: u32,
    pub set_label: u32,
    pub set_annotation: u32,
    pub game_server: u32,
    pub reconnect: u32,
}

#[derive(Default)]
struct Counters {
    health: AtomicU32,
    ready: AtomicU32,
    shutdown: AtomicU32,
    allocate: AtomicU32,
    reserve: AtomicU32,
    set_label: AtomicU32,
    set_annotation: AtomicU32,
    game_server: AtomicU32,
    reconnect: AtomicU32,
}

/// A configurable orchestrator stub.
///
/// Every call is counted, including failed ones. While failing, calls return
/// [`OrchestratorError::Request`] and have no side effects.
pub struct StubOrchestrator {
    counters: Counters,
    should_fail: AtomicBool,
    info: Mutex<GameServerInfo>,
    labels: Mutex<Vec<(String, String)>>,
    annotations: Mutex<Vec<(String, String)>>,
    reservations: Mutex<Vec<Duration>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StubOrchestrator {
    pub fn new() -> Self {
        let info = GameServerInfo {
            name: "ac-test-gs".to_string(),
            labels: HashMap::from([
                ("name".to_string(), "ac-test".to_string()),
                ("type".to_string(), "racing".to_string()),
            ]),
            state: "Scheduled".to_string(),
            ports: vec![GameServerPort {
                name: "default".to_string(),
                port: 7655,
            }],
        };
        Self {
            counters: Counters::default(),
            should_fail: AtomicBool::new(false),
            info: Mutex::new(info),
            labels: Mutex::new(Vec::new()),
            annotations: Mutex::new(Vec::new()),
            reservations: Mutex::new(Vec::new()),
        }
    }

    /// Set the GameServer state returned by `game_server()`.
    pub fn with_state(self, state: impl Into<String>) -> Self {
        self.set_state(state);
        self
    }

    pub fn set_state(&self, state: impl Into<String>) {
        lock(&self.info).state = state.into();
    }

    /// Toggle whether calls fail.
    pub fn set_failing(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> CallCounts {
        let c = &self.counters;
        CallCounts {
            health: c.health.load(Ordering::SeqCst),
            ready: c.ready.load(Ordering::SeqCst),
            shutdown: c.shutdown.load(Ordering::SeqCst),
            allocate: c.allocate.load(Ordering::SeqCst),
            reserve: c.reserve.load(Ordering::SeqCst),
            set_label: c.set_label.load(Ordering::SeqCst),
            set_annotation: c.set_annotation.load(Ordering::SeqCst),
            game_server: c.game_server.load(Ordering::SeqCst),
            reconnect: c.reconnect.load(Ordering::SeqCst),
        }
    }

    /// Labels set so far, in call order.
    pub fn labels(&self) -> Vec<(String, String)> {
        lock(&self.labels).clone()
    }

    /// Annotations set so far, in call order.
    pub fn annotations(&self) -> Vec<(String, String)> {
        lock(&self.annotations).clone()
    }

    /// Most recent value written for an annotation key.
    pub fn annotation(&self, key: &str) -> Option<String> {
        lock(&self.annotations)
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn reservations(&self) -> Vec<Duration> {
        lock(&self.reservations).clone()
    }

    fn hit(&self, counter: &AtomicU32, operation: &'static str) -> Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        if self.should_fail.load(Ordering::SeqCst) {
            Err(OrchestratorError::Request {
                operation,
                reason: "stub failure".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

impl Default for StubOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Orchestrator for StubOrchestrator {
    async fn health(&self) -> Result<()> {
        self.hit(&self.counters.health, "health")
    }

    async fn ready(&self) -> Result<()> {
        self.hit(&self.counters.ready, "ready")?;
        lock(&self.info).state = "Ready".to_string();
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.hit(&self.counters.shutdown, "shutdown")?;
        lock(&self.info).state = "Shutdown".to_string();
        Ok(())
    }

    async fn allocate(&self) -> Result<()> {
        self.hit(&self.counters.allocate, "allocate")?;
        lock(&self.info).state = "Allocated".to_string();
        Ok(())
    }

    async fn reserve(&self, duration: Duration) -> Result<()> {
        self.hit(&self.counters.reserve, "reserve")?;
        lock(&self.reservations).push(duration);
        Ok(())
    }

    async fn set_label(&self, key: &str, value: &str) -> Result<()> {
        self.hit(&self.counters.set_label, "set_label")?;
        lock(&self.labels).push((key.to_string(), value.to_string()));
        Ok(())
    }

    async fn set_annotation(&self, key: &str, value: &str) -> Result<()> {
        self.hit(&self.counters.set_annotation, "set_annotation")?;
        lock(&self.annotations).push((key.to_string(), value.to_string()));
        Ok(())
    }

    async fn game_server(&self) -> Result<GameServerInfo> {
        self.hit(&self.counters.game_server, "game_server")?;
        Ok(lock(&self.info).clone())
    }

    async fn reconnect(&self) -> Result<()> {
        self.hit(&self.counters.reconnect, "reconnect")
    }
}

/// Records bytes per stream and every line, for interception tests.
#[derive(Default)]
pub struct CollectSink {
    stdout: Mutex<Vec<u8>>,
    stderr: Mutex<Vec<u8>>,
    lines: Mutex<Vec<String>>,
}

impl CollectSink {
    pub fn bytes(&self, stream: StreamKind) -> Vec<u8> {
        match stream {
            StreamKind::Stdout => lock(&self.stdout).clone(),
            StreamKind::Stderr => lock(&self.stderr).clone(),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        lock(&self.lines).clone()
    }
}

#[async_trait]
impl OutputSink for CollectSink {
    async fn on_bytes(&self, stream: StreamKind, bytes: &[u8]) {
        match stream {
            StreamKind::Stdout => lock(&self.stdout).extend_from_slice(bytes),
            StreamKind::Stderr => lock(&self.stderr).extend_from_slice(bytes),
        }
    }

    async fn on_line(&self, _stream: StreamKind, line: &str) {
        lock(&self.lines).push(line.to_string());
    }
}

/// Build a lifecycle engine around `sdk` with a short shutdown grace.
///
/// Metrics go to a fresh registry so tests never share series.
pub fn engine_with(sdk: Arc<dyn Orchestrator>) -> Arc<LifecycleEngine> {
    let metrics = Metrics::register_into(&Registry::new(), &ServerIdentity::default())
        .unwrap_or_else(|e| panic!("metrics registration failed: {e}"));
    let (notifier, _waiter) = ready_signal();
    Arc::new(LifecycleEngine::new(
        ServerState::shared(10),
        sdk,
        Arc::new(metrics),
        Arc::new(RateLimiter::default()),
        notifier,
        CancellationToken::new(),
        LifecycleConfig {
            shutdown_grace: Duration::from_millis(10),
            ..Default::default()
        },
    ))
}
