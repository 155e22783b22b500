//! HTTP telemetry surface: `/metrics` for the scraper and `/health` for the
//! orchestrator's liveness probe, each on its own port.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::StartupError;
use crate::state::{ServerState, SharedState};

/// Why the liveness probe is failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotLive {
    ShuttingDown,
    NotReady,
    StalePing,
}

impl NotLive {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ShuttingDown => "server is shutting down",
            Self::NotReady => "server not ready",
            Self::StalePing => "health ping is stale",
        }
    }
}

/// Liveness policy. Shutdown wins over every other condition.
pub fn liveness(state: &ServerState, max_ping_age: Duration) -> Result<(), NotLive> {
    if state.is_shutting_down() {
        return Err(NotLive::ShuttingDown);
    }
    if !state.is_ready() {
        return Err(NotLive::NotReady);
    }
    if state.health_ping_age() >= max_ping_age {
        return Err(NotLive::StalePing);
    }
    Ok(())
}

#[derive(Clone)]
struct HealthState {
    state: SharedState,
    max_ping_age: Duration,
}

async fn health_handler(State(h): State<HealthState>) -> impl IntoResponse {
    let verdict = liveness(&*h.state.read().await, h.max_ping_age);
    match verdict {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(not_live) => {
            tracing::debug!(reason = not_live.reason(), "Liveness probe failing");
            (StatusCode::SERVICE_UNAVAILABLE, not_live.reason())
        }
    }
}

async fn metrics_handler(State(registry): State<Registry>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    match encoder.encode(&registry.gather(), &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            buffer,
        ),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain".to_string())],
                e.to_string().into_bytes(),
            )
        }
    }
}

pub fn health_router(state: SharedState, max_ping_age: Duration) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(HealthState {
            state,
            max_ping_age,
        })
}

pub fn metrics_router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry)
}

/// Bind `port` on all interfaces and serve `app` until `cancel` fires.
///
/// The listener is bound before returning so bind failures surface as
/// startup errors.
pub async fn serve(
    name: &'static str,
    port: u16,
    app: Router,
    cancel: CancellationToken,
) -> Result<(SocketAddr, JoinHandle<()>), StartupError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| StartupError::Telemetry {
            port,
            reason: e.to_string(),
        })?;
    let local = listener.local_addr().map_err(|e| StartupError::Telemetry {
        port,
        reason: e.to_string(),
    })?;

    tracing::info!("{} endpoint listening on {}", name, local);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
                tracing::debug!("{} endpoint shutting down", name);
            })
            .await
        {
            tracing::error!("{} server error: {}", name, e);
        }
    });
    Ok((local, handle))
}
