//! Liveness endpoint over a real socket.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use ac_sidecar::state::ServerState;
use ac_sidecar::telemetry::{health_router, serve};

async fn get_health(url: &str) -> (u16, String) {
    let response = reqwest::get(url).await.unwrap();
    let status = response.status().as_u16();
    (status, response.text().await.unwrap())
}

#[tokio::test]
async fn health_follows_lifecycle() {
    let state = ServerState::shared(1);
    let cancel = CancellationToken::new();
    let (addr, server) = serve(
        "health",
        0,
        health_router(state.clone(), Duration::from_secs(10)),
        cancel.clone(),
    )
    .await
    .unwrap();
    let url = format!("http://127.0.0.1:{}/health", addr.port());

    assert_eq!(get_health(&url).await, (503, "server not ready".to_string()));

    {
        let mut s = state.write().await;
        s.mark_ready();
        s.record_health_ping();
    }
    assert_eq!(get_health(&url).await, (200, "ok".to_string()));

    // Still ready, but shutting down must fail liveness immediately.
    state.write().await.begin_shutdown();
    assert_eq!(
        get_health(&url).await,
        (503, "server is shutting down".to_string())
    );

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn stale_ping_fails_liveness() {
    let state = ServerState::shared(1);
    state.write().await.mark_ready();
    let cancel = CancellationToken::new();
    let (addr, _server) = serve(
        "health",
        0,
        health_router(state, Duration::from_millis(50)),
        cancel.clone(),
    )
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let (status, body) = get_health(&format!("http://127.0.0.1:{}/health", addr.port())).await;
    assert_eq!(status, 503);
    assert_eq!(body, "health ping is stale");
    cancel.cancel();
}

#[tokio::test]
async fn port_in_use_is_a_startup_error() {
    let taken = tokio::net::TcpListener::bind("0.0.0.0:0").await.unwrap();
    let port = taken.local_addr().unwrap().port();

    let err = serve(
        "health",
        port,
        health_router(ServerState::shared(1), Duration::from_secs(10)),
        CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains(&port.to_string()));
}
