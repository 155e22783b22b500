//! Process supervisor against real child processes.
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ac_sidecar::config::SupervisorConfig;
use ac_sidecar::supervisor::{
    EventDispatchSink, ExitOutcome, LineEvent, OutputSink, StreamKind, Supervisor,
};
use ac_sidecar::testing::CollectSink;

fn shell(dir: &TempDir, body: &str, max_line_bytes: usize) -> SupervisorConfig {
    let path = dir.path().join("server.sh");
    std::fs::write(&path, body).unwrap();
    SupervisorConfig {
        program: "/bin/sh".into(),
        args: path.display().to_string(),
        max_line_bytes,
        ..Default::default()
    }
}

#[tokio::test]
async fn output_is_forwarded_and_classified() {
    let dir = TempDir::new().unwrap();
    let config = shell(
        &dir,
        "echo 'Starting Assetto Corsa Server...'\n\
         echo 'Bob (76561197960287931) has connected (bmw_m3_e30)'\n\
         echo '[ERR] track missing' >&2\n\
         exit 3\n",
        8192,
    );
    let collect = Arc::new(CollectSink::default());
    let (tx, mut rx) = mpsc::channel(16);
    let supervisor = Supervisor::new(config)
        .with_sink(collect.clone() as Arc<dyn OutputSink>)
        .with_sink(Arc::new(EventDispatchSink::new(tx, Duration::from_millis(100))));

    let process = supervisor.spawn().unwrap();
    let outcome = process.wait(&CancellationToken::new()).await;

    match outcome {
        ExitOutcome::Exited { code, success, .. } => {
            assert_eq!(code, Some(3));
            assert!(!success);
        }
        other => panic!("unexpected outcome: {other}"),
    }
    assert_eq!(
        String::from_utf8(collect.bytes(StreamKind::Stderr)).unwrap(),
        "[ERR] track missing\n"
    );
    drop(supervisor);

    let mut events = Vec::new();
    while let Some(LineEvent::Parsed(event)) = rx.recv().await {
        events.push(event.kind());
    }
    events.sort_unstable();
    assert_eq!(
        events,
        vec!["player_connected", "server_error", "server_starting"]
    );
}

#[tokio::test]
async fn long_lines_are_truncated_for_parsing_only() {
    let dir = TempDir::new().unwrap();
    let config = shell(&dir, "printf '%0300d\\n' 0\n", 64);
    let collect = Arc::new(CollectSink::default());
    let supervisor = Supervisor::new(config).with_sink(collect.clone() as Arc<dyn OutputSink>);

    let outcome = supervisor
        .spawn()
        .unwrap()
        .wait(&CancellationToken::new())
        .await;

    assert!(matches!(outcome, ExitOutcome::Exited { success: true, .. }));
    assert_eq!(collect.bytes(StreamKind::Stdout).len(), 301);
    assert_eq!(collect.lines(), vec!["0".repeat(64)]);
}

#[tokio::test]
async fn cancellation_kills_the_child() {
    let dir = TempDir::new().unwrap();
    let config = shell(&dir, "echo started\nexec sleep 30\n", 8192);
    let supervisor = Supervisor::new(config);
    let process = supervisor.spawn().unwrap();
    assert!(process.id().is_some());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let outcome = tokio::time::timeout(Duration::from_secs(5), process.wait(&cancel))
        .await
        .unwrap();
    assert_eq!(outcome, ExitOutcome::Cancelled);
}
