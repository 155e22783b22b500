//! Consumers of intercepted game server output.
//!
//! The interceptor hands every raw chunk to [`OutputSink::on_bytes`] and
//! every complete line to [`OutputSink::on_line`]. Two sinks are registered in
//! production: [`ForwardSink`] copies bytes to the sidecar's own stdio and
//! [`EventDispatchSink`] classifies lines and queues the resulting events.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

use crate::parser::{OutputEvent, parse_line};

/// Which child stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}

/// Message delivered to the lifecycle engine.
#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    /// A classified line.
    Parsed(OutputEvent),
    /// Handling a line panicked; the line was skipped.
    Fault { stream: StreamKind, reason: String },
}

#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Raw bytes exactly as read from the child.
    async fn on_bytes(&self, _stream: StreamKind, _bytes: &[u8]) {}

    /// One trimmed line, truncated to the configured maximum.
    async fn on_line(&self, _stream: StreamKind, _line: &str) {}
}

/// Copies child output to the sidecar's stdout/stderr unchanged.
#[derive(Debug, Default)]
pub struct ForwardSink;

#[async_trait]
impl OutputSink for ForwardSink {
    async fn on_bytes(&self, stream: StreamKind, bytes: &[u8]) {
        let result = match stream {
            StreamKind::Stdout => {
                let mut out = tokio::io::stdout();
                match out.write_all(bytes).await {
                    Ok(()) => out.flush().await,
                    Err(e) => Err(e),
                }
            }
            StreamKind::Stderr => {
                let mut err = tokio::io::stderr();
                match err.write_all(bytes).await {
                    Ok(()) => err.flush().await,
                    Err(e) => Err(e),
                }
            }
        };
        if let Err(e) = result {
            tracing::trace!(%stream, "Failed to forward child output: {}", e);
        }
    }
}

/// Parses lines and queues the events for the lifecycle engine.
///
/// A send that cannot complete within `timeout` is dropped so that a slow
/// consumer never stalls the child's output pipe.
pub struct EventDispatchSink {
    tx: mpsc::Sender<LineEvent>,
    timeout: Duration,
    dropped: AtomicU64,
}

impl EventDispatchSink {
    pub fn new(tx: mpsc::Sender<LineEvent>, timeout: Duration) -> Self {
        Self {
            tx,
            timeout,
            dropped: AtomicU64::new(0),
        }
    }

    /// Events dropped because the queue stayed full or was closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    async fn send(&self, event: LineEvent) {
        match self.tx.send_timeout(event, self.timeout).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    timeout = ?self.timeout,
                    "Event queue full, dropping {:?}",
                    event_kind(&event)
                );
            }
            Err(SendTimeoutError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Event queue closed, dropping line event");
            }
        }
    }
}

fn event_kind(event: &LineEvent) -> &'static str {
    match event {
        LineEvent::Parsed(e) => e.kind(),
        LineEvent::Fault { .. } => "fault",
    }
}

fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[async_trait]
impl OutputSink for EventDispatchSink {
    async fn on_line(&self, stream: StreamKind, line: &str) {
        if line.is_empty() {
            return;
        }
        let event = match catch_unwind(AssertUnwindSafe(|| parse_line(line))) {
            Ok(OutputEvent::Unclassified) => {
                tracing::debug!(%stream, line, "Unclassified server output");
                LineEvent::Parsed(OutputEvent::Unclassified)
            }
            Ok(event) => LineEvent::Parsed(event),
            Err(payload) => {
                let reason = panic_reason(payload.as_ref());
                tracing::error!(%stream, reason = %reason, "Output handler panicked");
                LineEvent::Fault { stream, reason }
            }
        };
        self.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_parses_lines() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = EventDispatchSink::new(tx, Duration::from_millis(50));

        sink.on_line(StreamKind::Stdout, "Lobby registration successful")
            .await;
        sink.on_line(StreamKind::Stderr, "something else").await;
        sink.on_line(StreamKind::Stdout, "").await;

        assert_eq!(
            rx.recv().await,
            Some(LineEvent::Parsed(OutputEvent::LobbyRegistered))
        );
        assert_eq!(
            rx.recv().await,
            Some(LineEvent::Parsed(OutputEvent::Unclassified))
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_drops_after_timeout() {
        let (tx, _rx) = mpsc::channel(1);
        let sink = EventDispatchSink::new(tx, Duration::from_millis(100));

        sink.on_line(StreamKind::Stdout, "End of session").await;
        let start = tokio::time::Instant::now();
        sink.on_line(StreamKind::Stdout, "End of session").await;

        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(sink.dropped(), 1);
    }

    #[tokio::test]
    async fn test_closed_queue_counts_drop() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = EventDispatchSink::new(tx, Duration::from_millis(10));
        sink.on_line(StreamKind::Stdout, "End of session").await;
        assert_eq!(sink.dropped(), 1);
    }

    #[test]
    fn test_panic_reason() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_reason(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_reason(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_reason(payload.as_ref()), "unknown panic");
    }
}
