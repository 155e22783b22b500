//! Game server process lifecycle.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SupervisorConfig;
use crate::supervisor::error::{Result, SupervisorError};
use crate::supervisor::lines::LineSplitter;
use crate::supervisor::sink::{OutputSink, StreamKind};

const READ_CHUNK: usize = 8192;
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How the supervised process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The process exited on its own.
    Exited {
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
        success: bool,
        /// Human-readable status.
        status: String,
    },
    /// The process was killed because the sidecar is shutting down.
    Cancelled,
    /// The exit status could not be collected.
    Lost {
        /// Reason for failure.
        reason: String,
    },
}

impl ExitOutcome {
    fn from_status(status: ExitStatus) -> Self {
        Self::Exited {
            code: status.code(),
            success: status.success(),
            status: status.to_string(),
        }
    }

    /// Whether the exit was requested by the sidecar.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited { status, .. } => write!(f, "{}", status),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Lost { reason } => write!(f, "lost: {}", reason),
        }
    }
}

/// Launches the game server and fans its output out to the registered sinks.
pub struct Supervisor {
    config: SupervisorConfig,
    sinks: Vec<Arc<dyn OutputSink>>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            sinks: Vec::new(),
        }
    }

    /// Register an output consumer. Sinks run in registration order.
    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Start the process with both output streams intercepted.
    pub fn spawn(&self) -> Result<GameProcess> {
        let program = self.config.program.display().to_string();
        let args = self.config.arg_list();

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| SupervisorError::SpawnFailed {
            program: program.clone(),
            reason: e.to_string(),
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or(SupervisorError::StreamUnavailable { stream: "stdout" })?;
        let stderr = child
            .stderr
            .take()
            .ok_or(SupervisorError::StreamUnavailable { stream: "stderr" })?;

        let sinks: Arc<[Arc<dyn OutputSink>]> = self.sinks.clone().into();
        let max = self.config.max_line_bytes;
        let readers = vec![
            tokio::spawn(intercept(stdout, StreamKind::Stdout, Arc::clone(&sinks), max)),
            tokio::spawn(intercept(stderr, StreamKind::Stderr, sinks, max)),
        ];

        let pid = child.id();
        tracing::info!(program = %program, ?args, pid, "Started game server");

        Ok(GameProcess {
            child,
            pid,
            readers,
        })
    }
}

/// A running game server.
pub struct GameProcess {
    child: Child,
    pid: Option<u32>,
    readers: Vec<JoinHandle<()>>,
}

impl GameProcess {
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for the process to exit, or kill it once `cancel` fires.
    pub async fn wait(mut self, cancel: &CancellationToken) -> ExitOutcome {
        let outcome = tokio::select! {
            status = self.child.wait() => match status {
                Ok(status) => ExitOutcome::from_status(status),
                Err(e) => ExitOutcome::Lost { reason: SupervisorError::Wait(e).to_string() },
            },
            _ = cancel.cancelled() => {
                tracing::info!(pid = self.pid, "Stopping game server");
                if let Err(e) = self.child.start_kill() {
                    tracing::warn!(pid = self.pid, "Failed to kill game server: {}", e);
                }
                if let Err(e) = self.child.wait().await {
                    tracing::warn!(pid = self.pid, "Failed to reap game server: {}", e);
                }
                ExitOutcome::Cancelled
            }
        };

        self.drain_readers().await;
        outcome
    }

    /// Let the interceptors flush what the child wrote before exiting.
    async fn drain_readers(&mut self) {
        for reader in self.readers.drain(..) {
            let abort = reader.abort_handle();
            if tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await.is_err() {
                abort.abort();
                tracing::debug!("Output reader did not finish in time, aborted");
            }
        }
    }
}

/// Read a child stream to EOF, feeding every sink.
pub async fn intercept<R>(
    mut reader: R,
    stream: StreamKind,
    sinks: Arc<[Arc<dyn OutputSink>]>,
    max_line_bytes: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut splitter = LineSplitter::new(max_line_bytes);
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(%stream, "Failed to read game server output: {}", e);
                break;
            }
        };
        let chunk = &buf[..n];
        for sink in sinks.iter() {
            sink.on_bytes(stream, chunk).await;
        }
        for line in splitter.push(chunk) {
            deliver(&sinks, stream, line).await;
        }
    }

    if let Some(line) = splitter.finish() {
        deliver(&sinks, stream, line).await;
    }
    tracing::debug!(%stream, "Game server stream closed");
}

async fn deliver(
    sinks: &[Arc<dyn OutputSink>],
    stream: StreamKind,
    line: crate::supervisor::lines::SplitLine,
) {
    if line.truncated {
        tracing::warn!(%stream, "Oversized output line truncated");
    }
    for sink in sinks {
        sink.on_line(stream, &line.text).await;
    }
}
