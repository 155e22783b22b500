//! Startup sequence, task wiring and bounded teardown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use prometheus::Registry;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::StartupError;
use crate::lifecycle::{LifecycleEngine, ShutdownReason, ready_signal};
use crate::metrics::Metrics;
use crate::monitor::{
    MetricsExporter, PerfMonitor, ProcessSampler, ResourceMonitor, spawn_health,
    spawn_reservation,
};
use crate::orchestrator::{AgonesClient, GameServerInfo, GuardedOrchestrator, Orchestrator};
use crate::resilience::{CircuitBreaker, RateLimiter};
use crate::signals::wait_for_termination;
use crate::state::{ServerIdentity, ServerState};
use crate::supervisor::{EventDispatchSink, ExitOutcome, ForwardSink, Supervisor};
use crate::telemetry;

/// The sidecar: one game server, one orchestrator connection.
pub struct Sidecar {
    config: Config,
    sdk: Arc<dyn Orchestrator>,
    cancel: CancellationToken,
}

impl Sidecar {
    /// Connect to the Agones SDK gateway described by `config`.
    pub fn new(config: Config) -> Result<Self, StartupError> {
        let client = AgonesClient::new(&config.orchestrator).map_err(StartupError::Connect)?;
        Ok(Self::with_orchestrator(config, Arc::new(client)))
    }

    /// Use an existing orchestrator client. Calls still go through the
    /// circuit breaker.
    pub fn with_orchestrator(config: Config, sdk: Arc<dyn Orchestrator>) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(
            config.orchestrator.circuit_max_failures,
            config.orchestrator.circuit_cooldown,
        ));
        Self {
            sdk: Arc::new(GuardedOrchestrator::new(sdk, breaker)),
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelling this token stops every loop and kills the game server.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until the game server ends or a shutdown is triggered.
    pub async fn run(self) -> Result<(), StartupError> {
        let Self {
            config,
            sdk,
            cancel,
        } = self;

        let signalled = CancellationToken::new();
        let signals = spawn_signal_watch(signalled.clone(), cancel.clone());
        let result = supervise(config, sdk, cancel.clone(), signalled).await;

        cancel.cancel();
        if let Err(e) = signals.await {
            tracing::debug!("Signal watcher ended abnormally: {}", e);
        }
        result
    }
}

async fn supervise(
    config: Config,
    sdk: Arc<dyn Orchestrator>,
    cancel: CancellationToken,
    signalled: CancellationToken,
) -> Result<(), StartupError> {
    let info = until_stopped(&signalled, &cancel, async {
        sdk.game_server().await.map_err(StartupError::Connect)
    })
    .await?;
    let identity = identity_from(&info, &config);
    tracing::info!(
        server_id = %identity.id,
        server_name = %identity.name,
        server_type = %identity.kind,
        "Connected to the orchestrator"
    );

    let state = ServerState::shared(config.lifecycle.session_history);
    state.write().await.assign_identity(identity.clone());

    let registry = Registry::new();
    let metrics = Arc::new(Metrics::register_into(&registry, &identity)?);
    let (notifier, waiter) = ready_signal();
    let engine = Arc::new(LifecycleEngine::new(
        state.clone(),
        sdk.clone(),
        metrics.clone(),
        Arc::new(RateLimiter::new(&config.rate_limits)),
        notifier,
        cancel.clone(),
        config.lifecycle.clone(),
    ));

    // Health pings and the export pass run for the whole process lifetime,
    // including while the server is still loading.
    let mut tasks: Vec<JoinHandle<()>> = vec![
        spawn_shutdown_on_signal(signalled.clone(), engine.clone()),
        spawn_health(config.health.clone(), engine.clone()),
        tokio::spawn(
            MetricsExporter::new(engine.clone(), config.telemetry.export_interval).run(),
        ),
    ];

    let prepared = until_stopped(&signalled, &cancel, async {
        setup_game_server(sdk.as_ref(), &config).await?;
        let (_, metrics_server) = telemetry::serve(
            "metrics",
            config.telemetry.metrics_port,
            telemetry::metrics_router(registry),
            cancel.clone(),
        )
        .await?;
        tasks.push(metrics_server);
        let (_, health_server) = telemetry::serve(
            "health",
            config.health.port,
            telemetry::health_router(state.clone(), config.health.max_ping_age),
            cancel.clone(),
        )
        .await?;
        tasks.push(health_server);
        Ok::<(), StartupError>(())
    })
    .await;
    if let Err(e) = prepared {
        return Err(abort_startup(&engine, tasks, &config, e).await);
    }

    let (tx, rx) = mpsc::channel(config.supervisor.event_queue_capacity);
    let supervisor = Supervisor::new(config.supervisor.clone())
        .with_sink(Arc::new(ForwardSink))
        .with_sink(Arc::new(EventDispatchSink::new(
            tx,
            config.supervisor.dispatch_timeout,
        )));
    let process = match supervisor.spawn() {
        Ok(process) => process,
        Err(e) => return Err(abort_startup(&engine, tasks, &config, e.into()).await),
    };
    tasks.push(tokio::spawn(engine.clone().run(rx)));

    let mut process_task: JoinHandle<(ExitOutcome, bool)> = {
        let engine = engine.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let outcome = process.wait(&cancel).await;
            let unexpected = engine.on_process_exit(&outcome).await;
            (outcome, unexpected)
        })
    };

    let ready_timeout = config.lifecycle.ready_timeout;
    let startup = tokio::select! {
        biased;
        joined = &mut process_task => Err(early_exit(joined)),
        res = waiter.wait() => res.map_err(|_| StartupError::Cancelled),
        _ = cancel.cancelled() => {
            // An early exit cancels through the engine before its task
            // finishes; report the exit rather than the cancellation.
            match tokio::time::timeout(config.lifecycle.shutdown_timeout, &mut process_task).await {
                Ok(joined) => Err(early_exit(joined)),
                Err(_) => Err(StartupError::Cancelled),
            }
        }
        _ = tokio::time::sleep(ready_timeout) => Err(StartupError::ReadyTimeout(ready_timeout)),
    };
    let startup = match startup {
        Ok(()) => mark_ready(sdk.as_ref()).await,
        Err(e) => Err(e),
    };
    if let Err(e) = startup {
        if !process_task.is_finished() {
            tasks.push(tokio::spawn(async move {
                let _ = process_task.await;
            }));
        }
        return Err(abort_startup(&engine, tasks, &config, e).await);
    }
    tracing::info!("Game server is ready");

    tasks.push(spawn_reservation(engine.clone()));
    tasks.push(tokio::spawn(
        PerfMonitor::new(
            state.clone(),
            metrics.clone(),
            config.telemetry.perf_interval,
            config.telemetry.perf_queue_capacity,
        )
        .run(cancel.clone()),
    ));
    match ProcessSampler::current() {
        Ok(sampler) => tasks.push(tokio::spawn(
            ResourceMonitor::new(sampler, metrics.clone(), config.telemetry.resource_workers)
                .run(config.telemetry.resource_interval, cancel.clone()),
        )),
        Err(e) => tracing::warn!("Process accounting unavailable: {}", e),
    }

    let result = match process_task.await {
        Ok((outcome, true)) => Err(StartupError::ProcessExited {
            status: outcome.to_string(),
        }),
        Ok((outcome, false)) => {
            tracing::info!(status = %outcome, "Game server stopped");
            Ok(())
        }
        Err(e) => Err(StartupError::ProcessExited {
            status: format!("supervisor task failed: {e}"),
        }),
    };

    // The child is gone; make sure every loop sees cancellation.
    cancel.cancel();
    teardown(tasks, config.lifecycle.shutdown_timeout).await;
    result
}

/// Run a startup step unless a termination signal or cancellation comes first.
async fn until_stopped<T>(
    signalled: &CancellationToken,
    cancel: &CancellationToken,
    step: impl Future<Output = Result<T, StartupError>>,
) -> Result<T, StartupError> {
    tokio::select! {
        biased;
        _ = signalled.cancelled() => Err(StartupError::Cancelled),
        _ = cancel.cancelled() => Err(StartupError::Cancelled),
        res = step => res,
    }
}

/// Shut the engine down after a failed startup step and stop every task.
async fn abort_startup(
    engine: &LifecycleEngine,
    tasks: Vec<JoinHandle<()>>,
    config: &Config,
    error: StartupError,
) -> StartupError {
    tracing::error!("Startup failed: {}", error);
    engine
        .shutdown(ShutdownReason::StartupFailed {
            reason: error.to_string(),
        })
        .await;
    teardown(tasks, config.lifecycle.shutdown_timeout).await;
    error
}

fn identity_from(info: &GameServerInfo, config: &Config) -> ServerIdentity {
    let default_kind = config
        .orchestrator
        .labels
        .iter()
        .find(|(k, _)| k == "type")
        .map(|(_, v)| v.as_str())
        .unwrap_or("racing");
    ServerIdentity {
        id: info.name.clone(),
        name: info.label("name").unwrap_or(info.name.as_str()).to_string(),
        kind: info.label("type").unwrap_or(default_kind).to_string(),
    }
}

/// Apply the identification labels and initial annotations.
async fn setup_game_server(sdk: &dyn Orchestrator, config: &Config) -> Result<(), StartupError> {
    for (key, value) in &config.orchestrator.labels {
        sdk.set_label(key, value)
            .await
            .map_err(StartupError::Setup)?;
    }
    let restarted = chrono::Utc::now().to_rfc3339();
    let annotations = [
        ("players", "0"),
        ("ready", "false"),
        ("session_type", "practice"),
        ("last_restart", restarted.as_str()),
    ];
    for (key, value) in annotations {
        sdk.set_annotation(key, value)
            .await
            .map_err(StartupError::Setup)?;
    }
    Ok(())
}

async fn mark_ready(sdk: &dyn Orchestrator) -> Result<(), StartupError> {
    sdk.ready().await.map_err(StartupError::Ready)?;
    if let Err(e) = sdk.set_annotation("ready", "true").await {
        tracing::warn!("Failed to update ready annotation: {}", e);
    }
    Ok(())
}

/// Classify a process that ended before the server became ready. Only an
/// unexpected exit is reported as such; anything we caused is a cancellation.
fn early_exit(joined: Result<(ExitOutcome, bool), tokio::task::JoinError>) -> StartupError {
    match joined {
        Ok((outcome, true)) => StartupError::ProcessExited {
            status: outcome.to_string(),
        },
        Ok((_, false)) => StartupError::Cancelled,
        Err(e) => StartupError::ProcessExited {
            status: format!("supervisor task failed: {e}"),
        },
    }
}

/// Flag `signalled` when a termination signal arrives. Installed before
/// anything else so a signal during connect or setup is never lost.
fn spawn_signal_watch(signalled: CancellationToken, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            received = wait_for_termination() => match received {
                Ok(signal) => {
                    tracing::info!(signal, "Received termination signal");
                    signalled.cancel();
                }
                Err(e) => tracing::warn!("Could not install signal handlers: {}", e),
            },
        }
    })
}

fn spawn_shutdown_on_signal(
    signalled: CancellationToken,
    engine: Arc<LifecycleEngine>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let cancel = engine.cancel_token().clone();
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = signalled.cancelled() => {
                engine.shutdown(ShutdownReason::Signal).await;
            }
        }
    })
}

/// Wait for every task up to `limit`, then abort whatever is left.
async fn teardown(mut tasks: Vec<JoinHandle<()>>, limit: Duration) {
    let joined = tokio::time::timeout(
        limit,
        futures::future::join_all(tasks.iter_mut()),
    )
    .await;
    if joined.is_err() {
        let pending = tasks.iter().filter(|t| !t.is_finished()).count();
        tracing::warn!(pending, "Shutdown timed out, abandoning remaining tasks");
        for task in &tasks {
            task.abort();
        }
    } else {
        tracing::debug!("All tasks stopped");
    }
}
