//! High-frequency performance path.
//!
//! A sampler reads the tick rate every `perf_interval` and offers the sample
//! to a bounded queue; a consumer publishes it. When the consumer falls
//! behind, samples are dropped instead of piling up.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::metrics::Metrics;
use crate::state::SharedState;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerfSample {
    pub fps: f64,
    /// Time spent taking the sample, in milliseconds.
    pub tick_ms: f64,
}

pub struct PerfMonitor {
    state: SharedState,
    metrics: Arc<Metrics>,
    interval: Duration,
    capacity: usize,
}

impl PerfMonitor {
    pub fn new(
        state: SharedState,
        metrics: Arc<Metrics>,
        interval: Duration,
        capacity: usize,
    ) -> Self {
        Self {
            state,
            metrics,
            interval,
            capacity: capacity.max(1),
        }
    }

    pub async fn sample(&self) -> PerfSample {
        let start = Instant::now();
        let fps = self.state.read().await.tick_rate;
        PerfSample {
            fps,
            tick_ms: start.elapsed().as_secs_f64() * 1000.0,
        }
    }

    pub fn publish(&self, sample: PerfSample) {
        self.metrics.fps.set(sample.fps);
        self.metrics.tick_time_ms.observe(sample.tick_ms);
    }

    /// Run sampler and consumer until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let (tx, mut rx) = mpsc::channel(self.capacity);
        let this = &self;

        let sampler = async {
            let mut ticker = tokio::time::interval(this.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if !offer(&tx, this.sample().await) && tx.is_closed() {
                            break;
                        }
                    }
                }
            }
        };
        let consumer = async {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sample = rx.recv() => match sample {
                        Some(sample) => this.publish(sample),
                        None => break,
                    },
                }
            }
        };

        tokio::join!(sampler, consumer);
        tracing::debug!("Performance monitor stopped");
    }
}

/// Queue a sample without waiting. Returns `false` if it was dropped.
pub fn offer(tx: &mpsc::Sender<PerfSample>, sample: PerfSample) -> bool {
    match tx.try_send(sample) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            tracing::warn!("Performance sample queue full, dropping update");
            false
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use prometheus::Registry;

    use super::*;
    use crate::state::{ServerIdentity, ServerState};

    fn monitor() -> (PerfMonitor, Arc<Metrics>, SharedState) {
        let metrics =
            Arc::new(Metrics::register_into(&Registry::new(), &ServerIdentity::default()).unwrap());
        let state = ServerState::shared(10);
        (
            PerfMonitor::new(state.clone(), metrics.clone(), Duration::from_millis(100), 2),
            metrics,
            state,
        )
    }

    #[test]
    fn test_offer_drops_when_full() {
        let (tx, _rx) = mpsc::channel(1);
        let sample = PerfSample {
            fps: 18.0,
            tick_ms: 0.1,
        };
        assert!(offer(&tx, sample));
        assert!(!offer(&tx, sample));
    }

    #[tokio::test]
    async fn test_sample_reads_tick_rate() {
        let (monitor, _, state) = monitor();
        state.write().await.tick_rate = 33.0;
        let sample = monitor.sample().await;
        assert_eq!(sample.fps, 33.0);
        assert!(sample.tick_ms >= 0.0);
    }

    #[tokio::test]
    async fn test_publish_sets_fps_and_histogram() {
        let (monitor, metrics, _) = monitor();
        monitor.publish(PerfSample {
            fps: 60.0,
            tick_ms: 3.0,
        });
        assert_eq!(metrics.fps.get(), 60.0);
        assert_eq!(metrics.tick_time_ms.get_sample_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_publishes_until_cancelled() {
        let (monitor, metrics, state) = monitor();
        state.write().await.tick_rate = 20.0;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(350)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(metrics.fps.get(), 20.0);
        assert!(metrics.tick_time_ms.get_sample_count() >= 3);
    }
}
