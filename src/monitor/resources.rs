//! CPU and resident memory of the sidecar process.
//!
//! Samples run on the blocking pool behind a small semaphore; when every
//! permit is taken the tick is skipped rather than queued.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use sysinfo::{Pid, System};
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::metrics::Metrics;

/// One process accounting reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub cpu_percent: f32,
    pub memory_bytes: u64,
}

/// Reads process accounting for a single pid.
///
/// CPU usage is computed between consecutive refreshes, so the first reading
/// after construction is 0.
pub struct ProcessSampler {
    pid: Pid,
    system: Mutex<System>,
}

impl ProcessSampler {
    pub fn current() -> Result<Self, String> {
        let pid = sysinfo::get_current_pid().map_err(|e| e.to_string())?;
        Ok(Self::for_pid(pid))
    }

    pub fn for_pid(pid: Pid) -> Self {
        Self {
            pid,
            system: Mutex::new(System::new()),
        }
    }

    pub fn sample(&self) -> Option<ResourceSample> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        if !system.refresh_process(self.pid) {
            return None;
        }
        system.process(self.pid).map(|p| ResourceSample {
            cpu_percent: p.cpu_usage(),
            memory_bytes: p.memory(),
        })
    }
}

/// Outcome of a scheduling attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Dispatch {
    Started,
    /// Every worker was busy.
    Skipped,
}

pub struct ResourceMonitor {
    sampler: Arc<ProcessSampler>,
    metrics: Arc<Metrics>,
    workers: Arc<Semaphore>,
}

impl ResourceMonitor {
    pub fn new(sampler: ProcessSampler, metrics: Arc<Metrics>, workers: usize) -> Self {
        Self {
            sampler: Arc::new(sampler),
            metrics,
            workers: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Start a sample on the blocking pool if a worker is free.
    pub fn dispatch(&self) -> Dispatch {
        let Ok(permit) = self.workers.clone().try_acquire_owned() else {
            tracing::debug!("Skipping resource sample, workers busy");
            return Dispatch::Skipped;
        };
        let sampler = self.sampler.clone();
        let metrics = self.metrics.clone();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            match sampler.sample() {
                Some(sample) => {
                    metrics.cpu_usage_percent.set(f64::from(sample.cpu_percent));
                    metrics.memory_usage_bytes.set(sample.memory_bytes as f64);
                }
                None => tracing::debug!("Process accounting unavailable"),
            }
        });
        Dispatch::Started
    }

    pub async fn run(self, interval: Duration, cancel: CancellationToken) {
        tracing::info!("Starting resource monitor with interval {:?}", interval);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.dispatch();
                }
            }
        }
        tracing::debug!("Resource monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use prometheus::Registry;

    use super::*;
    use crate::state::ServerIdentity;

    fn metrics() -> Arc<Metrics> {
        Arc::new(Metrics::register_into(&Registry::new(), &ServerIdentity::default()).unwrap())
    }

    #[test]
    fn test_sample_current_process() {
        let sampler = ProcessSampler::current().unwrap();
        let sample = sampler.sample().unwrap();
        assert!(sample.memory_bytes > 0);
        assert!(sample.cpu_percent >= 0.0);
    }

    #[tokio::test]
    async fn test_dispatch_skips_when_saturated() {
        let monitor = ResourceMonitor::new(ProcessSampler::current().unwrap(), metrics(), 1);
        let _held = monitor.workers.clone().try_acquire_owned().unwrap();
        assert_eq!(monitor.dispatch(), Dispatch::Skipped);
    }

    #[tokio::test]
    async fn test_dispatch_publishes_gauges() {
        let metrics = metrics();
        let monitor = ResourceMonitor::new(ProcessSampler::current().unwrap(), metrics.clone(), 2);
        assert_eq!(monitor.dispatch(), Dispatch::Started);

        let _ = tokio::time::timeout(Duration::from_secs(5), async {
            while metrics.memory_usage_bytes.get() == 0.0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(metrics.memory_usage_bytes.get() > 0.0);
    }
}
