//! Consecutive-failure circuit breaker.
//!
//! The breaker opens once `max_failures` failures have been recorded without
//! an intervening success. While open, [`CircuitBreaker::is_open`] reports
//! `true` until `cooldown` has elapsed since the most recent failure; the next
//! check after that closes the circuit and clears the failure count.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
struct BreakerState {
    failures: u32,
    last_failure: Option<Instant>,
    open: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    max_failures: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(max_failures: u32, cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(BreakerState {
                failures: 0,
                last_failure: None,
                open: false,
            }),
            max_failures: max_failures.max(1),
            cooldown,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.failures = state.failures.saturating_add(1);
        state.last_failure = Some(Instant::now());
        if !state.open && state.failures >= self.max_failures {
            state.open = true;
            tracing::warn!(
                failures = state.failures,
                cooldown = ?self.cooldown,
                "Circuit breaker opened"
            );
        }
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        if state.open {
            tracing::info!("Circuit breaker closed after successful call");
        }
        state.failures = 0;
        state.open = false;
    }

    /// Whether calls should be rejected right now.
    pub fn is_open(&self) -> bool {
        let mut state = self.lock();
        if !state.open {
            return false;
        }
        let cooled = state
            .last_failure
            .is_none_or(|at| at.elapsed() >= self.cooldown);
        if cooled {
            state.open = false;
            state.failures = 0;
            tracing::info!("Circuit breaker cool-down elapsed, closing");
        }
        state.open
    }

    pub fn failures(&self) -> u32 {
        self.lock().failures
    }

    pub fn reset(&self) {
        let mut state = self.lock();
        state.failures = 0;
        state.last_failure = None;
        state.open = false;
    }
}
