//! Token bucket rate limiter keyed by operation class.
//!
//! Each [`OpClass`] owns an independent bucket that starts full and refills
//! continuously at its configured rate, up to its burst capacity. Over any
//! window `W` a bucket admits at most `ceil(rate * W) + burst` operations.
//!
//! State is in-memory only and shared through `Arc`.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{BucketConfig, RateLimitConfig};

/// Class of operation being throttled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpClass {
    /// SDK health pings.
    Health,
    /// Metrics export passes.
    Metrics,
    /// SDK commands such as annotations and labels.
    Command,
}

impl OpClass {
    fn index(self) -> usize {
        match self {
            Self::Health => 0,
            Self::Metrics => 1,
            Self::Command => 2,
        }
    }
}

impl std::fmt::Display for OpClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpClass::Health => write!(f, "health"),
            OpClass::Metrics => write!(f, "metrics"),
            OpClass::Command => write!(f, "command"),
        }
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone)]
pub enum RateLimitResult {
    /// Operation is allowed.
    Allowed {
        /// Whole tokens left in the bucket.
        remaining: u32,
    },
    /// Operation is rate limited.
    Limited {
        /// Time until the next token is available.
        retry_after: Duration,
    },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    capacity: f64,
    per_second: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(config: BucketConfig, now: Instant) -> Self {
        let capacity = f64::from(config.burst.max(1));
        Self {
            tokens: capacity,
            capacity,
            per_second: config.per_second,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.per_second).min(self.capacity);
        self.last_refill = now;
    }

    fn take(&mut self, now: Instant) -> RateLimitResult {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            RateLimitResult::Allowed {
                remaining: self.tokens.floor() as u32,
            }
        } else {
            let missing = 1.0 - self.tokens;
            RateLimitResult::Limited {
                retry_after: Duration::from_secs_f64(missing / self.per_second),
            }
        }
    }
}

/// Per-class token buckets.
pub struct RateLimiter {
    buckets: Mutex<[Bucket; 3]>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let now = Instant::now();
        Self {
            buckets: Mutex::new([
                Bucket::new(config.health, now),
                Bucket::new(config.metrics, now),
                Bucket::new(config.command, now),
            ]),
        }
    }

    fn lock(&self) -> MutexGuard<'_, [Bucket; 3]> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a token if one is available and report the outcome.
    pub fn check(&self, class: OpClass) -> RateLimitResult {
        self.lock()[class.index()].take(Instant::now())
    }

    /// Non-blocking check: `true` consumes a token.
    pub fn allow(&self, class: OpClass) -> bool {
        self.check(class).is_allowed()
    }

    /// Wait until a token is available or `cancel` fires.
    pub async fn wait(
        &self,
        class: OpClass,
        cancel: &CancellationToken,
    ) -> Result<(), RateLimitError> {
        loop {
            let retry_after = match self.check(class) {
                RateLimitResult::Allowed { .. } => return Ok(()),
                RateLimitResult::Limited { retry_after } => retry_after,
            };
            tokio::select! {
                _ = cancel.cancelled() => return Err(RateLimitError::Cancelled { class }),
                _ = tokio::time::sleep(retry_after) => {}
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(&RateLimitConfig::default())
    }
}

/// Error when a wait was abandoned.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RateLimitError {
    #[error("Rate limit wait for {class} cancelled")]
    Cancelled { class: OpClass },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(per_second: f64, burst: u32) -> RateLimitConfig {
        let bucket = BucketConfig { per_second, burst };
        RateLimitConfig {
            health: bucket,
            metrics: bucket,
            command: bucket,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_limited() {
        let limiter = RateLimiter::new(&single(1.0, 2));

        assert!(limiter.allow(OpClass::Health));
        assert!(limiter.allow(OpClass::Health));

        match limiter.check(OpClass::Health) {
            RateLimitResult::Limited { retry_after } => {
                assert!(retry_after <= Duration::from_secs(1));
            }
            _ => panic!("Expected limited"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_class_isolation() {
        let limiter = RateLimiter::new(&single(1.0, 1));
        assert!(limiter.allow(OpClass::Command));
        assert!(!limiter.allow(OpClass::Command));
        assert!(limiter.allow(OpClass::Health));
        assert!(limiter.allow(OpClass::Metrics));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_over_time() {
        let limiter = RateLimiter::new(&single(10.0, 1));
        assert!(limiter.allow(OpClass::Command));
        assert!(!limiter.allow(OpClass::Command));

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(limiter.allow(OpClass::Command));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admitted_count_bounded_by_rate_and_burst() {
        let (rate, burst) = (5.0, 3);
        let limiter = RateLimiter::new(&single(rate, burst));
        let window = Duration::from_secs(4);
        let step = Duration::from_millis(10);

        let mut admitted = 0u32;
        let mut elapsed = Duration::ZERO;
        while elapsed < window {
            for _ in 0..5 {
                if limiter.allow(OpClass::Metrics) {
                    admitted += 1;
                }
            }
            tokio::time::advance(step).await;
            elapsed += step;
        }

        let bound = (rate * window.as_secs_f64()).ceil() as u32 + burst;
        assert!(admitted <= bound, "admitted {admitted} > bound {bound}");
        assert!(admitted >= bound - 2, "admitted {admitted} unexpectedly low");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_blocks_until_token() {
        let limiter = RateLimiter::new(&single(1.0, 1));
        let cancel = CancellationToken::new();
        limiter.wait(OpClass::Health, &cancel).await.unwrap();

        let start = Instant::now();
        limiter.wait(OpClass::Health, &cancel).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(999));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_observes_cancellation() {
        let limiter = RateLimiter::new(&single(0.01, 1));
        let cancel = CancellationToken::new();
        assert!(limiter.allow(OpClass::Health));

        cancel.cancel();
        let result = limiter.wait(OpClass::Health, &cancel).await;
        assert!(matches!(
            result,
            Err(RateLimitError::Cancelled {
                class: OpClass::Health
            })
        ));
    }
}
