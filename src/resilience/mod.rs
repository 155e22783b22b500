//! Failure isolation around SDK calls and periodic local work.

pub mod circuit_breaker;
pub mod rate_limiter;

pub use circuit_breaker::CircuitBreaker;
pub use rate_limiter::{OpClass, RateLimitError, RateLimitResult, RateLimiter};
