//! Resilience patterns guarding a wrapped function
//!
//! This module provides the stateful, time-dependent components:
//! - **Circuit Breaker**: stops calling a function that keeps failing and
//!   probes it again with a single trial call after a recovery timeout
//! - **Rate Limiter**: sliding-window admission of at most `max_calls` per
//!   `period`
//! - **Retrier**: retries classified failures with exponential backoff
//!
//! Each component owns its state, reads time through a [`Clock`] and can be
//! used standalone (`call` for blocking operations, `execute` for async ones)
//! or stacked in a [`crate::Pipeline`] as [`crate::Middleware`].
//!
//! ## Testing with `MockClock`
//!
//! ```
//! use std::io;
//! use std::time::Duration;
//!
//! use callwrap::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, MockClock};
//!
//! let clock = MockClock::new();
//! let config =
//!     CircuitBreakerConfig { failure_threshold: 1, recovery_timeout: Duration::from_secs(5) };
//! let breaker = CircuitBreaker::<io::Error, _>::with_clock(config, clock.clone())?;
//!
//! let _ = breaker.call(|| Err::<(), _>(io::Error::other("down")));
//! assert_eq!(breaker.state(), CircuitState::Open);
//!
//! clock.advance(Duration::from_secs(5));
//! assert!(breaker.call(|| Ok::<_, io::Error>(())).is_ok());
//! assert_eq!(breaker.state(), CircuitState::Closed);
//! # Ok::<(), callwrap::ConfigError>(())
//! ```

pub mod circuit_breaker;
pub mod clock;
pub mod rate_limiter;
pub mod retry;

// Re-export circuit breaker types
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitState,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use rate_limiter::{RateLimitConfig, RateLimitConfigBuilder, RateLimitRejection, RateLimiter};
// Re-export retry types
pub use retry::{Retrier, RetryConfig, RetryConfigBuilder};
