//! Composable call-wrapping middleware.
//!
//! Each component wraps a function and adds one cross-cutting behavior:
//! timing, call logging, TTL caching, sliding-window rate limiting, retry
//! with exponential backoff, circuit breaking, or argument validation.
//! Components are stacked explicitly with a [`PipelineBuilder`] around a
//! blocking or async function.
//!
//! # Layout
//!
//! - [`call`]: the arguments of one invocation
//! - [`error`]: `CallError`, error kinds and classifiers
//! - [`compose`]: the `Middleware` trait and pipelines
//! - [`resilience`]: rate limiter, retrier, circuit breaker, clocks
//! - [`cache`]: TTL cache of successful results
//! - [`validation`]: per-parameter predicates
//! - [`observability`]: timer, call logger, record sinks
//! - [`config`]: file and environment configuration

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod cache;
pub mod call;
pub mod compose;
pub mod config;
pub mod error;
pub mod observability;
pub mod resilience;
pub mod utils;
pub mod validation;

// Re-export commonly used types and traits for convenience
// ------------------------
pub use cache::{CacheConfig, CacheKey, CacheStats, TtlCache};
pub use call::CallSignature;
pub use compose::{
    AsyncDecorated, AsyncNext, Decorated, Middleware, Next, Pipeline, PipelineBuilder,
};
pub use config::ResilienceConfig;
pub use error::{
    CallError, CallResult, Classifier, ConfigError, ConfigResult, ErrorClassification, ErrorKind,
    ErrorSeverity, OperationError,
};
pub use observability::{CallLogger, MemorySink, Record, RecordSink, Timer, TracingSink};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState, Clock, MockClock,
    RateLimitConfig, RateLimitRejection, RateLimiter, Retrier, RetryConfig, SystemClock,
};
pub use validation::{InputValidator, Predicate, ValidationError};
