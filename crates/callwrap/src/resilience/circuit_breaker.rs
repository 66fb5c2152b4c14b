//! Circuit breaker
//!
//! Tracks consecutive classified failures of one wrapped function and, once
//! `failure_threshold` is reached, rejects calls without invoking the function
//! until `recovery_timeout` has elapsed. After that a single trial call is let
//! through: success closes the circuit, a classified failure reopens it.
//!
//! All state transitions happen under one lock, so concurrent callers can
//! never run more than one half-open trial at a time. A caller arriving while
//! the trial is in flight is rejected immediately.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::clock::{Clock, SystemClock};
use crate::call::CallSignature;
use crate::compose::{AsyncNext, Middleware, Next};
use crate::error::{
    CallError, CallResult, Classifier, ConfigError, ConfigResult, ErrorKind, OperationError,
};
use crate::utils::duration_secs;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, allowing one trial request to test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive classified failures before opening the circuit
    pub failure_threshold: u32,
    /// Time to wait before transitioning from open to half-open
    #[serde(with = "duration_secs")]
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, recovery_timeout: Duration::from_secs(60) }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }

        if self.recovery_timeout.is_zero() {
            return Err(ConfigError::invalid("recovery_timeout must be greater than zero"));
        }

        Ok(())
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Circuit breaker metrics for monitoring
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u32,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub opened_at: Option<Instant>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    total_calls: u64,
    rejected_calls: u64,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            trial_in_flight: false,
            total_calls: 0,
            rejected_calls: 0,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.opened_at = None;
    }
}

/// Circuit breaker guarding one wrapped function
///
/// Generic over the wrapped function's error type so the failure classifier
/// can inspect it. Clones share state; build a new breaker for independent
/// state.
///
/// # Examples
///
/// ```
/// use std::io;
/// use std::time::Duration;
///
/// use callwrap::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
///
/// let config = CircuitBreakerConfig::builder()
///     .failure_threshold(2)
///     .recovery_timeout(Duration::from_secs(30))
///     .build()?;
/// let breaker = CircuitBreaker::<io::Error>::new(config)?;
///
/// for _ in 0..2 {
///     let _ = breaker.call(|| Err::<(), _>(io::Error::other("down")));
/// }
/// assert_eq!(breaker.state(), CircuitState::Open);
/// # Ok::<(), callwrap::ConfigError>(())
/// ```
pub struct CircuitBreaker<E: OperationError, C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    classifier: Classifier<E>,
    inner: Arc<Mutex<BreakerState>>,
    clock: Arc<C>,
}

impl<E: OperationError, C: Clock> fmt::Debug for CircuitBreaker<E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("classifier", &self.classifier)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .finish()
    }
}

impl<E: OperationError, C: Clock> Clone for CircuitBreaker<E, C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            classifier: self.classifier.clone(),
            inner: Arc::clone(&self.inner),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<E: OperationError> CircuitBreaker<E, SystemClock> {
    /// Create a new circuit breaker using the system clock
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<E: OperationError, C: Clock> CircuitBreaker<E, C> {
    /// Create a new circuit breaker with a custom clock (useful for testing)
    ///
    /// By default only the wrapped function's own errors count. Rejections
    /// and validation failures from inner layers pass through; see
    /// [`CircuitBreaker::with_classifier`] to change that.
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            classifier: Classifier::kinds([ErrorKind::Operation]),
            inner: Arc::new(Mutex::new(BreakerState::new())),
            clock: Arc::new(clock),
        })
    }

    /// Only failures selected by `classifier` count towards opening
    ///
    /// Other failures pass through without touching the failure count or
    /// the state.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Classifier<E>) -> Self {
        self.classifier = classifier;
        self
    }

    /// The configuration in effect
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask for admission of one call
    ///
    /// Performs the OPEN to HALF_OPEN transition when the recovery timeout
    /// has elapsed. On rejection returns how long the caller should wait.
    fn acquire(&self) -> Result<Permit<'_, E, C>, Duration> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed < self.config.recovery_timeout {
                    inner.rejected_calls += 1;
                    return Err(self.config.recovery_timeout - elapsed);
                }
                inner.state = CircuitState::HalfOpen;
                info!(elapsed = ?elapsed, "Circuit breaker half-open, admitting trial call");
                inner.trial_in_flight = true;
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    inner.rejected_calls += 1;
                    return Err(Duration::ZERO);
                }
                inner.trial_in_flight = true;
                true
            }
        };

        inner.total_calls += 1;
        Ok(Permit { breaker: self, trial, settled: false })
    }

    fn reject<T>(&self, retry_after: Duration) -> CallResult<T, E> {
        warn!(retry_after = ?retry_after, state = %self.state(), "Circuit breaker rejecting call");
        Err(CallError::CircuitOpen { retry_after })
    }

    fn record_success(&self, trial: bool) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen if trial => {
                inner.close();
                info!("Circuit breaker closed after successful trial call");
            }
            // A call admitted before the circuit opened cannot close it
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
        if trial {
            inner.trial_in_flight = false;
        }
    }

    fn record_failure(&self, trial: bool) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.open(now);
                    warn!(failures = inner.failure_count, "Circuit breaker opened");
                }
            }
            CircuitState::HalfOpen if trial => {
                inner.open(now);
                warn!("Circuit breaker reopened after failed trial call");
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
        if trial {
            inner.trial_in_flight = false;
        }
    }

    /// Execute a synchronous operation with circuit breaker protection
    #[instrument(skip(self, operation), fields(state = %self.state()))]
    pub fn call<F, T>(&self, operation: F) -> CallResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.guard(|| operation().map_err(CallError::Operation))
    }

    /// Execute an async operation with circuit breaker protection
    #[instrument(skip(self, operation), fields(state = %self.state()))]
    pub async fn execute<F, Fut, T>(&self, operation: F) -> CallResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.guard_async(async move { operation().await.map_err(CallError::Operation) }).await
    }

    fn guard<T>(&self, operation: impl FnOnce() -> CallResult<T, E>) -> CallResult<T, E> {
        let permit = match self.acquire() {
            Ok(permit) => permit,
            Err(retry_after) => return self.reject(retry_after),
        };
        let result = operation();
        permit.settle(&result);
        result
    }

    async fn guard_async<T>(
        &self,
        operation: impl Future<Output = CallResult<T, E>>,
    ) -> CallResult<T, E> {
        let permit = match self.acquire() {
            Ok(permit) => permit,
            Err(retry_after) => return self.reject(retry_after),
        };
        let result = operation.await;
        permit.settle(&result);
        result
    }

    /// Get the current circuit state
    ///
    /// Does not perform the time-based OPEN to HALF_OPEN transition; that
    /// happens on the next admitted call.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        CircuitBreakerMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            total_calls: inner.total_calls,
            rejected_calls: inner.rejected_calls,
            opened_at: inner.opened_at,
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.close();
        inner.trial_in_flight = false;
        info!("Circuit breaker manually reset to closed state");
    }
}

/// Admission of one call, settled with its result
///
/// Dropping an unsettled trial permit (a cancelled future or a panicking
/// function) frees the half-open slot without a state change.
struct Permit<'a, E: OperationError, C: Clock> {
    breaker: &'a CircuitBreaker<E, C>,
    trial: bool,
    settled: bool,
}

impl<E: OperationError, C: Clock> Permit<'_, E, C> {
    fn settle<T>(mut self, result: &CallResult<T, E>) {
        self.settled = true;
        match result {
            Ok(_) => {
                debug!("Circuit breaker: operation succeeded");
                self.breaker.record_success(self.trial);
            }
            Err(error) if self.breaker.classifier.matches(error) => {
                debug!(error = %error, "Circuit breaker: counted failure");
                self.breaker.record_failure(self.trial);
            }
            Err(error) => {
                debug!(error = %error, "Circuit breaker: failure not classified, passing through");
                self.release();
            }
        }
    }

    fn release(&self) {
        if self.trial {
            self.breaker.inner.lock().trial_in_flight = false;
        }
    }
}

impl<E: OperationError, C: Clock> Drop for Permit<'_, E, C> {
    fn drop(&mut self) {
        if !self.settled {
            self.release();
        }
    }
}

#[async_trait]
impl<R, E, C> Middleware<R, E> for CircuitBreaker<E, C>
where
    R: Send + 'static,
    E: OperationError,
    C: Clock,
{
    fn name(&self) -> &'static str {
        "circuit_breaker"
    }

    fn around(&self, call: &CallSignature, next: Next<'_, R, E>) -> CallResult<R, E> {
        self.guard(|| next.run(call))
    }

    async fn around_async(
        &self,
        call: &CallSignature,
        next: AsyncNext<'_, R, E>,
    ) -> CallResult<R, E> {
        self.guard_async(next.run(call)).await
    }
}
