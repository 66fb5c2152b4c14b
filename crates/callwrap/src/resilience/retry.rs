//! Retry with exponential backoff
//!
//! The first attempt invokes the operation directly. A failure selected by the
//! retrier's classifier is retried after `delay`, then `delay * backoff`,
//! `delay * backoff^2` and so on (optionally capped by `max_delay`) until
//! `max_attempts` attempts have been made. Any other failure propagates
//! immediately and unchanged.
//!
//! The blocking path sleeps the calling thread; the async path suspends only
//! the calling task, so unrelated concurrent calls keep running.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use super::clock::{Clock, SystemClock};
use crate::call::CallSignature;
use crate::compose::{AsyncNext, Middleware, Next};
use crate::error::{
    CallError, CallResult, Classifier, ConfigError, ConfigResult, ErrorKind, OperationError,
};
use crate::utils::{duration_secs, option_duration_secs};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(with = "duration_secs")]
    pub delay: Duration,
    /// Multiplier applied to the delay after each retry
    pub backoff: f64,
    /// Upper bound for any single delay
    #[serde(
        default,
        with = "option_duration_secs",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_delay: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, delay: Duration::from_secs(1), backoff: 2.0, max_delay: None }
    }
}

impl RetryConfig {
    /// Create a new retry configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Validate the retry configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts must be at least 1"));
        }
        if !self.backoff.is_finite() || self.backoff < 1.0 {
            return Err(ConfigError::invalid("backoff must be a finite number >= 1"));
        }
        Ok(())
    }

    /// Delay to wait after the given failed attempt (0-based retry index)
    ///
    /// Saturates instead of overflowing for large indices.
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let factor = self.backoff.powi(i32::try_from(retry).unwrap_or(i32::MAX));
        let nanos = self.delay.as_nanos() as f64 * factor;
        let delay = if nanos.is_finite() && nanos < u64::MAX as f64 {
            Duration::from_nanos(nanos.round() as u64)
        } else {
            Duration::MAX
        };
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

/// Builder for RetryConfig
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.config.delay = delay;
        self
    }

    pub fn backoff(mut self, multiplier: f64) -> Self {
        self.config.backoff = multiplier;
        self
    }

    pub fn max_delay(mut self, cap: Duration) -> Self {
        self.config.max_delay = Some(cap);
        self
    }

    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Retries classified failures with exponential backoff
///
/// # Examples
///
/// ```
/// use std::io;
/// use std::time::Duration;
///
/// use callwrap::resilience::{MockClock, RetryConfig, Retrier};
///
/// let clock = MockClock::new();
/// let config = RetryConfig::builder().max_attempts(3).delay(Duration::from_millis(100)).build()?;
/// let retrier = Retrier::<io::Error, _>::with_clock(config, clock.clone())?;
///
/// let mut failures = 2;
/// let value = retrier.call(|| {
///     if failures > 0 {
///         failures -= 1;
///         return Err(io::Error::other("flaky"));
///     }
///     Ok(42)
/// });
///
/// assert_eq!(value.ok(), Some(42));
/// assert_eq!(clock.sleeps(), vec![Duration::from_millis(100), Duration::from_millis(200)]);
/// # Ok::<(), callwrap::ConfigError>(())
/// ```
pub struct Retrier<E: OperationError, C: Clock = SystemClock> {
    config: RetryConfig,
    classifier: Classifier<E>,
    clock: Arc<C>,
}

impl<E: OperationError, C: Clock> fmt::Debug for Retrier<E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retrier")
            .field("config", &self.config)
            .field("classifier", &self.classifier)
            .finish()
    }
}

impl<E: OperationError, C: Clock> Clone for Retrier<E, C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            classifier: self.classifier.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<E: OperationError> Retrier<E, SystemClock> {
    /// Create a retrier using the system clock
    pub fn new(config: RetryConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<E: OperationError, C: Clock> Retrier<E, C> {
    /// Create a retrier with a custom clock (useful for testing)
    ///
    /// By default the wrapped function's own errors and rate-limit
    /// rejections are retried. Validation failures, open circuits and
    /// exhausted inner retriers propagate at once; see
    /// [`Retrier::with_classifier`] to change that.
    pub fn with_clock(config: RetryConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { config, classifier: Self::default_classifier(), clock: Arc::new(clock) })
    }

    /// Failures retried when no classifier is given
    pub fn default_classifier() -> Classifier<E> {
        Classifier::kinds([ErrorKind::Operation, ErrorKind::RateLimited])
    }

    /// Only failures selected by `classifier` are retried
    #[must_use]
    pub fn with_classifier(mut self, classifier: Classifier<E>) -> Self {
        self.classifier = classifier;
        self
    }

    /// The configuration in effect
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Decide what follows a failed attempt: a delay before retrying, or the
    /// error to surface.
    fn on_failure(&self, attempt: u32, failure: CallError<E>) -> Result<Duration, CallError<E>> {
        if !self.classifier.matches(&failure) {
            debug!(attempt, error = %failure, "Failure is not retryable, propagating");
            return Err(failure);
        }

        if attempt >= self.config.max_attempts {
            error!(attempts = attempt, error = %failure, "All retry attempts exhausted");
            return Err(CallError::RetryExhausted { attempts: attempt, source: Box::new(failure) });
        }

        let delay = self.config.calculate_delay(attempt - 1);
        warn!(
            attempt,
            max_attempts = self.config.max_attempts,
            delay = ?delay,
            error = %failure,
            "Operation failed, retrying"
        );
        Ok(delay)
    }

    fn run_blocking<T>(&self, mut attempt: impl FnMut() -> CallResult<T, E>) -> CallResult<T, E> {
        let mut attempt_number = 1;
        loop {
            debug!(attempt = attempt_number, "Executing operation");
            match attempt() {
                Ok(value) => {
                    if attempt_number > 1 {
                        debug!(retries = attempt_number - 1, "Operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(failure) => {
                    let delay = self.on_failure(attempt_number, failure)?;
                    if !delay.is_zero() {
                        self.clock.sleep_blocking(delay);
                    }
                    attempt_number += 1;
                }
            }
        }
    }

    async fn run_async<T, F, Fut>(&self, mut attempt: F) -> CallResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CallResult<T, E>>,
    {
        let mut attempt_number = 1;
        loop {
            debug!(attempt = attempt_number, "Executing operation");
            match attempt().await {
                Ok(value) => {
                    if attempt_number > 1 {
                        debug!(retries = attempt_number - 1, "Operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(failure) => {
                    let delay = self.on_failure(attempt_number, failure)?;
                    if !delay.is_zero() {
                        self.clock.sleep(delay).await;
                    }
                    attempt_number += 1;
                }
            }
        }
    }

    /// Execute a synchronous operation with retry logic
    ///
    /// Blocks the calling thread between attempts.
    #[instrument(skip(self, operation), fields(max_attempts = self.config.max_attempts))]
    pub fn call<F, T>(&self, mut operation: F) -> CallResult<T, E>
    where
        F: FnMut() -> Result<T, E>,
    {
        self.run_blocking(|| operation().map_err(CallError::Operation))
    }

    /// Execute an async operation with retry logic
    #[instrument(skip(self, operation), fields(max_attempts = self.config.max_attempts))]
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> CallResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_async(|| {
            let attempt = operation();
            async move { attempt.await.map_err(CallError::Operation) }
        })
        .await
    }
}

#[async_trait]
impl<R, E, C> Middleware<R, E> for Retrier<E, C>
where
    R: Send + 'static,
    E: OperationError,
    C: Clock,
{
    fn name(&self) -> &'static str {
        "retrier"
    }

    fn around(&self, call: &CallSignature, next: Next<'_, R, E>) -> CallResult<R, E> {
        self.run_blocking(|| next.run(call))
    }

    async fn around_async(
        &self,
        call: &CallSignature,
        next: AsyncNext<'_, R, E>,
    ) -> CallResult<R, E> {
        self.run_async(|| next.run(call)).await
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the retrier
    //!
    //! Tests cover backoff schedules, classification, exhaustion and the
    //! async path. All sleeps go through `MockClock`.

    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::resilience::MockClock;

    type TestRetrier = Retrier<io::Error, MockClock>;

    fn retrier(attempts: u32, delay_ms: u64, backoff: f64) -> (TestRetrier, MockClock) {
        let clock = MockClock::new();
        let config = RetryConfig::builder()
            .max_attempts(attempts)
            .delay(Duration::from_millis(delay_ms))
            .backoff(backoff)
            .build()
            .expect("valid config");
        (Retrier::with_clock(config, clock.clone()).expect("valid retrier"), clock)
    }

    #[test]
    fn test_config_validation() {
        assert!(RetryConfig::default().validate().is_ok());
        assert!(RetryConfig::builder().max_attempts(0).build().is_err());
        assert!(RetryConfig::builder().backoff(0.5).build().is_err());
        assert!(RetryConfig::builder().backoff(f64::NAN).build().is_err());
    }

    #[test]
    fn test_calculate_delay() {
        let config = RetryConfig::builder()
            .delay(Duration::from_millis(100))
            .backoff(3.0)
            .max_delay(Duration::from_secs(1))
            .build()
            .expect("valid config");

        assert_eq!(config.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(config.calculate_delay(1), Duration::from_millis(300));
        assert_eq!(config.calculate_delay(2), Duration::from_millis(900));
        assert_eq!(config.calculate_delay(3), Duration::from_secs(1));
        assert_eq!(config.calculate_delay(u32::MAX), Duration::from_secs(1));
    }

    /// Validates success after `n < max_attempts` failures.
    ///
    /// Assertions:
    /// - The function runs `n + 1` times and its value is returned.
    /// - Sleeps follow `delay, delay * backoff`.
    #[test]
    fn test_succeeds_after_transient_failures() {
        let (retrier, clock) = retrier(4, 100, 2.0);
        let calls = AtomicU32::new(0);

        let result = retrier.call(|| {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(io::Error::other("flaky"))
            } else {
                Ok("done")
            }
        });

        assert_eq!(result.ok(), Some("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(100), Duration::from_millis(200)]);
    }

    #[test]
    fn test_exhaustion_wraps_last_failure() {
        let (retrier, clock) = retrier(3, 10, 2.0);
        let calls = AtomicU32::new(0);

        let err = retrier
            .call(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(io::Error::other(format!("failure {n}")))
            })
            .expect_err("always fails");

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.kind(), ErrorKind::RetryExhausted);
        match &err {
            CallError::RetryExhausted { attempts, source } => {
                assert_eq!(*attempts, 3);
                assert_eq!(source.to_string(), "Operation failed: failure 2");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.root_cause().kind(), ErrorKind::Operation);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(10), Duration::from_millis(20)]);
    }

    #[test]
    fn test_non_retryable_propagates_immediately() {
        let (retrier, clock) = retrier(5, 10, 2.0);
        let retrier = retrier.with_classifier(Classifier::operation(|e: &io::Error| {
            e.kind() == io::ErrorKind::TimedOut
        }));
        let calls = AtomicU32::new(0);

        let err = retrier
            .call(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(io::Error::from(io::ErrorKind::PermissionDenied))
            })
            .expect_err("fails");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.kind(), ErrorKind::Operation);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_single_attempt_never_sleeps() {
        let (retrier, clock) = retrier(1, 10, 2.0);

        let err = retrier.call(|| Err::<(), _>(io::Error::other("once"))).expect_err("fails");

        assert!(matches!(err, CallError::RetryExhausted { attempts: 1, .. }));
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn test_zero_delay_skips_sleep() {
        let (retrier, clock) = retrier(3, 0, 2.0);
        let calls = AtomicU32::new(0);

        let _ = retrier.call(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(io::Error::other("nope"))
        });

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_execute_async_backoff() {
        let (retrier, clock) = retrier(3, 50, 3.0);
        let calls = AtomicU32::new(0);

        let result = retrier
            .execute(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(io::Error::other("flaky"))
                } else {
                    Ok(9)
                }
            })
            .await;

        assert_eq!(result.ok(), Some(9));
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(50), Duration::from_millis(150)]);
    }
}
