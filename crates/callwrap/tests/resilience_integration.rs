//! Integration tests for resilience module
//!
//! Tests circuit breaker, retry and rate limiting with various failure
//! scenarios, driven by a mock clock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use callwrap::{
    CallError, CallSignature, CircuitBreaker, CircuitBreakerConfig, CircuitState, Classifier,
    ErrorKind, MockClock, Pipeline, RateLimitConfig, RateLimiter, Retrier, RetryConfig,
};
use tokio::sync::oneshot;

/// Custom error type for testing
#[derive(Debug, Clone)]
struct TestError {
    message: String,
    retryable: bool,
}

impl TestError {
    fn transient(message: &str) -> Self {
        Self { message: message.to_string(), retryable: true }
    }

    fn fatal(message: &str) -> Self {
        Self { message: message.to_string(), retryable: false }
    }
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TestError {}

type TestBreaker = CircuitBreaker<TestError, MockClock>;

fn breaker(threshold: u32, recovery_secs: u64, clock: &MockClock) -> TestBreaker {
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(threshold)
        .recovery_timeout(Duration::from_secs(recovery_secs))
        .build()
        .expect("valid breaker config");
    CircuitBreaker::with_clock(config, clock.clone()).expect("valid breaker")
}

/// Validates the full circuit breaker lifecycle.
///
/// # Test Steps
/// 1. Fail `threshold` times: circuit opens
/// 2. Calls during recovery are rejected without running the function, with
///    the remaining recovery time as hint
/// 3. After the recovery timeout one trial call runs; its success closes the
///    circuit and resets the failure count
#[test]
fn test_circuit_breaker_lifecycle() {
    let clock = MockClock::new();
    let breaker = breaker(3, 10, &clock);
    let runs = AtomicU32::new(0);

    for _ in 0..3 {
        let result = breaker.call(|| {
            runs.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(TestError::transient("down"))
        });
        assert!(matches!(result, Err(CallError::Operation(_))));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    clock.advance(Duration::from_secs(4));
    let rejected = breaker.call(|| {
        runs.fetch_add(1, Ordering::SeqCst);
        Ok::<_, TestError>(())
    });
    match rejected {
        Err(CallError::CircuitOpen { retry_after }) => {
            assert_eq!(retry_after, Duration::from_secs(6));
        }
        other => panic!("expected open circuit, got {other:?}"),
    }
    assert_eq!(runs.load(Ordering::SeqCst), 3);

    clock.advance(Duration::from_secs(6));
    let trial = breaker.call(|| {
        runs.fetch_add(1, Ordering::SeqCst);
        Ok::<_, TestError>("recovered")
    });
    assert_eq!(trial.expect("trial call succeeds"), "recovered");
    assert_eq!(breaker.state(), CircuitState::Closed);

    let metrics = breaker.metrics();
    assert_eq!(metrics.failure_count, 0);
    assert_eq!(metrics.rejected_calls, 1);
    assert_eq!(metrics.total_calls, 4);
}

/// Validates that a failed trial call reopens the circuit for a fresh
/// recovery period.
#[test]
fn test_failed_trial_reopens_circuit() {
    let clock = MockClock::new();
    let breaker = breaker(1, 5, &clock);

    let _ = breaker.call(|| Err::<(), _>(TestError::transient("down")));
    clock.advance(Duration::from_secs(5));
    let _ = breaker.call(|| Err::<(), _>(TestError::transient("still down")));
    assert_eq!(breaker.state(), CircuitState::Open);

    clock.advance(Duration::from_secs(2));
    match breaker.call(|| Ok::<_, TestError>(())) {
        Err(CallError::CircuitOpen { retry_after }) => {
            assert_eq!(retry_after, Duration::from_secs(3));
        }
        other => panic!("expected open circuit, got {other:?}"),
    }
}

/// Validates the single-trial rule on the async path.
///
/// # Test Steps
/// 1. Open the circuit and wait out the recovery timeout
/// 2. Start a trial call that parks until released
/// 3. A concurrent call is rejected with a zero retry hint
/// 4. Release the trial: the circuit closes
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_half_open_admits_single_trial() {
    let clock = MockClock::new();
    let breaker = breaker(1, 5, &clock);
    let _ = breaker.execute(|| async { Err::<(), _>(TestError::transient("down")) }).await;
    clock.advance(Duration::from_secs(5));

    let (started_tx, started_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let trial_breaker = breaker.clone();
    let trial = tokio::spawn(async move {
        trial_breaker
            .execute(|| async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
                Ok::<_, TestError>("trial")
            })
            .await
    });

    started_rx.await.expect("trial started");
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    match breaker.execute(|| async { Ok::<_, TestError>("second") }).await {
        Err(CallError::CircuitOpen { retry_after }) => assert_eq!(retry_after, Duration::ZERO),
        other => panic!("expected rejection while trial in flight, got {other:?}"),
    }

    release_tx.send(()).expect("trial still waiting");
    assert_eq!(trial.await.expect("task completes").expect("trial succeeds"), "trial");
    assert_eq!(breaker.state(), CircuitState::Closed);
}

/// Validates failures outside the breaker's classification pass through
/// without counting.
#[test]
fn test_breaker_ignores_unclassified_errors() {
    let clock = MockClock::new();
    let breaker = breaker(1, 60, &clock)
        .with_classifier(Classifier::operation(|error: &TestError| error.retryable));

    let result = breaker.call(|| Err::<(), _>(TestError::fatal("bad request")));

    assert!(matches!(result, Err(CallError::Operation(ref e)) if !e.retryable));
    assert_eq!(breaker.state(), CircuitState::Closed);
}

/// Validates retry mechanism with exponential backoff.
///
/// # Test Steps
/// 1. Configure 4 attempts, 1s delay, backoff 2
/// 2. Always fail
/// 3. Verify sleeps of 1s, 2s, 4s and a `RetryExhausted` wrapping the last
///    failure
#[test]
fn test_retry_exhausts_with_exponential_backoff() {
    let clock = MockClock::new();
    let config = RetryConfig::builder()
        .max_attempts(4)
        .delay(Duration::from_secs(1))
        .backoff(2.0)
        .build()
        .expect("valid retry config");
    let retrier = Retrier::with_clock(config, clock.clone()).expect("valid retrier");
    let mut attempt = 0;

    let result: Result<(), _> = retrier.call(|| {
        attempt += 1;
        Err(TestError::transient(&format!("failure {attempt}")))
    });

    match result {
        Err(CallError::RetryExhausted { attempts, source }) => {
            assert_eq!(attempts, 4);
            assert_eq!(source.to_string(), "Operation failed: failure 4");
        }
        other => panic!("expected exhausted retries, got {other:?}"),
    }
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)]
    );
}

/// Validates retry only intercepts classified failures.
#[tokio::test]
async fn test_retry_propagates_non_retryable_error() {
    let clock = MockClock::new();
    let retrier = Retrier::with_clock(RetryConfig::default(), clock.clone())
        .expect("valid retrier")
        .with_classifier(Classifier::operation(|error: &TestError| error.retryable));
    let attempts = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&attempts);
    let result: Result<(), _> = retrier
        .execute(|| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(TestError::transient("blip"))
                } else {
                    Err(TestError::fatal("invalid credentials"))
                }
            }
        })
        .await;

    let error = result.expect_err("fatal error propagates");
    assert_eq!(error.kind(), ErrorKind::Operation);
    assert!(!error.operation().expect("operation error").retryable);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(1)]);
}

/// Validates the sliding window through a pipeline.
///
/// # Test Steps
/// 1. Allow 3 calls per 10s
/// 2. Call at t=0, 2, 4: admitted; call at t=5 rejected with a 5s hint
/// 3. At t=10 the first call has left the window
#[test]
fn test_rate_limiter_sliding_window() {
    let clock = MockClock::new();
    let config = RateLimitConfig::builder()
        .max_calls(3)
        .period(Duration::from_secs(10))
        .build()
        .expect("valid rate limit config");
    let ping = Pipeline::<(), TestError>::builder("ping")
        .layer(RateLimiter::with_clock(config, clock.clone()).expect("valid limiter"))
        .wrap(|_| Ok(()));

    for at in [0, 2, 4] {
        clock.set_elapsed(Duration::from_secs(at));
        assert!(ping.invoke(CallSignature::new()).is_ok());
    }

    clock.set_elapsed(Duration::from_secs(5));
    match ping.invoke(CallSignature::new()) {
        Err(CallError::RateLimitExceeded { max_calls, period, retry_after }) => {
            assert_eq!(max_calls, 3);
            assert_eq!(period, Duration::from_secs(10));
            assert_eq!(retry_after, Duration::from_secs(5));
        }
        other => panic!("expected rate limit rejection, got {other:?}"),
    }

    clock.set_elapsed(Duration::from_secs(10));
    assert!(ping.invoke(CallSignature::new()).is_ok());
}
