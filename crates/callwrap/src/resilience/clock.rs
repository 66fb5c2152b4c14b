//! Time abstraction for testability
//!
//! Every time-dependent component (cache expiry, limiter window, breaker
//! recovery, retry backoff) reads the current instant and sleeps through a
//! [`Clock`]. Production code uses [`SystemClock`]; tests use [`MockClock`],
//! which never waits and records every requested sleep.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;

/// Trait for time operations to enable deterministic testing
///
/// This trait allows components to use real system time in production
/// and controlled mock time in tests, enabling deterministic testing of
/// expiry, windowing and backoff behavior without actual time delays.
pub trait Clock: Send + Sync + 'static {
    /// Get current instant (monotonic time)
    fn now(&self) -> Instant;

    /// Get current system time (wall clock)
    fn system_time(&self) -> SystemTime;

    /// Suspend the current task for `duration` without blocking the thread
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;

    /// Block the current thread for `duration`
    fn sleep_blocking(&self, duration: Duration);

    /// Get milliseconds since UNIX epoch
    fn millis_since_epoch(&self) -> u64 {
        self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
    }
}

/// Real system clock implementation for production use
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }

    fn sleep_blocking(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Implement Clock for Arc<T> where T: Clock for convenient sharing
impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        (**self).sleep(duration)
    }

    fn sleep_blocking(&self, duration: Duration) {
        (**self).sleep_blocking(duration);
    }
}

#[derive(Debug, Default)]
struct MockState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

/// Mock clock for deterministic testing
///
/// Allows tests to control time progression without actual delays. Sleeping
/// on a mock clock advances it by the requested duration immediately and
/// appends the duration to [`MockClock::sleeps`], so backoff sequences can
/// be asserted exactly. Clones share the same timeline.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    state: Arc<Mutex<MockState>>,
}

impl MockClock {
    /// Create a new mock clock starting at the current instant
    pub fn new() -> Self {
        Self { start: Instant::now(), state: Arc::new(Mutex::new(MockState::default())) }
    }

    /// Advance the mock clock by a duration
    pub fn advance(&self, duration: Duration) {
        self.state.lock().elapsed += duration;
    }

    /// Advance the mock clock by fractional seconds
    pub fn advance_secs(&self, secs: f64) {
        self.advance(Duration::from_secs_f64(secs));
    }

    /// Advance the mock clock by milliseconds (convenience method)
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Set the mock clock to a specific elapsed time
    pub fn set_elapsed(&self, duration: Duration) {
        self.state.lock().elapsed = duration;
    }

    /// Get the current elapsed time
    pub fn elapsed(&self) -> Duration {
        self.state.lock().elapsed
    }

    /// Every sleep requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().sleeps.clone()
    }

    fn record_sleep(&self, duration: Duration) {
        let mut state = self.state.lock();
        state.elapsed += duration;
        state.sleeps.push(duration);
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.record_sleep(duration);
        future::ready(()).boxed()
    }

    fn sleep_blocking(&self, duration: Duration) {
        self.record_sleep(duration);
    }
}
