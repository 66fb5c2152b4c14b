//! Call timing
//!
//! [`Timer`] measures how long the wrapped call takes and appends one
//! `call.timed` record per call, whether the call succeeds or fails. The
//! result is returned unchanged.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use super::sink::{Record, RecordSink, TracingSink};
use crate::call::CallSignature;
use crate::compose::{AsyncNext, Middleware, Next};
use crate::error::{CallResult, OperationError};
use crate::resilience::{Clock, SystemClock};

/// Event name of timing records
pub const TIMED_EVENT: &str = "call.timed";

/// Measures elapsed time around a call
///
/// # Examples
///
/// ```
/// use callwrap::observability::{MemorySink, Timer};
///
/// let sink = MemorySink::new();
/// let timer = Timer::new(sink.clone());
///
/// let value: Result<u32, std::io::Error> = timer.call("answer", || Ok(42));
/// assert_eq!(value.unwrap(), 42);
/// assert_eq!(sink.events(), vec!["call.timed"]);
/// ```
pub struct Timer<C: Clock = SystemClock> {
    sink: Arc<dyn RecordSink>,
    clock: Arc<C>,
}

impl Timer<SystemClock> {
    /// Create a timer reporting to `sink`
    pub fn new(sink: impl RecordSink + 'static) -> Self {
        Self::with_clock(sink, SystemClock)
    }
}

impl Default for Timer<SystemClock> {
    fn default() -> Self {
        Self::new(TracingSink)
    }
}

impl<C: Clock> Timer<C> {
    /// Create a timer reading time from `clock`
    pub fn with_clock(sink: impl RecordSink + 'static, clock: C) -> Self {
        Self { sink: Arc::new(sink), clock: Arc::new(clock) }
    }

    fn report(&self, function: &str, started: Instant, error: Option<&dyn fmt::Display>) {
        let elapsed = self.clock.now().saturating_duration_since(started);
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        debug!(function, elapsed_ms, failed = error.is_some(), "Call timed");

        let mut record = Record::new(TIMED_EVENT)
            .field("function", function)
            .field("elapsed_ms", elapsed_ms)
            .field("outcome", if error.is_some() { "error" } else { "ok" });
        if let Some(error) = error {
            record = record.field("error", error.to_string());
        }
        self.sink.append(record);
    }

    /// Time a synchronous operation
    ///
    /// A panicking operation is reported as `panicked` while unwinding.
    pub fn call<F, T, E>(&self, function: &str, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        let measurement = Measurement::start(self, function);
        let result = operation();
        measurement.finish(&result);
        result
    }

    /// Time an async operation
    ///
    /// The measurement covers every suspension of the operation. Dropping
    /// the future before it completes still reports, as `cancelled`.
    pub async fn execute<F, Fut, T, E>(&self, function: &str, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let measurement = Measurement::start(self, function);
        let result = operation().await;
        measurement.finish(&result);
        result
    }
}

/// One in-flight measurement
///
/// Reports on drop when the call never produced a result.
struct Measurement<'a, C: Clock> {
    timer: &'a Timer<C>,
    function: &'a str,
    started: Instant,
    reported: bool,
}

impl<'a, C: Clock> Measurement<'a, C> {
    fn start(timer: &'a Timer<C>, function: &'a str) -> Self {
        Self { timer, function, started: timer.clock.now(), reported: false }
    }

    fn finish<T, E: fmt::Display>(mut self, result: &Result<T, E>) {
        self.reported = true;
        let error = result.as_ref().err().map(|e| e as &dyn fmt::Display);
        self.timer.report(self.function, self.started, error);
    }
}

impl<C: Clock> Drop for Measurement<'_, C> {
    fn drop(&mut self) {
        if !self.reported {
            let reason = if std::thread::panicking() { "panicked" } else { "cancelled" };
            self.timer.report(self.function, self.started, Some(&reason as &dyn fmt::Display));
        }
    }
}

impl<C: Clock> Clone for Timer<C> {
    fn clone(&self) -> Self {
        Self { sink: Arc::clone(&self.sink), clock: Arc::clone(&self.clock) }
    }
}

impl<C: Clock> fmt::Debug for Timer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer").field("sink", &self.sink).finish_non_exhaustive()
    }
}

#[async_trait]
impl<R, E, C> Middleware<R, E> for Timer<C>
where
    R: Send + 'static,
    E: OperationError,
    C: Clock,
{
    fn name(&self) -> &'static str {
        "timer"
    }

    fn around(&self, call: &CallSignature, next: Next<'_, R, E>) -> CallResult<R, E> {
        self.call(next.function(), || next.run(call))
    }

    async fn around_async(
        &self,
        call: &CallSignature,
        next: AsyncNext<'_, R, E>,
    ) -> CallResult<R, E> {
        self.execute(next.function(), || next.run(call)).await
    }
}
