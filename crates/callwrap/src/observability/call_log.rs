//! Call logging
//!
//! [`CallLogger`] appends a `call.entered` record with the arguments before
//! the call, then `call.returned` with the result or `call.failed` with the
//! error. Failures are re-raised unchanged.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::sink::{Record, RecordSink, TracingSink};
use crate::call::CallSignature;
use crate::compose::{AsyncNext, Middleware, Next};
use crate::error::{CallResult, ErrorKind, OperationError};

/// Event appended before the call
pub const ENTERED_EVENT: &str = "call.entered";
/// Event appended after a successful call
pub const RETURNED_EVENT: &str = "call.returned";
/// Event appended after a failed call
pub const FAILED_EVENT: &str = "call.failed";

/// Records arguments, results and failures of a call
#[derive(Debug, Clone)]
pub struct CallLogger {
    sink: Arc<dyn RecordSink>,
}

impl Default for CallLogger {
    fn default() -> Self {
        Self::new(TracingSink)
    }
}

impl CallLogger {
    /// Create a logger reporting to `sink`
    pub fn new(sink: impl RecordSink + 'static) -> Self {
        Self { sink: Arc::new(sink) }
    }

    fn entered(&self, function: &str, call: &CallSignature) {
        let kwargs: Map<String, Value> =
            call.keywords().iter().map(|(name, value)| (name.clone(), value.clone())).collect();
        self.sink.append(
            Record::new(ENTERED_EVENT)
                .field("function", function)
                .field("args", call.positional().to_vec())
                .field("kwargs", kwargs),
        );
    }

    fn finished<T: fmt::Debug>(
        &self,
        function: &str,
        outcome: Result<&T, (ErrorKind, &dyn fmt::Display)>,
    ) {
        let record = match outcome {
            Ok(value) => Record::new(RETURNED_EVENT)
                .field("function", function)
                .field("result", format!("{value:?}")),
            Err((kind, error)) => Record::new(FAILED_EVENT)
                .field("function", function)
                .field("kind", kind.to_string())
                .field("error", error.to_string()),
        };
        self.sink.append(record);
    }

    /// Log a synchronous operation
    ///
    /// The operation's own error is reported with kind `operation`.
    pub fn call<F, T, E>(&self, function: &str, call: &CallSignature, operation: F) -> Result<T, E>
    where
        F: FnOnce(&CallSignature) -> Result<T, E>,
        T: fmt::Debug,
        E: fmt::Display,
    {
        self.entered(function, call);
        let result = operation(call);
        self.finished(function, operation_outcome(&result));
        result
    }

    /// Log an async operation
    pub async fn execute<F, Fut, T, E>(
        &self,
        function: &str,
        call: &CallSignature,
        operation: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&CallSignature) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: fmt::Debug,
        E: fmt::Display,
    {
        self.entered(function, call);
        let result = operation(call).await;
        self.finished(function, operation_outcome(&result));
        result
    }

    fn chain_outcome<'r, R, E: OperationError>(
        result: &'r CallResult<R, E>,
    ) -> Result<&'r R, (ErrorKind, &'r dyn fmt::Display)> {
        result.as_ref().map_err(|error| (error.kind(), error as &dyn fmt::Display))
    }
}

fn operation_outcome<T, E: fmt::Display>(
    result: &Result<T, E>,
) -> Result<&T, (ErrorKind, &dyn fmt::Display)> {
    result.as_ref().map_err(|error| (ErrorKind::Operation, error as &dyn fmt::Display))
}

#[async_trait]
impl<R, E> Middleware<R, E> for CallLogger
where
    R: fmt::Debug + Send + 'static,
    E: OperationError,
{
    fn name(&self) -> &'static str {
        "call_logger"
    }

    fn around(&self, call: &CallSignature, next: Next<'_, R, E>) -> CallResult<R, E> {
        self.entered(next.function(), call);
        let result = next.run(call);
        self.finished(next.function(), Self::chain_outcome(&result));
        result
    }

    async fn around_async(
        &self,
        call: &CallSignature,
        next: AsyncNext<'_, R, E>,
    ) -> CallResult<R, E> {
        self.entered(next.function(), call);
        let result = next.run(call).await;
        self.finished(next.function(), Self::chain_outcome(&result));
        result
    }
}
