//! Observation of calls: timing and call logging
//!
//! Both components only observe. They append structured records to a
//! [`RecordSink`] and hand back the wrapped call's result unchanged.
//!
//! - [`Timer`]: one `call.timed` record per call
//! - [`CallLogger`]: `call.entered`, then `call.returned` or `call.failed`
//! - [`TracingSink`]: default sink, forwards records to `tracing`
//! - [`MemorySink`]: in-memory sink for assertions

mod call_log;
mod sink;
mod timing;

pub use call_log::{CallLogger, ENTERED_EVENT, FAILED_EVENT, RETURNED_EVENT};
pub use sink::{MemorySink, Record, RecordSink, TracingSink};
pub use timing::{Timer, TIMED_EVENT};
