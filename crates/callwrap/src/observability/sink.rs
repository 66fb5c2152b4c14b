//! Structured record sinks
//!
//! The timer and the call logger report through a [`RecordSink`], which only
//! has to append `{ event, payload }` records. [`TracingSink`] forwards them
//! to `tracing`; [`MemorySink`] keeps them for inspection in tests.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info};

/// One structured observation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// Event name, e.g. `call.timed`
    pub event: String,
    /// Event fields
    pub payload: Map<String, Value>,
}

impl Record {
    /// Create a record with an empty payload
    pub fn new(event: impl Into<String>) -> Self {
        Self { event: event.into(), payload: Map::new() }
    }

    /// Add a payload field
    #[must_use]
    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(name.to_string(), value.into());
        self
    }

    /// Look up a payload field
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    /// Whether the record reports a failure
    pub fn is_failure(&self) -> bool {
        self.event.ends_with(".failed")
            || self.get("outcome").and_then(Value::as_str) == Some("error")
    }
}

/// Destination for structured records
///
/// Implementations must be cheap and must not fail the call being observed.
pub trait RecordSink: Send + Sync + Debug {
    /// Append one record
    fn append(&self, record: Record);
}

impl<T: RecordSink + ?Sized> RecordSink for Arc<T> {
    fn append(&self, record: Record) {
        (**self).append(record);
    }
}

/// Sink emitting each record as a `tracing` event
///
/// Failure records are emitted at `ERROR`, everything else at `INFO`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl RecordSink for TracingSink {
    fn append(&self, record: Record) {
        let failure = record.is_failure();
        let payload = Value::Object(record.payload);
        if failure {
            error!(event = %record.event, payload = %payload, "call record");
        } else {
            info!(event = %record.event, payload = %payload, "call record");
        }
    }
}

/// Sink collecting records in memory
///
/// Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<Record>>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// All records appended so far, in order
    pub fn records(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    /// Event names appended so far, in order
    pub fn events(&self) -> Vec<String> {
        self.records.lock().iter().map(|record| record.event.clone()).collect()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Check if nothing was appended
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Drop every record
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl RecordSink for MemorySink {
    fn append(&self, record: Record) {
        self.records.lock().push(record);
    }
}
