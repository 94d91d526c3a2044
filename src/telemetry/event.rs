//! Per-request event record.
//!
//! # Lifecycle
//! ```text
//! Created ──mark_running──▶ Running ──finalize──▶ Finished
//!    └──────────────────finalize──────────────────────┘
//! ```
//!
//! The start time is stamped on construction. `stop` stamps the end time
//! from the monotonic clock so it can never precede the start. `finalize`
//! hands the event to a sink and is accepted exactly once.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::telemetry::sink::{EventSink, SinkError};

/// Lifecycle state of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Created,
    Running,
    Finished,
}

/// Lifecycle violations.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("result code already set to {0}")]
    ResCodeAlreadySet(String),
    #[error("event already finished")]
    AlreadyFinished,
    #[error("event sink rejected event: {0}")]
    Sink(#[from] SinkError),
}

/// Typed value of an event field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Time(DateTime<Utc>),
    Strings(Vec<String>),
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<u16> for FieldValue {
    fn from(v: u16) -> Self {
        FieldValue::Int(i64::from(v))
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::Time(v)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(v: Vec<String>) -> Self {
        FieldValue::Strings(v)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(s) => write!(f, "{}", s),
            FieldValue::Int(i) => write!(f, "{}", i),
            FieldValue::Time(t) => write!(f, "{}", t.to_rfc3339()),
            FieldValue::Strings(list) => write!(f, "[{}]", list.join(",")),
        }
    }
}

/// Structured record of one request.
#[derive(Debug, Clone)]
pub struct Event {
    event_id: Option<String>,
    operation: String,
    remote_addr: String,
    res_code: Option<String>,
    started: Instant,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    elapsed: Option<Duration>,
    fields: Vec<(String, FieldValue)>,
    errors: Vec<String>,
    state: EventState,
}

impl Event {
    /// Create an event for `operation` and stamp its start time.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            event_id: None,
            operation: operation.into(),
            remote_addr: String::new(),
            res_code: None,
            started: Instant::now(),
            start_time: Utc::now(),
            end_time: None,
            elapsed: None,
            fields: Vec::new(),
            errors: Vec::new(),
            state: EventState::Created,
        }
    }

    pub fn state(&self) -> EventState {
        self.state
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub fn set_remote_addr(&mut self, addr: impl Into<String>) {
        self.remote_addr = addr.into();
    }

    pub fn event_id(&self) -> Option<&str> {
        self.event_id.as_deref()
    }

    pub fn set_event_id(&mut self, id: String) {
        self.event_id = Some(id);
    }

    pub fn res_code(&self) -> Option<&str> {
        self.res_code.as_deref()
    }

    /// Record the result code. Accepted once.
    pub fn set_res_code(&mut self, code: impl Into<String>) -> Result<(), EventError> {
        if let Some(existing) = &self.res_code {
            return Err(EventError::ResCodeAlreadySet(existing.clone()));
        }
        self.res_code = Some(code.into());
        Ok(())
    }

    /// Downstream execution has begun.
    pub fn mark_running(&mut self) {
        if self.state == EventState::Created {
            self.state = EventState::Running;
        }
    }

    pub fn add_field(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.push((name.into(), value.into()));
    }

    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    /// First field recorded under `name`.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn add_error(&mut self, cause: impl Into<String>) {
        self.errors.push(cause.into());
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Stamp the end time and elapsed duration, returning the elapsed time.
    ///
    /// Only the first call stamps; later calls return the recorded value.
    pub fn stop(&mut self) -> Duration {
        if let Some(elapsed) = self.elapsed {
            return elapsed;
        }
        let elapsed = self.started.elapsed();
        let delta = chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        self.end_time = Some(self.start_time + delta);
        self.elapsed = Some(elapsed);
        elapsed
    }

    /// Stop the event if needed and write it to `sink`.
    ///
    /// The event is marked finished before the write, so a failing sink
    /// still consumes the single finalize.
    pub fn finalize(&mut self, sink: &dyn EventSink) -> Result<(), EventError> {
        if self.state == EventState::Finished {
            return Err(EventError::AlreadyFinished);
        }
        self.stop();
        self.state = EventState::Finished;
        sink.write(self)?;
        Ok(())
    }

    /// Render as a single JSON document, fields in insertion order.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

struct OrderedFields<'a>(&'a [(String, FieldValue)]);

impl Serialize for OrderedFields<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Event", 9)?;
        s.serialize_field("eventId", &self.event_id)?;
        s.serialize_field("operation", &self.operation)?;
        s.serialize_field("remoteAddr", &self.remote_addr)?;
        s.serialize_field("resCode", &self.res_code)?;
        s.serialize_field("startTime", &self.start_time)?;
        s.serialize_field("endTime", &self.end_time)?;
        s.serialize_field("elapsedMs", &self.elapsed.map(|d| d.as_millis() as u64))?;
        s.serialize_field("fields", &OrderedFields(&self.fields))?;
        s.serialize_field("errors", &self.errors)?;
        s.end()
    }
}
