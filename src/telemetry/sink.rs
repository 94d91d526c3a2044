//! Destinations for finalized events.
//!
//! Sinks are shared by every in-flight request and must accept concurrent
//! writes. Each finalized event is written once.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::telemetry::event::Event;

/// Tracing target used for event records.
pub const EVENT_TARGET: &str = "request_telemetry::event";

/// Failure while writing an event.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write event: {0}")]
    Io(#[from] io::Error),
    #[error("sink closed")]
    Closed,
}

/// A log sink for finalized events.
pub trait EventSink: Send + Sync {
    fn write(&self, event: &Event) -> Result<(), SinkError>;
}

/// Emits each event as an `info` record on the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn write(&self, event: &Event) -> Result<(), SinkError> {
        let payload = event.to_json()?;
        tracing::info!(
            target: EVENT_TARGET,
            event_id = event.event_id().unwrap_or_default(),
            operation = %event.operation(),
            res_code = event.res_code().unwrap_or_default(),
            elapsed_ms = event.elapsed().map(|d| d.as_millis() as u64).unwrap_or_default(),
            event = %payload,
            "request finished"
        );
        Ok(())
    }
}

/// Writes one JSON document per line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl JsonLinesSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn write(&self, event: &Event) -> Result<(), SinkError> {
        let mut line = event.to_json()?;
        line.push('\n');
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(line.as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}

/// Keeps the most recent events in memory.
#[derive(Debug)]
pub struct MemorySink {
    capacity: usize,
    events: Mutex<VecDeque<Event>>,
}

impl MemorySink {
    /// Sink retaining at most `capacity` events; older ones are evicted.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    fn guard(&self) -> MutexGuard<'_, VecDeque<Event>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    /// Copy of the retained events, oldest first.
    pub fn events(&self) -> Vec<Event> {
        self.guard().iter().cloned().collect()
    }

    /// Remove and return the retained events.
    pub fn drain(&self) -> Vec<Event> {
        self.guard().drain(..).collect()
    }
}

impl EventSink for MemorySink {
    fn write(&self, event: &Event) -> Result<(), SinkError> {
        let mut events = self.guard();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(operation: &str) -> Event {
        let mut event = Event::new(operation);
        event.stop();
        event
    }

    #[test]
    fn memory_sink_evicts_oldest() {
        let sink = MemorySink::new(2);
        for op in ["GET-/a", "GET-/b", "GET-/c"] {
            sink.write(&finished(op)).unwrap();
        }
        let ops: Vec<String> = sink.events().iter().map(|e| e.operation().to_string()).collect();
        assert_eq!(ops, vec!["GET-/b", "GET-/c"]);

        assert_eq!(sink.drain().len(), 2);
        assert!(sink.is_empty());
    }

    #[test]
    fn json_lines_sink_writes_one_line_per_event() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.write(&finished("GET-/a")).unwrap();
        sink.write(&finished("POST-/b")).unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["operation"], "POST-/b");
    }

    #[test]
    fn json_lines_sink_surfaces_io_errors() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let sink = JsonLinesSink::new(Broken);
        assert!(matches!(sink.write(&finished("GET-/")), Err(SinkError::Io(_))));
    }

    #[test]
    fn tracing_sink_accepts_events() {
        assert!(TracingSink.write(&finished("GET-/")).is_ok());
    }
}
