//! Renewal events
//!
//! Events are emitted by the task engine at notable points of a certificate's
//! renewal (authorization succeeded or failed, signing failed, certificate
//! stored, store failed). Sinks are fire-and-forget: emitting never fails and
//! never blocks the caller on I/O.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

/// A single renewal event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    /// Human readable message
    pub message: String,
    /// Whether the event reports a failure
    pub failure: bool,
    /// Additional key/value attributes (domain, certificate, reason, ...)
    pub attributes: BTreeMap<String, String>,
}

impl Event {
    /// Create a success event
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            failure: false,
            attributes: BTreeMap::new(),
        }
    }

    /// Create a failure event
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            failure: true,
            attributes: BTreeMap::new(),
        }
    }

    /// Attach an attribute
    pub fn with(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.attributes.insert(key.into(), value.to_string());
        self
    }

    /// Look up an attribute value
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for (key, value) in &self.attributes {
            write!(f, " {}={}", key, value)?;
        }
        Ok(())
    }
}

/// Destination for renewal events
pub trait EventSink: Send + Sync + fmt::Debug {
    fn emit(&self, event: Event);
}

/// Event sink that writes every event to the tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: Event) {
        let attributes = join_attributes(&event.attributes);
        if event.failure {
            warn!(event = %event.message, attributes = %attributes, "Renewal event");
        } else {
            info!(event = %event.message, attributes = %attributes, "Renewal event");
        }
    }
}

fn join_attributes(attributes: &BTreeMap<String, String>) -> String {
    attributes
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Event sink that keeps every event in memory
///
/// Used by tests and by the CLI to summarise a one-shot renewal run.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every event emitted so far
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Number of events whose message equals `message`
    pub fn count(&self, message: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.message == message)
            .count()
    }

    pub fn failures(&self) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.failure)
            .cloned()
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: Event) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_attributes() {
        let event = Event::failure("store failed")
            .with("domain", "example.com")
            .with("attempt", 3);

        assert!(event.failure);
        assert_eq!(event.attribute("domain"), Some("example.com"));
        assert_eq!(event.attribute("attempt"), Some("3"));
        assert_eq!(event.attribute("missing"), None);
    }

    #[test]
    fn test_event_display_orders_attributes() {
        let event = Event::success("stored")
            .with("name", "www")
            .with("domain", "example.com");

        assert_eq!(event.to_string(), "stored domain=example.com name=www");
    }

    #[test]
    fn test_recording_sink() {
        let sink = RecordingEventSink::new();
        sink.emit(Event::success("a"));
        sink.emit(Event::failure("b"));
        sink.emit(Event::success("a"));

        assert_eq!(sink.events().len(), 3);
        assert_eq!(sink.count("a"), 2);
        assert_eq!(sink.failures().len(), 1);
    }
}
