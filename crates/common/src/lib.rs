//! Shared building blocks for the certpilot crates.
//!
//! - [`events`] - fire-and-forget renewal events and sinks
//! - [`clock`] - injectable time source
//! - [`metrics`] - Prometheus counters for renewal outcomes
//! - [`observability`] - tracing subscriber initialisation

pub mod clock;
pub mod events;
pub mod metrics;
pub mod observability;

pub use clock::{Clock, ManualClock, SystemClock};
pub use events::{Event, EventSink, LogEventSink, RecordingEventSink};
pub use metrics::RenewalMetrics;
pub use observability::{init_tracing, LogFormat};
