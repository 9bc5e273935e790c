//! Observability for the redo subsystem
//!
//! - Structured logging (JSON lines)
//! - Typed lifecycle events
//! - Passive counters
//!
//! Observability is read-only: nothing here changes redo behavior, and a
//! failed log write is ignored.
//!
//! ```ignore
//! use cdc_redo::observability::{log_event, Event, Severity};
//!
//! log_event(Severity::Info, Event::ManagerStart, &[("changefeed", "default/cf")]);
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{min_severity, Logger, Severity, LOG_LEVEL_ENV};
pub use metrics::{MetricsSnapshot, RedoMetrics};

/// Log a lifecycle event with fields.
///
/// Fatal events are promoted to `FATAL` regardless of `severity`.
pub fn log_event(severity: Severity, event: Event, fields: &[(&str, &str)]) {
    let severity = if event.is_fatal() {
        Severity::Fatal
    } else {
        severity
    };
    Logger::log(severity, event.as_str(), fields);
}
