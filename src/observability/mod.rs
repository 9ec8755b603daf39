//! Observability for the query core
//!
//! - Structured logging (JSON lines)
//! - Monotonic counters
//! - Typed lifecycle events
//!
//! Observability is read-only: nothing here influences formula results or
//! transactional state, and a failing log sink never fails an operation.

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use scope::{ObservationScope, Timer};

use std::sync::OnceLock;

static METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

/// Process-wide metrics registry
pub fn metrics() -> &'static MetricsRegistry {
    METRICS.get_or_init(MetricsRegistry::new)
}

fn severity_for(event: Event) -> Severity {
    if event.is_fatal() {
        Severity::Fatal
    } else if event == Event::StaleMemoryDetected {
        Severity::Error
    } else if event.is_detail() {
        Severity::Trace
    } else {
        Severity::Info
    }
}

/// Log a lifecycle event
pub fn log_event(event: Event) {
    Logger::log(severity_for(event), event.as_str(), &[]);
}

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(severity_for(event), event.as_str(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_severity_mapping() {
        assert_eq!(severity_for(Event::VersionOverflow), Severity::Fatal);
        assert_eq!(severity_for(Event::LayerCreated), Severity::Trace);
        assert_eq!(severity_for(Event::StaleMemoryDetected), Severity::Error);
        assert_eq!(severity_for(Event::Rollback), Severity::Info);
    }

    #[test]
    fn test_global_metrics_is_shared() {
        let before = metrics().snapshot().rollbacks;
        metrics().increment_rollbacks();
        assert!(metrics().snapshot().rollbacks > before);
    }

    #[test]
    fn test_log_event_with_fields() {
        log_event_with_fields(Event::ConfigApplied, &[("buffer_size", "512")]);
        log_event(Event::Rollback);
    }
}
