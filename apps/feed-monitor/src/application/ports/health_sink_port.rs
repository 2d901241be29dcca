//! Health Sink Port (Driven Port)
//!
//! Destination for health events. The monitor classifies and reports;
//! alerting is the sink's concern.

use std::sync::Arc;

use crate::domain::staleness::HealthEvent;

/// Port receiving one event per channel evaluation.
#[cfg_attr(test, mockall::automock)]
pub trait HealthSink: Send + Sync {
    /// Deliver an event. Must not block.
    fn emit(&self, event: &HealthEvent);
}

/// Sink that discards events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpHealthSink;

impl HealthSink for NoOpHealthSink {
    fn emit(&self, _event: &HealthEvent) {}
}

/// Sink that forwards each event to several sinks in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn HealthSink>>,
}

impl FanoutSink {
    /// Create an empty fan-out.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a destination.
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn HealthSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl HealthSink for FanoutSink {
    fn emit(&self, event: &HealthEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
