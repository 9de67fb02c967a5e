use serde_json::{json, Value};
use uuid::Uuid;

/// One telemetry event emitted by the orchestrator or resilience layer
#[derive(Debug, Clone)]
pub struct TelemetryEvent {
    /// Correlation id tying the event to a query lifecycle
    pub correlation_id: Uuid,
    /// Stable event name, e.g. "retry.attempt" or "query.phase"
    pub name: &'static str,
    /// Structured payload
    pub fields: Value,
}

impl TelemetryEvent {
    pub fn new(correlation_id: Uuid, name: &'static str, fields: Value) -> Self {
        Self {
            correlation_id,
            name,
            fields,
        }
    }
}

/// Capability interface for recording telemetry
///
/// Injected explicitly into every component that emits events; there is no
/// process-wide singleton.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: TelemetryEvent);
}

/// Default sink that forwards events to `tracing` as structured JSON
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record(&self, event: TelemetryEvent) {
        let entry = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "event": event.name,
            "correlation_id": event.correlation_id.to_string(),
            "fields": event.fields,
        });
        tracing::info!(target: "telemetry", correlation_id = %event.correlation_id, "{}", entry);
    }
}

/// Sink that discards everything, for callers that opt out
#[derive(Debug, Default, Clone)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn record(&self, _event: TelemetryEvent) {}
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Sink that captures events for assertions in tests
    #[derive(Debug, Default)]
    pub struct CapturingSink {
        pub events: Mutex<Vec<TelemetryEvent>>,
    }

    impl CapturingSink {
        pub fn names(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().iter().map(|e| e.name).collect()
        }
    }

    impl TelemetrySink for CapturingSink {
        fn record(&self, event: TelemetryEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}
