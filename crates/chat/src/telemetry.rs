//! Fire-and-forget telemetry sink.

use parking_lot::Mutex;
use proto::TelemetryError;
use serde_json::Value;
use tracing::{info, warn};

pub const EVENT_MESSAGE_SENT: &str = "chat_message_sent";
pub const EVENT_STREAMING_STARTED: &str = "chat_streaming_started";
pub const EVENT_STREAMING_COMPLETED: &str = "chat_streaming_completed";
pub const EVENT_STREAMING_ERROR: &str = "chat_streaming_error";
pub const EVENT_MODEL_SWITCHED: &str = "user_action_model_switched";
pub const EVENT_CONVERSATION_RESET: &str = "user_action_conversation_reset";
pub const EVENT_ERROR_OCCURRED: &str = "error_error_occurred";

/// Telemetry sink trait
pub trait TelemetrySink: Send + Sync {
    /// Records one named event with its properties.
    fn record(&self, event: &str, properties: &Value) -> Result<(), TelemetryError>;
}

/// Records an event and swallows sink failures.
pub(crate) fn emit(sink: &dyn TelemetrySink, event: &str, properties: Value) {
    if let Err(e) = sink.record(event, &properties) {
        warn!(event, error = %e, "Telemetry sink rejected event");
    }
}

/// Writes events to the `zenchat::telemetry` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, event: &str, properties: &Value) -> Result<(), TelemetryError> {
        info!(target: "zenchat::telemetry", event, properties = %properties, "telemetry");
        Ok(())
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record(&self, _event: &str, _properties: &Value) -> Result<(), TelemetryError> {
        Ok(())
    }
}

/// Keeps events in memory for inspection.
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    events: Mutex<Vec<(String, Value)>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns recorded event names in order.
    pub fn event_names(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Returns the properties of the last event with this name.
    pub fn last(&self, event: &str) -> Option<Value> {
        self.events
            .lock()
            .iter()
            .rev()
            .find(|(name, _)| name == event)
            .map(|(_, props)| props.clone())
    }

    /// Counts recorded events with this name.
    pub fn count(&self, event: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(name, _)| name == event)
            .count()
    }
}

impl TelemetrySink for MemoryTelemetry {
    fn record(&self, event: &str, properties: &Value) -> Result<(), TelemetryError> {
        self.events
            .lock()
            .push((event.to_string(), properties.clone()));
        Ok(())
    }
}
