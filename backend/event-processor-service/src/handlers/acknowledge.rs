use event_schema::Event;
use tracing::info;

use super::{EventHandler, ProcessingResult};

/// Logs the event and reports success.
///
/// Lets the service consume every event type before business handlers are wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcknowledgeHandler;

impl AcknowledgeHandler {
    pub fn new() -> Self {
        Self
    }
}

impl EventHandler for AcknowledgeHandler {
    fn handle(&self, event: &Event) -> anyhow::Result<ProcessingResult> {
        info!(
            event_type = %event.event_type,
            user_id = %event.subject_id,
            timestamp = %event.timestamp,
            "Acknowledged event"
        );

        Ok(ProcessingResult::success(format!("{} acknowledged", event.event_type))
            .with_event_id(event.subject_id.to_string()))
    }
}
