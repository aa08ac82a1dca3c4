//! Handler contract and per-type dispatch table

mod acknowledge;

pub use acknowledge::AcknowledgeHandler;

use std::collections::HashMap;
use std::sync::Arc;

use event_schema::{Event, EventType};
use serde::Serialize;
use tracing::warn;

/// Outcome of a single handler invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingResult {
    pub success: bool,
    pub message: String,
    pub error: Option<String>,
    pub retry_recommended: bool,
    pub event_id: Option<String>,
}

impl ProcessingResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
            retry_recommended: false,
            event_id: None,
        }
    }

    pub fn failure(
        message: impl Into<String>,
        error: impl Into<String>,
        retry_recommended: bool,
    ) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: Some(error.into()),
            retry_recommended,
            event_id: None,
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    /// Text stored in the dead letter queue: the error, else the message
    pub fn failure_reason(&self) -> &str {
        self.error
            .as_deref()
            .filter(|error| !error.is_empty())
            .unwrap_or(&self.message)
    }
}

/// Business logic for one event type.
///
/// Handlers run on the consumer task and must be idempotent: a crash between
/// handling and commit redelivers the message. Returning `Err` (or panicking)
/// dead-letters the message without retry; return a failed
/// [`ProcessingResult`] with `retry_recommended` to ask for another attempt.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &Event) -> anyhow::Result<ProcessingResult>;
}

impl<F> EventHandler for F
where
    F: Fn(&Event) -> anyhow::Result<ProcessingResult> + Send + Sync,
{
    fn handle(&self, event: &Event) -> anyhow::Result<ProcessingResult> {
        self(event)
    }
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<EventType, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event_type`, replacing any previous one
    pub fn register<H>(&mut self, event_type: EventType, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.register_arc(event_type, Arc::new(handler));
    }

    pub fn register_arc(&mut self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        if self.handlers.insert(event_type, handler).is_some() {
            warn!(event_type = %event_type, "Replacing previously registered handler");
        }
    }

    pub fn get(&self, event_type: EventType) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(&event_type).cloned()
    }

    pub fn registered_types(&self) -> Vec<EventType> {
        let mut types: Vec<EventType> = self.handlers.keys().copied().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("registered_types", &self.registered_types())
            .finish()
    }
}
