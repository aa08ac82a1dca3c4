//! Event processor service.
//!
//! Consumes business events from Kafka and dispatches them to per-type handlers
//! with at-least-once delivery, bounded retry, and an in-memory dead letter queue.
//!
//! ```no_run
//! use event_processor_service::{
//!     AcknowledgeHandler, ConsumerOptions, EventConsumer, HandlerRegistry, InMemorySource,
//! };
//! use event_schema::{EventType, SchemaValidator};
//! use resilience::RetryPolicy;
//!
//! # async fn example() {
//! let mut registry = HandlerRegistry::new();
//! registry.register(EventType::UserLogin, AcknowledgeHandler::new());
//!
//! let mut consumer = EventConsumer::new(
//!     InMemorySource::new(),
//!     registry,
//!     SchemaValidator::new(),
//!     RetryPolicy::default(),
//!     ConsumerOptions::default(),
//!     1000,
//! );
//!
//! let handle = consumer.handle();
//! tokio::spawn(async move { consumer.run().await });
//!
//! println!("{:?}", handle.get_statistics());
//! handle.stop();
//! # }
//! ```

pub mod config;
pub mod consumer;
pub mod dlq;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod pipeline;
pub mod source;
pub mod stats;

pub use config::Config;
pub use consumer::{ConsumerOptions, Disposition, EventConsumer, PollOutcome};
pub use dlq::{DeadLetterEntry, DeadLetterQueue};
pub use error::{ConsumerError, Result};
pub use handlers::{AcknowledgeHandler, EventHandler, HandlerRegistry, ProcessingResult};
pub use pipeline::{ConsumerState, PipelineHandle};
pub use source::{
    CommitLog, Delivery, InMemorySource, InboundMessage, KafkaMessageSource, MessageOrigin,
    MessageSource,
};
pub use stats::{EventProcessingStatistics, StatisticsRecorder};
