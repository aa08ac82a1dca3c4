//! Broker abstraction consumed by the event loop

mod kafka;
mod memory;

pub use kafka::KafkaMessageSource;
pub use memory::{CommitLog, Delivery, InMemorySource};

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

/// Physical identity of a delivered message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MessageOrigin {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// A message as delivered by the broker, payload still undecoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Option<Vec<u8>>,
}

impl InboundMessage {
    pub fn origin(&self) -> MessageOrigin {
        MessageOrigin {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset,
        }
    }
}

#[async_trait]
pub trait MessageSource: Send {
    /// Wait up to `timeout` for the next message.
    ///
    /// `Ok(None)` means nothing arrived (timeout or end of partition); `Err` is a
    /// transport failure and leaves consumer positions untouched.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<InboundMessage>>;

    /// Mark `message` as processed. The committed position is `offset + 1`.
    async fn commit(&mut self, message: &InboundMessage) -> Result<()>;

    /// Release the subscription
    async fn close(&mut self);
}
