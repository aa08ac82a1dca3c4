use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{InboundMessage, MessageOrigin, MessageSource};
use crate::error::{ConsumerError, Result};

/// One scripted answer to `poll`
#[derive(Debug, Clone)]
pub enum Delivery {
    Message(InboundMessage),
    TransportError(String),
    /// An empty poll, returned immediately
    Idle,
}

/// Shared record of commits made against an [`InMemorySource`].
///
/// Positions are stored the way a broker stores them: `offset + 1`.
#[derive(Debug, Clone, Default)]
pub struct CommitLog {
    commits: Arc<Mutex<Vec<MessageOrigin>>>,
    closed: Arc<AtomicBool>,
}

impl CommitLog {
    pub fn entries(&self) -> Vec<MessageOrigin> {
        self.commits.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.commits.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.lock().is_empty()
    }

    /// Latest committed position for a partition
    pub fn position(&self, topic: &str, partition: i32) -> Option<i64> {
        self.commits
            .lock()
            .iter()
            .rev()
            .find(|c| c.topic == topic && c.partition == partition)
            .map(|c| c.offset)
    }

    /// Whether the source has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Scripted message source for local replay and tests.
///
/// Deliveries are handed out in push order. Once the script is exhausted, `poll`
/// waits for the full timeout and returns nothing, like an idle broker.
#[derive(Debug, Default)]
pub struct InMemorySource {
    deliveries: VecDeque<Delivery>,
    next_offsets: HashMap<(String, i32), i64>,
    log: CommitLog,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw payload, assigning the next offset of `topic`/`partition`
    pub fn push_payload(
        &mut self,
        topic: &str,
        partition: i32,
        payload: Option<Vec<u8>>,
    ) -> MessageOrigin {
        let next = self
            .next_offsets
            .entry((topic.to_string(), partition))
            .or_insert(0);
        let offset = *next;
        *next += 1;

        let message = InboundMessage {
            topic: topic.to_string(),
            partition,
            offset,
            payload,
        };
        let origin = message.origin();
        self.deliveries.push_back(Delivery::Message(message));
        origin
    }

    pub fn push_json(&mut self, topic: &str, partition: i32, body: &Value) -> MessageOrigin {
        self.push_payload(topic, partition, Some(body.to_string().into_bytes()))
    }

    pub fn push_transport_error(&mut self, reason: impl Into<String>) {
        self.deliveries
            .push_back(Delivery::TransportError(reason.into()));
    }

    pub fn push_idle(&mut self) {
        self.deliveries.push_back(Delivery::Idle);
    }

    pub fn remaining(&self) -> usize {
        self.deliveries.len()
    }

    pub fn commit_log(&self) -> CommitLog {
        self.log.clone()
    }
}

#[async_trait]
impl MessageSource for InMemorySource {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<InboundMessage>> {
        match self.deliveries.pop_front() {
            Some(Delivery::Message(message)) => Ok(Some(message)),
            Some(Delivery::TransportError(reason)) => Err(ConsumerError::Transport(reason)),
            Some(Delivery::Idle) => Ok(None),
            None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }

    async fn commit(&mut self, message: &InboundMessage) -> Result<()> {
        let mut position = message.origin();
        position.offset += 1;
        self.log.commits.lock().push(position);
        Ok(())
    }

    async fn close(&mut self) {
        self.log.closed.store(true, Ordering::SeqCst);
    }
}
