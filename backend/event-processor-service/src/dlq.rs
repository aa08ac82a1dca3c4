//! In-memory dead letter queue.
//!
//! Entries are kept oldest-first and evicted from the front once the queue
//! grows past `max_size`. Nothing survives a restart.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::source::MessageOrigin;

/// A message that reached a terminal failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetterEntry {
    /// Raw decoded message body
    pub message: Value,
    pub error: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<MessageOrigin>,
}

#[derive(Debug)]
pub struct DeadLetterQueue {
    entries: Mutex<VecDeque<DeadLetterEntry>>,
    max_size: usize,
}

impl DeadLetterQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(max_size.min(1024))),
            max_size,
        }
    }

    /// Append an entry, evicting the oldest ones past capacity. Returns the new length.
    pub fn add(&self, message: Value, error: impl Into<String>) -> usize {
        self.push(DeadLetterEntry {
            message,
            error: error.into(),
            timestamp: Utc::now(),
            origin: None,
        })
    }

    pub fn add_with_origin(
        &self,
        message: Value,
        error: impl Into<String>,
        origin: MessageOrigin,
    ) -> usize {
        self.push(DeadLetterEntry {
            message,
            error: error.into(),
            timestamp: Utc::now(),
            origin: Some(origin),
        })
    }

    fn push(&self, entry: DeadLetterEntry) -> usize {
        let mut entries = self.entries.lock();
        entries.push_back(entry);
        while entries.len() > self.max_size {
            entries.pop_front();
        }
        entries.len()
    }

    /// Snapshot copy, oldest first
    pub fn get_all(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Remove every entry, returning how many were dropped
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let removed = entries.len();
        entries.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}
