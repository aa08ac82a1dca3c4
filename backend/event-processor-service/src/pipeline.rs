//! State shared between the consumer loop and its operators

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::dlq::{DeadLetterEntry, DeadLetterQueue};
use crate::error::Result;
use crate::metrics;
use crate::stats::{EventProcessingStatistics, StatisticsRecorder};

/// Lifecycle of the consumer loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerState {
    Init,
    Subscribed,
    Polling,
    Processing,
    RetryWait,
    Committed,
    Stopping,
    Stopped,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsumerState::Init => "init",
            ConsumerState::Subscribed => "subscribed",
            ConsumerState::Polling => "polling",
            ConsumerState::Processing => "processing",
            ConsumerState::RetryWait => "retry_wait",
            ConsumerState::Committed => "committed",
            ConsumerState::Stopping => "stopping",
            ConsumerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub(crate) struct PipelineState {
    pub(crate) dlq: DeadLetterQueue,
    pub(crate) stats: StatisticsRecorder,
    running: AtomicBool,
    state: Mutex<ConsumerState>,
}

impl PipelineState {
    pub(crate) fn new(dlq_max_size: usize) -> Self {
        Self {
            dlq: DeadLetterQueue::new(dlq_max_size),
            stats: StatisticsRecorder::new(),
            running: AtomicBool::new(true),
            state: Mutex::new(ConsumerState::Init),
        }
    }

    pub(crate) fn set_state(&self, state: ConsumerState) {
        *self.state.lock() = state;
    }

    pub(crate) fn state(&self) -> ConsumerState {
        *self.state.lock()
    }

    /// Returns whether the flag was still set
    pub(crate) fn request_stop(&self) -> bool {
        self.running.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Cloneable view of a running pipeline for health, statistics and DLQ endpoints
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    inner: Arc<PipelineState>,
}

impl PipelineHandle {
    pub(crate) fn new(inner: Arc<PipelineState>) -> Self {
        Self { inner }
    }

    pub fn get_statistics(&self) -> EventProcessingStatistics {
        self.inner.stats.snapshot()
    }

    pub fn get_dead_letter_entries(&self) -> Vec<DeadLetterEntry> {
        self.inner.dlq.get_all()
    }

    pub fn dead_letter_count(&self) -> usize {
        self.inner.dlq.len()
    }

    /// Drop every dead-lettered message, returning how many were removed
    pub fn clear_dead_letter_queue(&self) -> usize {
        let removed = self.inner.dlq.clear();
        metrics::set_dlq_size(self.inner.dlq.len());
        info!(removed, "Dead letter queue cleared");
        removed
    }

    /// Ask the loop to stop after the message in flight
    pub fn stop(&self) {
        if self.inner.request_stop() {
            info!("Stop requested for event consumer");
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.inner.state()
    }

    /// False once a stop has been requested
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    pub fn render_metrics(&self) -> Result<String> {
        metrics::render()
    }
}
