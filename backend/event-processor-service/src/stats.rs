use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Processing counters exposed to operators
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventProcessingStatistics {
    pub total_processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub retried: u64,
    /// Terminal outcomes per event type name, with unparseable types under `unknown`
    pub event_types: BTreeMap<String, u64>,
    pub last_event_timestamp: Option<DateTime<Utc>>,
    /// Running mean handler time in seconds
    pub processing_time_avg: f64,
}

#[derive(Debug, Default)]
pub struct StatisticsRecorder {
    inner: Mutex<EventProcessingStatistics>,
}

impl StatisticsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one message reaching its terminal outcome
    pub fn record_terminal(&self, event_type: Option<&str>, success: bool) {
        let mut stats = self.inner.lock();
        stats.total_processed += 1;
        if success {
            stats.successful += 1;
        } else {
            stats.failed += 1;
        }
        if let Some(event_type) = event_type {
            *stats.event_types.entry(event_type.to_string()).or_insert(0) += 1;
        }
        stats.last_event_timestamp = Some(Utc::now());
    }

    /// Fold a handler duration into the running average
    pub fn record_latency(&self, elapsed: Duration) {
        let mut stats = self.inner.lock();
        let n = stats.total_processed.max(1) as f64;
        stats.processing_time_avg =
            (stats.processing_time_avg * (n - 1.0) + elapsed.as_secs_f64()) / n;
    }

    pub fn record_retry(&self) {
        self.inner.lock().retried += 1;
    }

    pub fn snapshot(&self) -> EventProcessingStatistics {
        self.inner.lock().clone()
    }
}
