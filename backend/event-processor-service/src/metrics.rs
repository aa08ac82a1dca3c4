use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder,
};

use crate::error::Result;

static EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "event_processor_events_total",
            "Messages reaching a terminal outcome, by event type and outcome",
        ),
        &["event_type", "outcome"],
    )
    .expect("failed to create event_processor_events_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register event_processor_events_total");
    counter
});

static RETRIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "event_processor_retries_total",
            "Handler re-invocations after a retryable failure",
        ),
        &["event_type"],
    )
    .expect("failed to create event_processor_retries_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register event_processor_retries_total");
    counter
});

static DEAD_LETTERS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "event_processor_dead_letters_total",
            "Messages appended to the dead letter queue, by reason",
        ),
        &["reason"],
    )
    .expect("failed to create event_processor_dead_letters_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register event_processor_dead_letters_total");
    counter
});

static DECODE_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "event_processor_decode_failures_total",
        "Messages whose payload was absent or not valid JSON",
    )
    .expect("failed to create event_processor_decode_failures_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register event_processor_decode_failures_total");
    counter
});

static SCHEMA_VIOLATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "event_processor_schema_violations_total",
            "Messages that did not conform to their schema",
        ),
        &["schema"],
    )
    .expect("failed to create event_processor_schema_violations_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register event_processor_schema_violations_total");
    counter
});

static POLL_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "event_processor_poll_errors_total",
        "Transport errors returned while polling the broker",
    )
    .expect("failed to create event_processor_poll_errors_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register event_processor_poll_errors_total");
    counter
});

static HANDLER_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "event_processor_handler_duration_seconds",
            "Handler execution time summed over all attempts for one message",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["event_type"],
    )
    .expect("failed to create event_processor_handler_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register event_processor_handler_duration_seconds");
    histogram
});

static DLQ_SIZE: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "event_processor_dlq_size",
        "Entries currently held in the dead letter queue",
    )
    .expect("failed to create event_processor_dlq_size");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register event_processor_dlq_size");
    gauge
});

/// Label used when a message never produced a usable event type
pub const UNKNOWN_EVENT_TYPE: &str = "unknown";

pub fn record_outcome(event_type: Option<&str>, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    EVENTS_TOTAL
        .with_label_values(&[event_type.unwrap_or(UNKNOWN_EVENT_TYPE), outcome])
        .inc();
}

pub fn record_retry(event_type: &str) {
    RETRIES_TOTAL.with_label_values(&[event_type]).inc();
}

pub fn record_dead_letter(reason: &str, dlq_len: usize) {
    DEAD_LETTERS_TOTAL.with_label_values(&[reason]).inc();
    set_dlq_size(dlq_len);
}

pub fn set_dlq_size(dlq_len: usize) {
    DLQ_SIZE.set(i64::try_from(dlq_len).unwrap_or(i64::MAX));
}

pub fn record_decode_failure() {
    DECODE_FAILURES_TOTAL.inc();
}

pub fn record_schema_violation(schema: &str) {
    SCHEMA_VIOLATIONS_TOTAL.with_label_values(&[schema]).inc();
}

pub fn record_poll_error() {
    POLL_ERRORS_TOTAL.inc();
}

pub fn observe_handler_duration(event_type: &str, elapsed: Duration) {
    HANDLER_DURATION_SECONDS
        .with_label_values(&[event_type])
        .observe(elapsed.as_secs_f64());
}

/// Prometheus text exposition of every collector in the default registry
pub fn render() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
