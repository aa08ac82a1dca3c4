//! End-to-end tests for the consumer loop driven by a scripted message source
use event_processor_service::{
    ConsumerOptions, ConsumerState, Disposition, EventConsumer, HandlerRegistry, InMemorySource,
    PollOutcome, ProcessingResult,
};
use event_schema::{Event, EventType, SchemaValidator};
use resilience::RetryPolicy;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const TOPIC: &str = "user-events";

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_retries,
        Duration::from_millis(1),
        Duration::from_millis(10),
        2.0,
    )
    .unwrap()
}

fn options(strict: bool) -> ConsumerOptions {
    ConsumerOptions {
        poll_timeout: Duration::from_millis(10),
        transport_error_backoff: Duration::from_millis(1),
        strict_schema_validation: strict,
    }
}

fn envelope(event_type: &str, data: Value) -> Value {
    json!({
        "event_type": event_type,
        "user_id": Uuid::new_v4().to_string(),
        "data": data,
        "timestamp": "2024-03-01T12:00:00Z",
        "metadata": {"source": "identity"}
    })
}

fn succeed(_: &Event) -> anyhow::Result<ProcessingResult> {
    Ok(ProcessingResult::success("ok"))
}

fn build_consumer(
    source: InMemorySource,
    registry: HandlerRegistry,
    retry: RetryPolicy,
) -> EventConsumer<InMemorySource> {
    EventConsumer::new(
        source,
        registry,
        SchemaValidator::new(),
        retry,
        options(false),
        100,
    )
}

/// Handler failing with a retryable error for the first `failures` calls
fn flaky(failures: u32, calls: Arc<AtomicU32>) -> impl Fn(&Event) -> anyhow::Result<ProcessingResult> {
    move |_: &Event| {
        let attempt = calls.fetch_add(1, Ordering::SeqCst);
        if attempt < failures {
            Ok(ProcessingResult::failure(
                "write failed",
                "temporary outage",
                true,
            ))
        } else {
            Ok(ProcessingResult::success("stored"))
        }
    }
}

#[tokio::test]
async fn test_happy_path_commits_once() {
    let mut source = InMemorySource::new();
    let origin = source.push_json(TOPIC, 0, &envelope("user_registered", json!({"email": "a@b.com"})));
    let log = source.commit_log();

    let mut registry = HandlerRegistry::new();
    registry.register(EventType::UserRegistered, succeed);

    let mut consumer = build_consumer(source, registry, fast_retry(3));
    let handle = consumer.handle();

    let outcome = consumer.poll_once().await;

    assert_eq!(outcome, PollOutcome::Completed(Disposition::Succeeded { retries: 0 }));
    let stats = handle.get_statistics();
    assert_eq!(stats.total_processed, 1);
    assert_eq!(stats.successful, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.event_types.get("user_registered"), Some(&1));
    assert!(stats.last_event_timestamp.is_some());
    assert!(handle.get_dead_letter_entries().is_empty());
    assert_eq!(log.len(), 1);
    assert_eq!(log.position(TOPIC, 0), Some(origin.offset + 1));
    assert_eq!(handle.state(), ConsumerState::Committed);
}

#[tokio::test]
async fn test_missing_event_type_is_dead_lettered() {
    let body = json!({"user_id": Uuid::new_v4().to_string(), "data": {}});
    let mut source = InMemorySource::new();
    source.push_json(TOPIC, 3, &body);
    let log = source.commit_log();

    let mut consumer = build_consumer(source, HandlerRegistry::new(), fast_retry(3));
    let handle = consumer.handle();

    let outcome = consumer.poll_once().await;

    assert_eq!(
        outcome,
        PollOutcome::Completed(Disposition::DeadLettered {
            reason: "Missing event_type field".to_string()
        })
    );
    let entries = handle.get_dead_letter_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message, body);
    assert_eq!(entries[0].error, "Missing event_type field");
    let origin = entries[0].origin.as_ref().unwrap();
    assert_eq!((origin.topic.as_str(), origin.partition, origin.offset), (TOPIC, 3, 0));

    let stats = handle.get_statistics();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.total_processed, 1);
    assert!(stats.event_types.is_empty());
    assert_eq!(log.position(TOPIC, 3), Some(1));
}

#[tokio::test]
async fn test_empty_or_non_string_event_type_counts_as_missing() {
    let mut source = InMemorySource::new();
    source.push_json(TOPIC, 0, &json!({"event_type": "", "user_id": Uuid::new_v4().to_string()}));
    source.push_json(TOPIC, 0, &json!({"event_type": 7, "user_id": Uuid::new_v4().to_string()}));

    let mut consumer = build_consumer(source, HandlerRegistry::new(), fast_retry(3));
    let handle = consumer.handle();

    consumer.poll_once().await;
    consumer.poll_once().await;

    let errors: Vec<String> = handle
        .get_dead_letter_entries()
        .into_iter()
        .map(|entry| entry.error)
        .collect();
    assert_eq!(errors, vec!["Missing event_type field"; 2]);
}

#[tokio::test]
async fn test_success_on_third_attempt() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut source = InMemorySource::new();
    source.push_json(TOPIC, 0, &envelope("user_login", json!({})));
    let log = source.commit_log();

    let mut registry = HandlerRegistry::new();
    registry.register(EventType::UserLogin, flaky(2, Arc::clone(&calls)));

    let mut consumer = build_consumer(source, registry, fast_retry(3));
    let handle = consumer.handle();

    let outcome = consumer.poll_once().await;

    assert_eq!(outcome, PollOutcome::Completed(Disposition::Succeeded { retries: 2 }));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let stats = handle.get_statistics();
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.successful, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.total_processed, 1);
    assert!(handle.get_dead_letter_entries().is_empty());
    assert_eq!(log.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_sleeps_policy_backoff_between_attempts() {
    let policy = RetryPolicy::new(
        3,
        Duration::from_millis(100),
        Duration::from_secs(10),
        2.0,
    )
    .unwrap();
    let expected = policy.backoff(0) + policy.backoff(1);

    let calls = Arc::new(AtomicU32::new(0));
    let mut source = InMemorySource::new();
    source.push_json(TOPIC, 0, &envelope("user_login", json!({})));

    let mut registry = HandlerRegistry::new();
    registry.register(EventType::UserLogin, flaky(2, Arc::clone(&calls)));

    let mut consumer = build_consumer(source, registry, policy);
    let handle = consumer.handle();

    let task = tokio::spawn(async move {
        let started = tokio::time::Instant::now();
        let outcome = consumer.poll_once().await;
        (outcome, started.elapsed())
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.state(), ConsumerState::RetryWait);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // second attempt runs at 100ms, third at 300ms
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.state(), ConsumerState::RetryWait);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let (outcome, elapsed) = task.await.unwrap();

    assert_eq!(outcome, PollOutcome::Completed(Disposition::Succeeded { retries: 2 }));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(elapsed >= expected, "elapsed {:?} < {:?}", elapsed, expected);
    assert!(
        elapsed < expected + Duration::from_millis(1),
        "elapsed {:?} exceeds {:?}",
        elapsed,
        expected
    );
    assert_eq!(handle.state(), ConsumerState::Committed);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_retry_wait_finishes_in_flight_message() {
    let policy = RetryPolicy::new(
        3,
        Duration::from_millis(100),
        Duration::from_secs(10),
        2.0,
    )
    .unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let mut source = InMemorySource::new();
    source.push_json(TOPIC, 0, &envelope("user_login", json!({})));
    source.push_json(TOPIC, 0, &envelope("user_login", json!({})));
    let log = source.commit_log();

    let mut registry = HandlerRegistry::new();
    registry.register(EventType::UserLogin, flaky(2, Arc::clone(&calls)));

    let mut consumer = build_consumer(source, registry, policy);
    let handle = consumer.handle();

    let task = tokio::spawn(async move { consumer.run().await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.state(), ConsumerState::RetryWait);
    assert!(log.is_empty());

    handle.stop();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("consumer did not stop")
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(log.len(), 1);
    assert_eq!(log.position(TOPIC, 0), Some(1));
    assert!(log.is_closed());

    let stats = handle.get_statistics();
    assert_eq!(stats.total_processed, 1);
    assert_eq!(stats.successful, 1);
    assert_eq!(stats.retried, 2);
    assert_eq!(handle.state(), ConsumerState::Stopped);
}

#[tokio::test]
async fn test_exhausted_retries_are_dead_lettered() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut source = InMemorySource::new();
    source.push_json(TOPIC, 0, &envelope("user_login", json!({})));
    let log = source.commit_log();

    let mut registry = HandlerRegistry::new();
    registry.register(EventType::UserLogin, flaky(u32::MAX, Arc::clone(&calls)));

    let mut consumer = build_consumer(source, registry, fast_retry(3));
    let handle = consumer.handle();

    let outcome = consumer.poll_once().await;

    assert_eq!(
        outcome,
        PollOutcome::Completed(Disposition::DeadLettered {
            reason: "temporary outage".to_string()
        })
    );
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    let stats = handle.get_statistics();
    assert_eq!(stats.retried, 3);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.successful, 0);
    assert_eq!(handle.get_dead_letter_entries().len(), 1);
    assert_eq!(log.len(), 1);
}

#[tokio::test]
async fn test_non_retryable_failure_skips_retries() {
    let mut source = InMemorySource::new();
    source.push_json(TOPIC, 0, &envelope("user_deleted", json!({})));

    let mut registry = HandlerRegistry::new();
    registry.register(
        EventType::UserDeleted,
        |_: &Event| -> anyhow::Result<ProcessingResult> {
            Ok(ProcessingResult::failure("user not found", "", false))
        },
    );

    let mut consumer = build_consumer(source, registry, fast_retry(3));
    let handle = consumer.handle();

    let outcome = consumer.poll_once().await;

    assert_eq!(
        outcome,
        PollOutcome::Completed(Disposition::DeadLettered {
            reason: "user not found".to_string()
        })
    );
    assert_eq!(handle.get_statistics().retried, 0);
}

#[tokio::test]
async fn test_handler_error_and_panic_are_dead_lettered_without_retry() {
    let mut source = InMemorySource::new();
    source.push_json(TOPIC, 0, &envelope("user_logout", json!({})));
    source.push_json(TOPIC, 0, &envelope("password_changed", json!({})));
    let log = source.commit_log();

    let mut registry = HandlerRegistry::new();
    registry.register(
        EventType::UserLogout,
        |_: &Event| -> anyhow::Result<ProcessingResult> { Err(anyhow::anyhow!("store offline")) },
    );
    registry.register(
        EventType::PasswordChanged,
        |_: &Event| -> anyhow::Result<ProcessingResult> { panic!("handler bug") },
    );

    let mut consumer = build_consumer(source, registry, fast_retry(3));
    let handle = consumer.handle();

    consumer.poll_once().await;
    consumer.poll_once().await;

    let errors: Vec<String> = handle
        .get_dead_letter_entries()
        .into_iter()
        .map(|entry| entry.error)
        .collect();
    assert_eq!(errors, vec!["store offline", "Handler panicked: handler bug"]);

    let stats = handle.get_statistics();
    assert_eq!(stats.retried, 0);
    assert_eq!(stats.failed, 2);
    assert_eq!(log.position(TOPIC, 0), Some(2));
}

#[tokio::test]
async fn test_undecodable_messages_are_committed_without_dead_letter() {
    let mut source = InMemorySource::new();
    source.push_payload(TOPIC, 0, Some(b"not json".to_vec()));
    source.push_payload(TOPIC, 0, None);
    let log = source.commit_log();

    let mut consumer = build_consumer(source, HandlerRegistry::new(), fast_retry(3));
    let handle = consumer.handle();

    for _ in 0..2 {
        let outcome = consumer.poll_once().await;
        assert!(matches!(
            outcome,
            PollOutcome::Completed(Disposition::Discarded { .. })
        ));
    }

    let stats = handle.get_statistics();
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.total_processed, 2);
    assert!(handle.get_dead_letter_entries().is_empty());
    assert_eq!(log.position(TOPIC, 0), Some(2));
}

#[tokio::test]
async fn test_unknown_or_unhandled_type_is_not_dead_lettered() {
    let mut source = InMemorySource::new();
    source.push_json(TOPIC, 0, &envelope("user_exploded", json!({})));
    source.push_json(TOPIC, 0, &envelope("user_logout", json!({})));
    let log = source.commit_log();

    let mut registry = HandlerRegistry::new();
    registry.register(EventType::UserLogin, succeed);

    let mut consumer = build_consumer(source, registry, fast_retry(3));
    let handle = consumer.handle();

    for _ in 0..2 {
        let outcome = consumer.poll_once().await;
        assert!(matches!(
            outcome,
            PollOutcome::Completed(Disposition::Discarded { .. })
        ));
    }

    let stats = handle.get_statistics();
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.event_types.get("unknown"), Some(&1));
    assert_eq!(stats.event_types.get("user_logout"), Some(&1));
    assert!(stats.event_types.get("user_exploded").is_none());
    assert!(handle.get_dead_letter_entries().is_empty());
    assert_eq!(log.len(), 2);
}

#[tokio::test]
async fn test_unknown_types_share_one_statistics_key() {
    let mut source = InMemorySource::new();
    for i in 0..500 {
        source.push_json(TOPIC, 0, &envelope(&format!("junk_{}", i), json!({})));
    }
    let log = source.commit_log();

    let mut consumer = build_consumer(source, HandlerRegistry::new(), fast_retry(3));
    let handle = consumer.handle();

    for _ in 0..500 {
        consumer.poll_once().await;
    }

    let stats = handle.get_statistics();
    assert_eq!(stats.total_processed, 500);
    assert_eq!(stats.failed, 500);
    assert_eq!(stats.event_types.len(), 1);
    assert_eq!(stats.event_types.get("unknown"), Some(&500));
    assert_eq!(log.position(TOPIC, 0), Some(500));
}

#[tokio::test]
async fn test_invalid_subject_id_is_dead_lettered() {
    let mut body = envelope("user_login", json!({}));
    body["user_id"] = json!("not-a-uuid");

    let mut source = InMemorySource::new();
    source.push_json(TOPIC, 0, &body);

    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = HandlerRegistry::new();
    registry.register(EventType::UserLogin, flaky(0, Arc::clone(&calls)));

    let mut consumer = build_consumer(source, registry, fast_retry(3));
    let handle = consumer.handle();

    let outcome = consumer.poll_once().await;

    match outcome {
        PollOutcome::Completed(Disposition::DeadLettered { reason }) => {
            assert!(reason.starts_with("Invalid user_id 'not-a-uuid'"), "{}", reason);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(handle.get_statistics().event_types.get("user_login"), Some(&1));
}

fn registration_validator() -> SchemaValidator {
    let mut validator = SchemaValidator::new();
    validator
        .register(
            "user_registered",
            &json!({
                "type": "object",
                "required": ["data"],
                "properties": {
                    "data": {"type": "object", "required": ["email"]}
                }
            }),
        )
        .unwrap();
    validator
}

#[tokio::test]
async fn test_schema_validation_is_advisory_by_default() {
    let mut source = InMemorySource::new();
    source.push_json(TOPIC, 0, &envelope("user_registered", json!({})));

    let mut registry = HandlerRegistry::new();
    registry.register(EventType::UserRegistered, succeed);

    let mut consumer = EventConsumer::new(
        source,
        registry,
        registration_validator(),
        fast_retry(3),
        options(false),
        100,
    );

    let outcome = consumer.poll_once().await;

    assert_eq!(outcome, PollOutcome::Completed(Disposition::Succeeded { retries: 0 }));
}

#[tokio::test]
async fn test_strict_schema_validation_dead_letters() {
    let mut source = InMemorySource::new();
    source.push_json(TOPIC, 0, &envelope("user_registered", json!({})));
    source.push_json(TOPIC, 0, &envelope("user_registered", json!({"email": "a@b.com"})));
    let log = source.commit_log();

    let mut registry = HandlerRegistry::new();
    registry.register(EventType::UserRegistered, succeed);

    let mut consumer = EventConsumer::new(
        source,
        registry,
        registration_validator(),
        fast_retry(3),
        options(true),
        100,
    );
    let handle = consumer.handle();

    assert_eq!(
        consumer.poll_once().await,
        PollOutcome::Completed(Disposition::DeadLettered {
            reason: "Schema validation failed for user_registered".to_string()
        })
    );
    assert_eq!(
        consumer.poll_once().await,
        PollOutcome::Completed(Disposition::Succeeded { retries: 0 })
    );

    let stats = handle.get_statistics();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.successful, 1);
    assert_eq!(log.len(), 2);
}

#[tokio::test]
async fn test_transport_error_leaves_offsets_untouched() {
    let mut source = InMemorySource::new();
    source.push_transport_error("broker unavailable");
    source.push_json(TOPIC, 0, &envelope("user_login", json!({})));
    let log = source.commit_log();

    let mut registry = HandlerRegistry::new();
    registry.register(EventType::UserLogin, succeed);

    let mut consumer = build_consumer(source, registry, fast_retry(3));
    let handle = consumer.handle();

    assert_eq!(consumer.poll_once().await, PollOutcome::TransportError);
    assert!(log.is_empty());
    assert_eq!(handle.get_statistics().total_processed, 0);

    assert_eq!(
        consumer.poll_once().await,
        PollOutcome::Completed(Disposition::Succeeded { retries: 0 })
    );
    assert_eq!(log.position(TOPIC, 0), Some(1));
}

#[tokio::test]
async fn test_idle_poll() {
    let mut consumer = build_consumer(InMemorySource::new(), HandlerRegistry::new(), fast_retry(3));
    let handle = consumer.handle();

    assert_eq!(consumer.poll_once().await, PollOutcome::Idle);
    assert_eq!(handle.state(), ConsumerState::Polling);
}

#[tokio::test]
async fn test_statistics_balance_and_one_commit_per_message() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut source = InMemorySource::new();
    source.push_json(TOPIC, 0, &envelope("user_login", json!({})));
    source.push_payload(TOPIC, 0, Some(b"{".to_vec()));
    source.push_json(TOPIC, 1, &json!({"user_id": Uuid::new_v4().to_string()}));
    source.push_transport_error("connection reset");
    source.push_json(TOPIC, 1, &envelope("user_profile_updated", json!({})));
    source.push_json(TOPIC, 0, &envelope("user_logout", json!({})));
    let log = source.commit_log();

    let mut registry = HandlerRegistry::new();
    registry.register(EventType::UserLogin, succeed);
    registry.register(EventType::UserProfileUpdated, flaky(1, Arc::clone(&calls)));

    let mut consumer = build_consumer(source, registry, fast_retry(3));
    let handle = consumer.handle();

    for _ in 0..6 {
        consumer.poll_once().await;
    }

    let stats = handle.get_statistics();
    assert_eq!(stats.total_processed, 5);
    assert_eq!(stats.total_processed, stats.successful + stats.failed);
    assert_eq!(stats.successful, 2);
    assert_eq!(stats.retried, 1);

    let commits = log.entries();
    assert_eq!(commits.len(), 5);
    assert_eq!(log.position(TOPIC, 0), Some(3));
    assert_eq!(log.position(TOPIC, 1), Some(2));
}

#[tokio::test]
async fn test_dead_letter_queue_is_bounded() {
    let mut source = InMemorySource::new();
    for _ in 0..3 {
        source.push_json(TOPIC, 0, &json!({"data": {}}));
    }

    let mut consumer = EventConsumer::new(
        source,
        HandlerRegistry::new(),
        SchemaValidator::new(),
        fast_retry(3),
        options(false),
        2,
    );
    let handle = consumer.handle();

    for _ in 0..3 {
        consumer.poll_once().await;
    }

    let offsets: Vec<i64> = handle
        .get_dead_letter_entries()
        .iter()
        .map(|entry| entry.origin.as_ref().unwrap().offset)
        .collect();
    assert_eq!(offsets, vec![1, 2]);
    assert_eq!(handle.get_statistics().failed, 3);

    assert_eq!(handle.clear_dead_letter_queue(), 2);
    assert_eq!(handle.dead_letter_count(), 0);
}

#[tokio::test]
async fn test_run_until_stopped() {
    let mut source = InMemorySource::new();
    for _ in 0..3 {
        source.push_json(TOPIC, 0, &envelope("user_login", json!({})));
    }
    let log = source.commit_log();

    let mut registry = HandlerRegistry::new();
    registry.register(EventType::UserLogin, succeed);

    let mut consumer = build_consumer(source, registry, fast_retry(3));
    let handle = consumer.handle();
    assert_eq!(handle.state(), ConsumerState::Subscribed);
    assert!(handle.is_running());

    let task = tokio::spawn(async move { consumer.run().await });

    for _ in 0..200 {
        if handle.get_statistics().total_processed == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(handle.get_statistics().successful, 3);

    handle.stop();
    assert!(!handle.is_running());
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("consumer did not stop")
        .unwrap();

    assert_eq!(handle.state(), ConsumerState::Stopped);
    assert!(log.is_closed());
    assert_eq!(log.position(TOPIC, 0), Some(3));
}

#[tokio::test]
async fn test_stop_before_run() {
    let mut source = InMemorySource::new();
    source.push_json(TOPIC, 0, &envelope("user_login", json!({})));
    let log = source.commit_log();

    let mut consumer = build_consumer(source, HandlerRegistry::new(), fast_retry(3));
    let handle = consumer.handle();

    handle.stop();
    consumer.run().await;

    assert_eq!(handle.state(), ConsumerState::Stopped);
    assert!(log.is_closed());
    assert!(log.is_empty());
    assert_eq!(handle.get_statistics().total_processed, 0);
}

#[tokio::test]
async fn test_render_metrics() {
    let mut source = InMemorySource::new();
    source.push_json(TOPIC, 0, &envelope("user_login", json!({})));

    let mut registry = HandlerRegistry::new();
    registry.register(EventType::UserLogin, succeed);

    let mut consumer = build_consumer(source, registry, fast_retry(3));
    let handle = consumer.handle();
    consumer.poll_once().await;

    let text = handle.render_metrics().unwrap();
    assert!(text.contains("event_processor_events_total"));
    assert!(text.contains("event_processor_handler_duration_seconds"));
}
