//! Poll/dispatch loop.
//!
//! One task owns the source and processes messages strictly one at a time:
//! decode, resolve the handler, validate, invoke with retry, then commit.
//! Every delivered message is committed exactly once, after its terminal
//! outcome, whether it succeeded, was dead-lettered or was discarded.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use event_schema::{Event, EventType, SchemaValidator};
use resilience::RetryPolicy;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::handlers::{EventHandler, HandlerRegistry, ProcessingResult};
use crate::metrics;
use crate::pipeline::{ConsumerState, PipelineHandle, PipelineState};
use crate::source::{InboundMessage, MessageOrigin, MessageSource};

#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// How long a single poll waits for a message
    pub poll_timeout: Duration,
    /// Pause after a transport error before polling again
    pub transport_error_backoff: Duration,
    /// Dead-letter messages that fail schema validation
    pub strict_schema_validation: bool,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            transport_error_backoff: Duration::from_secs(1),
            strict_schema_validation: false,
        }
    }
}

/// Terminal outcome of one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Handler succeeded after `retries` re-invocations
    Succeeded { retries: u32 },
    /// Recorded as failed and appended to the dead letter queue
    DeadLettered { reason: String },
    /// Recorded as failed without a dead letter entry
    Discarded { reason: String },
}

/// Result of one loop iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Idle,
    TransportError,
    Completed(Disposition),
}

// Dead letter metric labels
const MISSING_EVENT_TYPE: &str = "missing_event_type";
const SCHEMA_VIOLATION: &str = "schema_violation";
const INVALID_EVENT: &str = "invalid_event";
const HANDLER_FAILURE: &str = "handler_failure";

pub struct EventConsumer<S> {
    source: S,
    registry: HandlerRegistry,
    validator: SchemaValidator,
    retry_policy: RetryPolicy,
    options: ConsumerOptions,
    state: Arc<PipelineState>,
}

impl<S: MessageSource> EventConsumer<S> {
    /// Wrap an already subscribed source
    pub fn new(
        source: S,
        registry: HandlerRegistry,
        validator: SchemaValidator,
        retry_policy: RetryPolicy,
        options: ConsumerOptions,
        dlq_max_size: usize,
    ) -> Self {
        let state = Arc::new(PipelineState::new(dlq_max_size));
        state.set_state(ConsumerState::Subscribed);

        Self {
            source,
            registry,
            validator,
            retry_policy,
            options,
            state,
        }
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle::new(Arc::clone(&self.state))
    }

    /// Poll until stopped, then release the subscription
    pub async fn run(&mut self) {
        info!(
            handlers = ?self.registry.registered_types(),
            schemas = self.validator.len(),
            strict_schema_validation = self.options.strict_schema_validation,
            "Event consumer started"
        );

        while self.state.is_running() {
            self.poll_once().await;
        }

        self.state.set_state(ConsumerState::Stopping);
        self.source.close().await;
        self.state.set_state(ConsumerState::Stopped);

        let stats = self.state.stats.snapshot();
        info!(
            total_processed = stats.total_processed,
            successful = stats.successful,
            failed = stats.failed,
            retried = stats.retried,
            dead_letters = self.state.dlq.len(),
            "Event consumer stopped"
        );
    }

    /// Run a single iteration: poll, and process and commit whatever arrived
    pub async fn poll_once(&mut self) -> PollOutcome {
        self.state.set_state(ConsumerState::Polling);

        let message = match self.source.poll(self.options.poll_timeout).await {
            Ok(Some(message)) => message,
            Ok(None) => return PollOutcome::Idle,
            Err(e) => {
                error!(error = %e, "Error polling message source");
                metrics::record_poll_error();
                tokio::time::sleep(self.options.transport_error_backoff).await;
                return PollOutcome::TransportError;
            }
        };

        self.state.set_state(ConsumerState::Processing);
        let disposition = self.process(&message).await;
        self.commit(&message).await;
        self.state.set_state(ConsumerState::Committed);

        PollOutcome::Completed(disposition)
    }

    async fn commit(&mut self, message: &InboundMessage) {
        if let Err(e) = self.source.commit(message).await {
            error!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                error = %e,
                "Failed to commit offset"
            );
        }
    }

    async fn process(&self, message: &InboundMessage) -> Disposition {
        let origin = message.origin();

        let body: Value = match message.payload.as_deref() {
            None => return self.discard_undecodable(&origin, "Message has no payload".to_string()),
            Some(bytes) => match serde_json::from_slice(bytes) {
                Ok(body) => body,
                Err(e) => {
                    return self
                        .discard_undecodable(&origin, format!("Failed to decode message: {}", e))
                }
            },
        };

        let raw_type = body
            .get("event_type")
            .and_then(Value::as_str)
            .filter(|raw| !raw.is_empty())
            .map(str::to_string);
        let raw_type = match raw_type {
            Some(raw) => raw,
            None => {
                return self.dead_letter(
                    body,
                    &origin,
                    None,
                    "Missing event_type field".to_string(),
                    MISSING_EVENT_TYPE,
                )
            }
        };

        let known = raw_type.parse::<EventType>().ok();
        let resolved =
            known.and_then(|event_type| self.registry.get(event_type).map(|h| (event_type, h)));
        let (event_type, handler) = match resolved {
            Some(resolved) => resolved,
            None => {
                // Broker-supplied strings never become statistics keys.
                let stats_key = known.map_or(metrics::UNKNOWN_EVENT_TYPE, |t| t.as_str());
                warn!(
                    topic = %origin.topic,
                    partition = origin.partition,
                    offset = origin.offset,
                    event_type = %raw_type,
                    "No handler registered for event type"
                );
                self.state.stats.record_terminal(Some(stats_key), false);
                metrics::record_outcome(known.map(|t| t.as_str()), false);
                return Disposition::Discarded {
                    reason: format!("No handler registered for event type: {}", raw_type),
                };
            }
        };
        let type_name = event_type.as_str();

        if self.validator.has_schema(type_name) && !self.validator.validate(type_name, &body) {
            metrics::record_schema_violation(type_name);
            if self.options.strict_schema_validation {
                return self.dead_letter(
                    body,
                    &origin,
                    Some(type_name),
                    format!("Schema validation failed for {}", type_name),
                    SCHEMA_VIOLATION,
                );
            }
        }

        let event = match Event::from_value(&body) {
            Ok(event) => event,
            Err(e) => {
                return self.dead_letter(body, &origin, Some(type_name), e.to_string(), INVALID_EVENT)
            }
        };

        let (result, retries, handler_time) =
            self.invoke_with_retry(handler.as_ref(), &event, &origin).await;

        self.state.stats.record_terminal(Some(type_name), result.success);
        self.state.stats.record_latency(handler_time);
        metrics::record_outcome(Some(type_name), result.success);
        metrics::observe_handler_duration(type_name, handler_time);

        if result.success {
            debug!(
                topic = %origin.topic,
                partition = origin.partition,
                offset = origin.offset,
                event_type = type_name,
                retry_count = retries,
                message = %result.message,
                "Event processed"
            );
            return Disposition::Succeeded { retries };
        }

        let reason = result.failure_reason().to_string();
        error!(
            topic = %origin.topic,
            partition = origin.partition,
            offset = origin.offset,
            event_type = type_name,
            retry_count = retries,
            error = %reason,
            "Event processing failed, moving to dead letter queue"
        );
        let len = self.state.dlq.add_with_origin(body, reason.clone(), origin);
        metrics::record_dead_letter(HANDLER_FAILURE, len);

        Disposition::DeadLettered { reason }
    }

    /// Invoke the handler until it succeeds, declines a retry, or the budget runs out.
    ///
    /// Returns the last result, the number of retries made, and the summed handler
    /// time. Back-off sleeps hold up the loop and are not counted as handler time.
    async fn invoke_with_retry(
        &self,
        handler: &dyn EventHandler,
        event: &Event,
        origin: &MessageOrigin,
    ) -> (ProcessingResult, u32, Duration) {
        let mut retry_count = 0u32;
        let mut handler_time = Duration::ZERO;

        loop {
            let started = Instant::now();
            let result = invoke(handler, event);
            handler_time += started.elapsed();

            if result.success
                || !result.retry_recommended
                || !self.retry_policy.should_retry(retry_count)
            {
                return (result, retry_count, handler_time);
            }

            let backoff = self.retry_policy.backoff(retry_count);
            warn!(
                topic = %origin.topic,
                partition = origin.partition,
                offset = origin.offset,
                event_type = %event.event_type,
                retry_count,
                backoff_ms = backoff.as_millis() as u64,
                error = %result.failure_reason(),
                "Handler failed, retrying after backoff"
            );

            self.state.set_state(ConsumerState::RetryWait);
            tokio::time::sleep(backoff).await;
            self.state.set_state(ConsumerState::Processing);

            self.state.stats.record_retry();
            metrics::record_retry(event.event_type.as_str());
            retry_count += 1;
        }
    }

    fn discard_undecodable(&self, origin: &MessageOrigin, reason: String) -> Disposition {
        warn!(
            topic = %origin.topic,
            partition = origin.partition,
            offset = origin.offset,
            error = %reason,
            "Skipping undecodable message"
        );
        metrics::record_decode_failure();
        metrics::record_outcome(None, false);
        self.state.stats.record_terminal(None, false);

        Disposition::Discarded { reason }
    }

    fn dead_letter(
        &self,
        body: Value,
        origin: &MessageOrigin,
        event_type: Option<&str>,
        reason: String,
        label: &str,
    ) -> Disposition {
        warn!(
            topic = %origin.topic,
            partition = origin.partition,
            offset = origin.offset,
            event_type = event_type.unwrap_or(metrics::UNKNOWN_EVENT_TYPE),
            error = %reason,
            "Moving message to dead letter queue"
        );
        self.state.stats.record_terminal(event_type, false);
        metrics::record_outcome(event_type, false);

        let len = self
            .state
            .dlq
            .add_with_origin(body, reason.clone(), origin.clone());
        metrics::record_dead_letter(label, len);

        Disposition::DeadLettered { reason }
    }
}

/// Call the handler, turning `Err` and panics into non-retryable failures
fn invoke(handler: &dyn EventHandler, event: &Event) -> ProcessingResult {
    match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => ProcessingResult::failure("Handler returned an error", format!("{:#}", e), false),
        Err(payload) => ProcessingResult::failure(
            "Handler panicked",
            format!("Handler panicked: {}", panic_message(payload.as_ref())),
            false,
        ),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}
