use crate::consumer::ConsumerOptions;
use crate::error::{ConsumerError, Result};
use resilience::RetryPolicy;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Raw environment, one field per variable (`KAFKA_BROKERS` -> `kafka_brokers`)
#[derive(Debug, Clone, Deserialize)]
struct EnvSettings {
    #[serde(default = "default_brokers")]
    kafka_brokers: String,
    #[serde(default = "default_group_id")]
    kafka_group_id: String,
    /// Comma-separated topic list
    #[serde(default = "default_topics")]
    kafka_topics: String,
    #[serde(default = "default_auto_offset_reset")]
    kafka_auto_offset_reset: String,
    #[serde(default = "default_poll_timeout_ms")]
    kafka_poll_timeout_ms: u64,
    #[serde(default = "default_session_timeout_ms")]
    kafka_session_timeout_ms: u64,
    #[serde(default = "default_max_poll_interval_ms")]
    kafka_max_poll_interval_ms: u64,

    #[serde(default = "default_max_retries")]
    retry_max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    retry_initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    retry_max_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    retry_multiplier: f64,

    #[serde(default = "default_dlq_max_size")]
    dlq_max_size: usize,

    #[serde(default)]
    schema_dir: Option<String>,
    #[serde(default)]
    schema_validation_strict: bool,

    #[serde(default = "default_transport_error_backoff_ms")]
    transport_error_backoff_ms: u64,
}

fn default_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_group_id() -> String {
    "event-processor".to_string()
}

fn default_topics() -> String {
    "user-events".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_poll_timeout_ms() -> u64 {
    1_000
}

fn default_session_timeout_ms() -> u64 {
    30_000
}

fn default_max_poll_interval_ms() -> u64 {
    300_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_dlq_max_size() -> usize {
    1_000
}

fn default_transport_error_backoff_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone)]
pub struct Config {
    pub kafka: KafkaConfig,
    pub retry: RetryPolicy,
    pub dlq: DlqConfig,
    pub schema: SchemaConfig,
    pub transport_error_backoff: Duration,
}

/// Broker subscription settings
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub group_id: String,
    pub topics: Vec<String>,
    pub auto_offset_reset: String,
    pub poll_timeout: Duration,
    pub session_timeout: Duration,
    pub max_poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct DlqConfig {
    pub max_size: usize,
}

#[derive(Debug, Clone)]
pub struct SchemaConfig {
    /// Directory of `*.json` schemas; no schemas are loaded when unset
    pub dir: Option<PathBuf>,
    /// Dead-letter messages that fail schema validation instead of only logging
    pub strict: bool,
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        let settings: EnvSettings = envy::from_env()?;
        Self::from_settings(settings)
    }

    /// Load configuration from explicit key/value pairs (upper-case variable names)
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let settings: EnvSettings =
            envy::from_iter(vars.into_iter().map(|(k, v)| (k.into(), v.into())))?;
        Self::from_settings(settings)
    }

    fn from_settings(settings: EnvSettings) -> Result<Self> {
        let topics: Vec<String> = settings
            .kafka_topics
            .split(',')
            .map(str::trim)
            .filter(|topic| !topic.is_empty())
            .map(str::to_string)
            .collect();

        let retry = RetryPolicy::new(
            settings.retry_max_retries,
            Duration::from_millis(settings.retry_initial_backoff_ms),
            Duration::from_millis(settings.retry_max_backoff_ms),
            settings.retry_multiplier,
        )?;

        let config = Self {
            kafka: KafkaConfig {
                brokers: settings.kafka_brokers,
                group_id: settings.kafka_group_id,
                topics,
                auto_offset_reset: settings.kafka_auto_offset_reset,
                poll_timeout: Duration::from_millis(settings.kafka_poll_timeout_ms),
                session_timeout: Duration::from_millis(settings.kafka_session_timeout_ms),
                max_poll_interval: Duration::from_millis(settings.kafka_max_poll_interval_ms),
            },
            retry,
            dlq: DlqConfig {
                max_size: settings.dlq_max_size,
            },
            schema: SchemaConfig {
                dir: settings
                    .schema_dir
                    .filter(|dir| !dir.trim().is_empty())
                    .map(PathBuf::from),
                strict: settings.schema_validation_strict,
            },
            transport_error_backoff: Duration::from_millis(settings.transport_error_backoff_ms),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.kafka.topics.is_empty() {
            return Err(ConsumerError::Config(
                "KAFKA_TOPICS must name at least one topic".to_string(),
            ));
        }
        if self.kafka.group_id.trim().is_empty() {
            return Err(ConsumerError::Config(
                "KAFKA_GROUP_ID must not be empty".to_string(),
            ));
        }
        if self.kafka.poll_timeout.is_zero() {
            return Err(ConsumerError::Config(
                "KAFKA_POLL_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }
        if self.dlq.max_size == 0 {
            return Err(ConsumerError::Config(
                "DLQ_MAX_SIZE must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn consumer_options(&self) -> ConsumerOptions {
        ConsumerOptions {
            poll_timeout: self.kafka.poll_timeout,
            transport_error_backoff: self.transport_error_backoff,
            strict_schema_validation: self.schema.strict,
        }
    }
}
