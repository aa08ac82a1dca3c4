use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConsumerError>;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema error: {0}")]
    Schema(#[from] event_schema::SchemaError),

    #[error("Retry policy error: {0}")]
    RetryPolicy(#[from] resilience::RetryPolicyError),

    /// Broker transport failure reported by a non-Kafka message source
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl From<envy::Error> for ConsumerError {
    fn from(err: envy::Error) -> Self {
        ConsumerError::Config(err.to_string())
    }
}
