//! Error types for event decoding and schema handling

use thiserror::Error;

/// Errors raised while turning a decoded message body into a typed [`crate::Event`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventValidationError {
    /// Body is not a JSON object
    #[error("Event body must be a JSON object")]
    NotAnObject,

    /// A required field is absent or null
    #[error("Missing {0} field")]
    MissingField(&'static str),

    /// `event_type` does not name a known event type
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// `user_id` is present but is not a UUID
    #[error("Invalid user_id '{value}': {reason}")]
    InvalidSubjectId { value: String, reason: String },

    /// `timestamp` is present but is not an ISO-8601 datetime
    #[error("Invalid timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },

    /// Any other field with the wrong shape
    #[error("Invalid {field} field: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Result type for schema loading
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors that can occur while loading structural schemas
#[derive(Error, Debug)]
pub enum SchemaError {
    /// Schema directory or file could not be read
    #[error("Failed to read schema at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Schema file is not valid JSON
    #[error("Schema {name} is not valid JSON: {source}")]
    Json {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    /// Schema is valid JSON but not a usable schema
    #[error("Invalid schema {name}: {reason}")]
    InvalidSchema { name: String, reason: String },
}
