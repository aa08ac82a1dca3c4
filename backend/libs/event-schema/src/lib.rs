//! Event model shared by the event processor and its handlers.
//!
//! Messages arrive on Kafka as a JSON envelope:
//!
//! ```json
//! {
//!   "event_type": "user_registered",
//!   "user_id": "6f1c2a4e-8d3b-4b7a-9d55-0c6a1d2f3e4b",
//!   "data": {"email": "a@b.com"},
//!   "timestamp": "2024-03-01T12:00:00Z",
//!   "metadata": {"source": "identity"}
//! }
//! ```
//!
//! [`Event::from_value`] turns a decoded body into a typed [`Event`], and
//! [`SchemaValidator`] checks bodies against structural schemas loaded at startup.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

mod error;
pub mod schema;

pub use error::{EventValidationError, SchemaError, SchemaResult};
pub use schema::{SchemaValidator, SchemaViolation};

/// Business event types carried on the user events topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    UserRegistered,
    UserLogin,
    UserLogout,
    UserProfileUpdated,
    PasswordChanged,
    UserDeleted,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::UserRegistered,
        EventType::UserLogin,
        EventType::UserLogout,
        EventType::UserProfileUpdated,
        EventType::PasswordChanged,
        EventType::UserDeleted,
    ];

    /// Wire name, also used as the schema name
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::UserRegistered => "user_registered",
            EventType::UserLogin => "user_login",
            EventType::UserLogout => "user_logout",
            EventType::UserProfileUpdated => "user_profile_updated",
            EventType::PasswordChanged => "password_changed",
            EventType::UserDeleted => "user_deleted",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = EventValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|event_type| event_type.as_str() == s)
            .ok_or_else(|| EventValidationError::UnknownEventType(s.to_string()))
    }
}

/// Typed business event handed to handlers
///
/// Decoding goes through [`Event::from_value`] only, so every malformed body
/// maps to an [`EventValidationError`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub event_type: EventType,
    /// Subject of the event (the user), `user_id` on the wire
    #[serde(rename = "user_id")]
    pub subject_id: Uuid,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Event {
    pub fn new(event_type: EventType, subject_id: Uuid, data: Value) -> Self {
        Self {
            event_type,
            subject_id,
            data,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Build a typed event from a decoded message body.
    ///
    /// `data` and `metadata` default to empty objects and `timestamp` to now when
    /// absent. Timestamps without an offset are read as UTC.
    pub fn from_value(value: &Value) -> Result<Self, EventValidationError> {
        let body = value.as_object().ok_or(EventValidationError::NotAnObject)?;

        let event_type = match body.get("event_type") {
            None | Some(Value::Null) => return Err(EventValidationError::MissingField("event_type")),
            Some(Value::String(raw)) => raw.parse::<EventType>()?,
            Some(other) => {
                return Err(EventValidationError::InvalidField {
                    field: "event_type",
                    reason: format!("expected a string, got {}", json_kind(other)),
                })
            }
        };

        let subject_id = match body.get("user_id") {
            None | Some(Value::Null) => return Err(EventValidationError::MissingField("user_id")),
            Some(Value::String(raw)) => {
                Uuid::parse_str(raw).map_err(|e| EventValidationError::InvalidSubjectId {
                    value: raw.clone(),
                    reason: e.to_string(),
                })?
            }
            Some(other) => {
                return Err(EventValidationError::InvalidField {
                    field: "user_id",
                    reason: format!("expected a UUID string, got {}", json_kind(other)),
                })
            }
        };

        let data = match body.get("data") {
            None | Some(Value::Null) => empty_object(),
            Some(data @ Value::Object(_)) => data.clone(),
            Some(other) => {
                return Err(EventValidationError::InvalidField {
                    field: "data",
                    reason: format!("expected an object, got {}", json_kind(other)),
                })
            }
        };

        let timestamp = match body.get("timestamp") {
            None | Some(Value::Null) => Utc::now(),
            Some(Value::String(raw)) => parse_timestamp(raw)?,
            Some(other) => {
                return Err(EventValidationError::InvalidField {
                    field: "timestamp",
                    reason: format!("expected an ISO-8601 string, got {}", json_kind(other)),
                })
            }
        };

        let metadata = match body.get("metadata") {
            None | Some(Value::Null) => HashMap::new(),
            Some(Value::Object(entries)) => entries
                .iter()
                .map(|(key, value)| match value {
                    Value::String(s) => Ok((key.clone(), s.clone())),
                    other => Err(EventValidationError::InvalidField {
                        field: "metadata",
                        reason: format!("value for '{}' must be a string, got {}", key, json_kind(other)),
                    }),
                })
                .collect::<Result<HashMap<_, _>, _>>()?,
            Some(other) => {
                return Err(EventValidationError::InvalidField {
                    field: "metadata",
                    reason: format!("expected an object, got {}", json_kind(other)),
                })
            }
        };

        Ok(Self {
            event_type,
            subject_id,
            data,
            timestamp,
            metadata,
        })
    }

    /// Wire representation of the event
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "event_type": self.event_type.as_str(),
            "user_id": self.subject_id.to_string(),
            "data": self.data,
            "timestamp": self.timestamp.to_rfc3339(),
            "metadata": self.metadata,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, EventValidationError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| EventValidationError::InvalidTimestamp {
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
