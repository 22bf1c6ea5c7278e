//! Message envelopes with correlation IDs for tracking agent communication.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use super::ids::{create_message_type, AgentId, CorrelationId, MessageId, MessageType};
use super::types::{MessageKind, Priority};
use crate::error::{FieldViolation, ValidationError};

/// Envelope payload: always a JSON object, never a primitive.
pub type Payload = Map<String, Value>;

/// Convert any serializable value into a payload object.
pub fn into_payload<P: Serialize>(payload: P) -> Result<Payload, ValidationError> {
    match serde_json::to_value(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ValidationError::single(
            "payload",
            format!("must be an object, got {}", json_kind(&other)),
        )),
        Err(e) => Err(ValidationError::single(
            "payload",
            format!("could not be serialized: {}", e),
        )),
    }
}

/// Validated message record exchanged between agents.
///
/// Fields are private: an `Envelope` only comes from the typed constructors
/// below or from [`validate_message`], so everything the router sees has
/// already been checked.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    id: MessageId,
    from: AgentId,
    to: AgentId,
    #[serde(rename = "type")]
    message_type: MessageType,
    payload: Payload,
    timestamp: DateTime<Utc>,
    kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<CorrelationId>,
}

impl Envelope {
    /// One-way message.
    pub fn event(from: AgentId, to: AgentId, message_type: MessageType, payload: Payload) -> Self {
        Self {
            id: MessageId::new(),
            from,
            to,
            message_type,
            payload,
            timestamp: Utc::now(),
            kind: MessageKind::Event,
            correlation_id: None,
        }
    }

    /// Request expecting a correlated response.
    pub fn request(
        from: AgentId,
        to: AgentId,
        message_type: MessageType,
        payload: Payload,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            kind: MessageKind::Request,
            correlation_id: Some(correlation_id),
            ..Self::event(from, to, message_type, payload)
        }
    }

    /// Response to this request, addressed back to the requester.
    ///
    /// Returns `None` when `self` carries no correlation id.
    pub fn create_response(&self, from: AgentId, payload: Payload) -> Option<Self> {
        let correlation_id = self.correlation_id?;
        Some(Self {
            kind: MessageKind::Response,
            correlation_id: Some(correlation_id),
            ..Self::event(from, self.from, self.message_type.clone(), payload)
        })
    }

    /// Copy of this envelope addressed to another recipient.
    pub fn readdressed(&self, to: AgentId) -> Self {
        Self {
            to,
            ..self.clone()
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn from(&self) -> AgentId {
        self.from
    }

    pub fn to(&self) -> AgentId {
        self.to
    }

    pub fn message_type(&self) -> &MessageType {
        &self.message_type
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.correlation_id
    }

    pub fn is_request(&self) -> bool {
        self.kind == MessageKind::Request
    }

    pub fn is_response(&self) -> bool {
        self.kind == MessageKind::Response
    }

    /// JSON form accepted back by [`validate_message`].
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl TryFrom<&Value> for Envelope {
    type Error = ValidationError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        validate_message(value)
    }
}

/// Validate a raw candidate and build an [`Envelope`].
///
/// Every field is checked and every violation is reported.
pub fn validate_message(candidate: &Value) -> Result<Envelope, ValidationError> {
    let Some(object) = candidate.as_object() else {
        return Err(ValidationError::single(
            "message",
            format!("must be an object, got {}", json_kind(candidate)),
        ));
    };

    let mut violations = Vec::new();
    let mut violate = |field: &str, message: String| {
        violations.push(FieldViolation {
            field: field.to_string(),
            message,
        });
    };

    let id = match object.get("id") {
        Some(Value::String(raw)) => match MessageId::parse(raw) {
            Ok(id) => Some(id),
            Err(e) => {
                violate("id", e.violation.to_string());
                None
            }
        },
        Some(other) => {
            violate("id", format!("must be a string, got {}", json_kind(other)));
            None
        }
        None => {
            violate("id", "is required".to_string());
            None
        }
    };

    let mut agent_field = |field: &str| match object.get(field) {
        Some(Value::String(raw)) => match AgentId::parse(raw) {
            Ok(id) => Some(id),
            Err(e) => {
                violate(field, e.violation.to_string());
                None
            }
        },
        Some(other) => {
            violate(field, format!("must be a string, got {}", json_kind(other)));
            None
        }
        None => {
            violate(field, "is required".to_string());
            None
        }
    };
    let from = agent_field("from");
    let to = agent_field("to");

    let message_type = match object.get("type") {
        Some(Value::String(raw)) => match create_message_type(raw) {
            Ok(t) => Some(t),
            Err(e) => {
                violate("type", e.violation.to_string());
                None
            }
        },
        Some(other) => {
            violate("type", format!("must be a string, got {}", json_kind(other)));
            None
        }
        None => {
            violate("type", "is required".to_string());
            None
        }
    };

    let payload = match object.get("payload") {
        Some(Value::Object(map)) => Some(map.clone()),
        Some(other) => {
            violate(
                "payload",
                format!("must be an object, got {}", json_kind(other)),
            );
            None
        }
        None => {
            violate("payload", "is required".to_string());
            None
        }
    };

    let timestamp = match object.get("timestamp") {
        Some(Value::String(raw)) => match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(e) => {
                violate("timestamp", format!("is not RFC 3339: {}", e));
                None
            }
        },
        Some(Value::Number(n)) => match n.as_i64().filter(|ms| *ms >= 0) {
            Some(ms) => match DateTime::from_timestamp_millis(ms) {
                Some(ts) => Some(ts),
                None => {
                    violate("timestamp", "is out of range".to_string());
                    None
                }
            },
            None => {
                violate(
                    "timestamp",
                    "must be a non-negative integer of milliseconds".to_string(),
                );
                None
            }
        },
        Some(other) => {
            violate(
                "timestamp",
                format!("must be a string or number, got {}", json_kind(other)),
            );
            None
        }
        None => {
            violate("timestamp", "is required".to_string());
            None
        }
    };

    let kind = match object.get("kind") {
        None | Some(Value::Null) => Some(MessageKind::Event),
        Some(Value::String(raw)) => match raw.parse::<MessageKind>() {
            Ok(kind) => Some(kind),
            Err(e) => {
                violate("kind", e);
                None
            }
        },
        Some(other) => {
            violate("kind", format!("must be a string, got {}", json_kind(other)));
            None
        }
    };

    let correlation_id = match object.get("correlationId") {
        None | Some(Value::Null) => None,
        Some(Value::String(raw)) => match CorrelationId::parse(raw) {
            Ok(id) => Some(id),
            Err(e) => {
                violate("correlationId", e.violation.to_string());
                None
            }
        },
        Some(other) => {
            violate(
                "correlationId",
                format!("must be a string, got {}", json_kind(other)),
            );
            None
        }
    };

    if let Some(kind) = kind {
        let absent = matches!(object.get("correlationId"), None | Some(Value::Null));
        if kind.requires_correlation() && absent {
            violate("correlationId", format!("is required for {} messages", kind));
        }
    }

    match (id, from, to, message_type, payload, timestamp, kind) {
        (Some(id), Some(from), Some(to), Some(message_type), Some(payload), Some(timestamp), Some(kind))
            if violations.is_empty() =>
        {
            Ok(Envelope {
                id,
                from,
                to,
                message_type,
                payload,
                timestamp,
                kind,
                correlation_id,
            })
        }
        _ => Err(ValidationError { violations }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Envelope plus delivery metadata, derived without touching the envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedMessage {
    envelope: Envelope,
    pub priority: Priority,
    pub retry_count: u32,
    pub max_retries: u32,
    pub delivery_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl ExtendedMessage {
    pub fn from_envelope(envelope: Envelope, max_retries: u32) -> Self {
        Self {
            envelope,
            priority: Priority::Normal,
            retry_count: 0,
            max_retries,
            delivery_attempts: 0,
            created_at: Utc::now(),
            delivered_at: None,
            last_error: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Whether another retry is allowed after a failed attempt.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn record_attempt(&mut self) {
        self.delivery_attempts += 1;
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    pub fn record_retry(&mut self) {
        self.retry_count += 1;
    }

    pub fn mark_delivered(&mut self) {
        self.delivered_at = Some(Utc::now());
        self.last_error = None;
    }
}
