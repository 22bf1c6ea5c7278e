//! Error types for agentmesh.

use std::fmt;

use thiserror::Error;

use crate::protocol::ids::{AgentId, CorrelationId};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(#[from] IdentifierError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Resource limit exceeded: {resource} (limit {limit})")]
    ResourceLimit { resource: String, limit: usize },

    #[error("Agent {0} has been destroyed")]
    AgentDestroyed(AgentId),

    #[error("Messaging is not enabled for agent {0}")]
    MessagingNotEnabled(AgentId),

    #[error("Request {correlation_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        correlation_id: CorrelationId,
        timeout_ms: u64,
    },

    #[error("Request {0} was cancelled")]
    RequestCancelled(CorrelationId),

    #[error("Routing failure: {0}")]
    Routing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Precondition violations are programming errors and surface immediately.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::AgentDestroyed(_) | Error::MessagingNotEnabled(_)
        )
    }
}

/// Which kind of identifier failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    AgentId,
    MessageId,
    CorrelationId,
    MessageType,
    MessagePattern,
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierKind::AgentId => write!(f, "agent id"),
            IdentifierKind::MessageId => write!(f, "message id"),
            IdentifierKind::CorrelationId => write!(f, "correlation id"),
            IdentifierKind::MessageType => write!(f, "message type"),
            IdentifierKind::MessagePattern => write!(f, "message pattern"),
        }
    }
}

/// Rule an identifier broke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifierViolation {
    Empty,
    TooLong { length: usize, max: usize },
    DisallowedCharacters(Vec<char>),
    EmptySegment,
    TooManySegments { segments: usize, max: usize },
    RegexMetacharacter(String),
    NotAUuid,
}

impl fmt::Display for IdentifierViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierViolation::Empty => write!(f, "must not be empty"),
            IdentifierViolation::TooLong { length, max } => {
                write!(f, "length {} exceeds maximum of {}", length, max)
            }
            IdentifierViolation::DisallowedCharacters(chars) => {
                let listed: String = chars.iter().collect();
                write!(f, "contains disallowed characters {:?}", listed)
            }
            IdentifierViolation::EmptySegment => write!(f, "contains an empty segment"),
            IdentifierViolation::TooManySegments { segments, max } => {
                write!(f, "has {} segments, maximum is {}", segments, max)
            }
            IdentifierViolation::RegexMetacharacter(segment) => write!(
                f,
                "segment {:?} uses a wildcard or metacharacter; only a bare '*' segment is allowed",
                segment
            ),
            IdentifierViolation::NotAUuid => write!(f, "is not a valid UUID"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} {value:?} {violation}")]
pub struct IdentifierError {
    pub kind: IdentifierKind,
    pub value: String,
    pub violation: IdentifierViolation,
}

impl IdentifierError {
    pub(crate) fn new(kind: IdentifierKind, value: &str, violation: IdentifierViolation) -> Self {
        // Keep oversized input out of logs and error messages.
        let value = if value.chars().count() > 120 {
            let head: String = value.chars().take(117).collect();
            format!("{}...", head)
        } else {
            value.to_string()
        };
        Self {
            kind,
            value,
            violation,
        }
    }
}

/// One violated field of a candidate envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Envelope validation failure listing every violated field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            violations: vec![FieldViolation {
                field: field.into(),
                message: message.into(),
            }],
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.violations.iter().map(|v| v.to_string()).collect();
        write!(f, "{}", parts.join("; "))
    }
}
