//! Message classification shared by envelopes and delivery metadata.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What an envelope is for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// One-way publish or broadcast.
    #[default]
    Event,
    /// Expects a correlated response.
    Request,
    /// Answers a request; carries the request's correlation id.
    Response,
}

impl MessageKind {
    pub fn requires_correlation(&self) -> bool {
        matches!(self, MessageKind::Request | MessageKind::Response)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Event => write!(f, "event"),
            MessageKind::Request => write!(f, "request"),
            MessageKind::Response => write!(f, "response"),
        }
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(MessageKind::Event),
            "request" => Ok(MessageKind::Request),
            "response" => Ok(MessageKind::Response),
            _ => Err(format!("unknown message kind: {}", s)),
        }
    }
}

/// Message priority levels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Urgent = 3,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Urgent => write!(f, "urgent"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("request".parse::<MessageKind>().unwrap(), MessageKind::Request);
        assert!("shout".parse::<MessageKind>().is_err());
        assert!(MessageKind::Response.requires_correlation());
        assert!(!MessageKind::Event.requires_correlation());
    }
}
