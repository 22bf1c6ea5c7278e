//! Identifiers and their validating factories.
//!
//! Every raw string that becomes a domain identifier passes through one of the
//! `create_*` functions here. Message patterns are restricted to literal
//! segments and bare `*` wildcards so nothing user-supplied is ever compiled
//! into a backtracking regex.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{IdentifierError, IdentifierKind, IdentifierViolation};

/// Maximum length of a message type or pattern.
pub const MAX_IDENTIFIER_LENGTH: usize = 100;

/// Maximum number of dot-separated segments in a pattern.
pub const MAX_PATTERN_SEGMENTS: usize = 5;

/// Wildcard segment matching exactly one segment.
pub const WILDCARD: &str = "*";

/// Fixed charset for one literal segment. Never built from input.
static SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_\-]+$").expect("static segment regex"));

const REGEX_METACHARACTERS: &[char] = &[
    '*', '?', '+', '(', ')', '[', ']', '{', '}', '^', '$', '|', '\\',
];

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh UUIDv4.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse an existing identifier.
            pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Err(IdentifierError::new($kind, raw, IdentifierViolation::Empty));
                }
                Uuid::parse_str(trimmed)
                    .map(Self)
                    .map_err(|_| IdentifierError::new($kind, raw, IdentifierViolation::NotAUuid))
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_identifier!(
    /// Identifies an agent for its whole lifetime.
    AgentId,
    IdentifierKind::AgentId
);
uuid_identifier!(
    /// Identifies one envelope.
    MessageId,
    IdentifierKind::MessageId
);
uuid_identifier!(
    /// Pairs a request with its response.
    CorrelationId,
    IdentifierKind::CorrelationId
);

/// Create an agent id, either fresh or rehydrated from a UUID seed.
pub fn create_agent_id(seed: Option<&str>) -> Result<AgentId, IdentifierError> {
    match seed {
        None => Ok(AgentId::new()),
        Some(raw) => AgentId::parse(raw),
    }
}

/// Validated dot-segmented message type such as `order.created`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MessageType(String);

impl MessageType {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    pub fn segment_count(&self) -> usize {
        self.segments().count()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MessageType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validated subscription pattern such as `order.*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MessagePattern(String);

impl MessagePattern {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    pub fn has_wildcard(&self) -> bool {
        self.segments().any(|s| s == WILDCARD)
    }
}

impl fmt::Display for MessagePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MessagePattern {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validate and wrap a message type.
pub fn create_message_type(raw: &str) -> Result<MessageType, IdentifierError> {
    check_common(IdentifierKind::MessageType, raw)?;

    let bad = disallowed_characters(raw);
    if !bad.is_empty() {
        return Err(IdentifierError::new(
            IdentifierKind::MessageType,
            raw,
            IdentifierViolation::DisallowedCharacters(bad),
        ));
    }

    for segment in raw.split('.') {
        if segment.is_empty() {
            return Err(IdentifierError::new(
                IdentifierKind::MessageType,
                raw,
                IdentifierViolation::EmptySegment,
            ));
        }
        if !SEGMENT_RE.is_match(segment) {
            return Err(IdentifierError::new(
                IdentifierKind::MessageType,
                raw,
                IdentifierViolation::RegexMetacharacter(segment.to_string()),
            ));
        }
    }

    Ok(MessageType(raw.to_string()))
}

/// Validate and wrap a subscription pattern.
pub fn create_message_pattern(raw: &str) -> Result<MessagePattern, IdentifierError> {
    check_common(IdentifierKind::MessagePattern, raw)?;

    let bad = disallowed_characters(raw);
    if !bad.is_empty() {
        return Err(IdentifierError::new(
            IdentifierKind::MessagePattern,
            raw,
            IdentifierViolation::DisallowedCharacters(bad),
        ));
    }

    let segments: Vec<&str> = raw.split('.').collect();
    if segments.len() > MAX_PATTERN_SEGMENTS {
        return Err(IdentifierError::new(
            IdentifierKind::MessagePattern,
            raw,
            IdentifierViolation::TooManySegments {
                segments: segments.len(),
                max: MAX_PATTERN_SEGMENTS,
            },
        ));
    }

    for segment in segments {
        if segment.is_empty() {
            return Err(IdentifierError::new(
                IdentifierKind::MessagePattern,
                raw,
                IdentifierViolation::EmptySegment,
            ));
        }
        if segment == WILDCARD {
            continue;
        }
        if !SEGMENT_RE.is_match(segment) {
            return Err(IdentifierError::new(
                IdentifierKind::MessagePattern,
                raw,
                IdentifierViolation::RegexMetacharacter(segment.to_string()),
            ));
        }
    }

    Ok(MessagePattern(raw.to_string()))
}

fn check_common(kind: IdentifierKind, raw: &str) -> Result<(), IdentifierError> {
    if raw.is_empty() {
        return Err(IdentifierError::new(kind, raw, IdentifierViolation::Empty));
    }
    let length = raw.chars().count();
    if length > MAX_IDENTIFIER_LENGTH {
        return Err(IdentifierError::new(
            kind,
            raw,
            IdentifierViolation::TooLong {
                length,
                max: MAX_IDENTIFIER_LENGTH,
            },
        ));
    }
    Ok(())
}

/// Characters outside the charset. Regex metacharacters are reported
/// per-segment instead so the error names the offending segment.
fn disallowed_characters(raw: &str) -> Vec<char> {
    let mut bad = Vec::new();
    for c in raw.chars() {
        let allowed = c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.');
        if !allowed && !REGEX_METACHARACTERS.contains(&c) && !bad.contains(&c) {
            bad.push(c);
        }
    }
    bad
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_id_fresh_and_seeded() {
        let a = create_agent_id(None).unwrap();
        let b = create_agent_id(None).unwrap();
        assert_ne!(a, b);

        let seeded = create_agent_id(Some(&a.to_string())).unwrap();
        assert_eq!(seeded, a);

        let err = create_agent_id(Some("not-a-uuid")).unwrap_err();
        assert_eq!(err.violation, IdentifierViolation::NotAUuid);

        let err = create_agent_id(Some("")).unwrap_err();
        assert_eq!(err.violation, IdentifierViolation::Empty);
    }

    #[test]
    fn test_message_type_valid() {
        let t = create_message_type("order.created").unwrap();
        assert_eq!(t.as_str(), "order.created");
        assert_eq!(t.segment_count(), 2);

        assert!(create_message_type("ping").is_ok());
        assert!(create_message_type("user_profile.updated-v2").is_ok());
    }

    #[test]
    fn test_message_type_rejections() {
        assert_eq!(
            create_message_type("").unwrap_err().violation,
            IdentifierViolation::Empty
        );
        assert!(matches!(
            create_message_type(&"a".repeat(101)).unwrap_err().violation,
            IdentifierViolation::TooLong { length: 101, .. }
        ));
        assert!(matches!(
            create_message_type("order created").unwrap_err().violation,
            IdentifierViolation::DisallowedCharacters(_)
        ));
        assert!(matches!(
            create_message_type("order.*").unwrap_err().violation,
            IdentifierViolation::RegexMetacharacter(_)
        ));
        assert_eq!(
            create_message_type("order..created").unwrap_err().violation,
            IdentifierViolation::EmptySegment
        );
        assert_eq!(
            create_message_type(".order").unwrap_err().violation,
            IdentifierViolation::EmptySegment
        );
    }

    #[test]
    fn test_pattern_segment_limit() {
        assert!(create_message_pattern("a.b.c.d.e").is_ok());
        assert!(matches!(
            create_message_pattern("a.b.c.d.e.f").unwrap_err().violation,
            IdentifierViolation::TooManySegments { segments: 6, max: 5 }
        ));
    }

    #[test]
    fn test_pattern_wildcards() {
        assert!(create_message_pattern("*").is_ok());
        assert!(create_message_pattern("order.*").is_ok());
        assert!(create_message_pattern("*.created.*").is_ok());

        for raw in ["order*", "**", "a.b*c", "a+", "(a)", "a.[b]", "a|b", "^a$", "a?"] {
            let err = create_message_pattern(raw).unwrap_err();
            assert!(
                matches!(err.violation, IdentifierViolation::RegexMetacharacter(_)),
                "{} should be rejected as metacharacter, got {:?}",
                raw,
                err.violation
            );
        }
    }

    #[test]
    fn test_pattern_disallowed_characters() {
        let err = create_message_pattern("order/created").unwrap_err();
        assert_eq!(
            err.violation,
            IdentifierViolation::DisallowedCharacters(vec!['/'])
        );
        assert!(create_message_pattern("ordér").is_err());
    }

    #[test]
    fn test_length_limit_counts_characters() {
        let exactly = "a".repeat(MAX_IDENTIFIER_LENGTH);
        assert!(create_message_type(&exactly).is_ok());
        assert!(create_message_pattern(&exactly).is_ok());
    }
}
