//! Message protocol for agentmesh.
//!
//! - Validated identifiers (agents, messages, correlations, types, patterns)
//! - Message envelopes with correlation IDs
//! - Delivery metadata attached to envelopes in flight

pub mod envelope;
pub mod ids;
pub mod types;

pub use envelope::{into_payload, validate_message, Envelope, ExtendedMessage, Payload};
pub use ids::{
    create_agent_id, create_message_pattern, create_message_type, AgentId, CorrelationId,
    MessageId, MessagePattern, MessageType,
};
pub use types::{MessageKind, Priority};
