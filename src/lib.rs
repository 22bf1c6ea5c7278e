//! agentmesh library root.

pub mod agent;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod system;

pub use agent::{handler_fn, request_handler_fn, Agent, AgentState, MessageHandler, RequestHandler};
pub use cli::Commands;
pub use config::{load_config, MessagingConfig};
pub use core::{DeliveryResult, RoutingResult};
pub use error::{Error, Result};
pub use protocol::{
    create_agent_id, create_message_pattern, create_message_type, validate_message, AgentId,
    Envelope, MessagePattern, MessageType, Payload,
};
pub use system::MessagingSystem;
