//! Agent directory: maps agent ids to their inbound endpoints.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::envelope::Envelope;
use crate::protocol::ids::AgentId;

/// Inbound side of an agent, invoked once per delivery attempt.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Handle one envelope addressed to this endpoint.
    async fn deliver(&self, envelope: &Envelope) -> anyhow::Result<()>;
}

/// Delivery failure that no retry can fix, such as a destroyed recipient.
///
/// Endpoints return it inside their `anyhow::Error`; the delivery engine stops
/// retrying when it finds one.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct Undeliverable(pub String);

/// Registered endpoints by agent id.
#[derive(Default)]
pub struct AgentDirectory {
    endpoints: RwLock<HashMap<AgentId, Arc<dyn Endpoint>>>,
}

impl AgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an endpoint, replacing any previous one.
    pub fn attach(&self, agent: AgentId, endpoint: Arc<dyn Endpoint>) {
        self.endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(agent, endpoint);
    }

    pub fn detach(&self, agent: AgentId) -> bool {
        self.endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&agent)
            .is_some()
    }

    pub fn get(&self, agent: AgentId) -> Option<Arc<dyn Endpoint>> {
        self.endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&agent)
            .cloned()
    }

    pub fn contains(&self, agent: AgentId) -> bool {
        self.endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&agent)
    }

    pub fn len(&self) -> usize {
        self.endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
