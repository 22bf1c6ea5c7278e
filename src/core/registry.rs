//! Subscription registry: the many-to-many relation between agents and patterns.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use super::pattern::PatternMatcher;
use crate::error::{Error, Result};
use crate::protocol::ids::{AgentId, MessagePattern, MessageType};

/// Default per-agent subscription limit.
pub const DEFAULT_SUBSCRIPTION_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub registered_agents: usize,
    pub total_subscriptions: usize,
    pub unique_patterns: usize,
}

#[derive(Default)]
struct RegistryState {
    agents: HashMap<AgentId, BTreeSet<MessagePattern>>,
    index: HashMap<MessagePattern, BTreeSet<AgentId>>,
}

/// Owns every subscription. Agents only ever hold pattern strings.
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
    matcher: Arc<PatternMatcher>,
    subscription_limit: usize,
}

impl SubscriptionRegistry {
    pub fn new(matcher: Arc<PatternMatcher>, subscription_limit: usize) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            matcher,
            subscription_limit,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register_agent(&self, agent: AgentId) {
        self.write().agents.entry(agent).or_default();
    }

    /// Remove the agent and all of its subscriptions. Returns the patterns removed.
    pub fn unregister_agent(&self, agent: AgentId) -> Vec<MessagePattern> {
        let mut state = self.write();
        let Some(patterns) = state.agents.remove(&agent) else {
            return Vec::new();
        };
        for pattern in &patterns {
            remove_from_index(&mut state.index, pattern, agent);
        }
        tracing::debug!(agent = %agent, removed = patterns.len(), "Unregistered agent");
        patterns.into_iter().collect()
    }

    pub fn is_registered(&self, agent: AgentId) -> bool {
        self.read().agents.contains_key(&agent)
    }

    /// Add a subscription. `Ok(false)` when the agent already had it.
    ///
    /// An unregistered agent is registered first.
    pub fn subscribe(&self, agent: AgentId, pattern: MessagePattern) -> Result<bool> {
        let mut state = self.write();
        let patterns = state.agents.entry(agent).or_default();
        if patterns.contains(&pattern) {
            return Ok(false);
        }
        if patterns.len() >= self.subscription_limit {
            tracing::warn!(
                agent = %agent,
                pattern = %pattern,
                limit = self.subscription_limit,
                "Subscription limit reached"
            );
            return Err(Error::ResourceLimit {
                resource: format!("subscriptions for agent {}", agent),
                limit: self.subscription_limit,
            });
        }
        patterns.insert(pattern.clone());
        state.index.entry(pattern).or_default().insert(agent);
        Ok(true)
    }

    pub fn unsubscribe(&self, agent: AgentId, pattern: &MessagePattern) -> bool {
        let mut state = self.write();
        let removed = state
            .agents
            .get_mut(&agent)
            .map(|patterns| patterns.remove(pattern))
            .unwrap_or(false);
        if removed {
            remove_from_index(&mut state.index, pattern, agent);
        }
        removed
    }

    /// Agents with at least one pattern matching `message_type`, sorted and deduplicated.
    pub fn get_subscribers(&self, message_type: &MessageType) -> Vec<AgentId> {
        let state = self.read();
        let mut subscribers = BTreeSet::new();
        for (pattern, agents) in &state.index {
            if self.matcher.matches(pattern, message_type) {
                subscribers.extend(agents.iter().copied());
            }
        }
        subscribers.into_iter().collect()
    }

    pub fn get_all_active_agents(&self) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self.read().agents.keys().copied().collect();
        agents.sort();
        agents
    }

    pub fn subscriptions_of(&self, agent: AgentId) -> Vec<MessagePattern> {
        self.read()
            .agents
            .get(&agent)
            .map(|patterns| patterns.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscription_limit(&self) -> usize {
        self.subscription_limit
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.read();
        RegistryStats {
            registered_agents: state.agents.len(),
            total_subscriptions: state.agents.values().map(BTreeSet::len).sum(),
            unique_patterns: state.index.len(),
        }
    }
}

fn remove_from_index(
    index: &mut HashMap<MessagePattern, BTreeSet<AgentId>>,
    pattern: &MessagePattern,
    agent: AgentId,
) {
    if let Some(agents) = index.get_mut(pattern) {
        agents.remove(&agent);
        if agents.is_empty() {
            index.remove(pattern);
        }
    }
}
