//! Agent lifecycle registration and the memory access audit trail.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::protocol::ids::AgentId;

/// Audit entries kept before the oldest are dropped.
pub const AUDIT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryOperation {
    Remember,
    Recall,
    Forget,
    Clear,
}

impl fmt::Display for MemoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryOperation::Remember => write!(f, "remember"),
            MemoryOperation::Recall => write!(f, "recall"),
            MemoryOperation::Forget => write!(f, "forget"),
            MemoryOperation::Clear => write!(f, "clear"),
        }
    }
}

/// One audited memory access.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryAccess {
    pub agent_id: AgentId,
    pub operation: MemoryOperation,
    pub key: Option<String>,
    pub hit: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStats {
    pub registered_agents: usize,
    pub total_registrations: u64,
    pub total_memory_accesses: u64,
}

#[derive(Default)]
struct MonitorState {
    agents: HashMap<AgentId, DateTime<Utc>>,
    audit: VecDeque<MemoryAccess>,
    total_registrations: u64,
    total_accesses: u64,
}

#[derive(Default)]
pub struct AgentMonitor {
    state: Mutex<MonitorState>,
}

impl AgentMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, agent: AgentId) {
        let mut state = self.lock();
        if state.agents.insert(agent, Utc::now()).is_none() {
            state.total_registrations += 1;
            tracing::debug!(agent = %agent, "Agent registered");
        }
    }

    pub fn unregister(&self, agent: AgentId) -> bool {
        let removed = self.lock().agents.remove(&agent).is_some();
        if removed {
            tracing::debug!(agent = %agent, "Agent unregistered");
        }
        removed
    }

    pub fn is_registered(&self, agent: AgentId) -> bool {
        self.lock().agents.contains_key(&agent)
    }

    pub fn registered_agents(&self) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self.lock().agents.keys().copied().collect();
        agents.sort();
        agents
    }

    pub fn record_access(
        &self,
        agent: AgentId,
        operation: MemoryOperation,
        key: Option<&str>,
        hit: bool,
    ) {
        let mut state = self.lock();
        if state.audit.len() == AUDIT_CAPACITY {
            state.audit.pop_front();
        }
        state.audit.push_back(MemoryAccess {
            agent_id: agent,
            operation,
            key: key.map(str::to_string),
            hit,
            at: Utc::now(),
        });
        state.total_accesses += 1;
    }

    /// Retained audit entries for one agent, oldest first.
    pub fn accesses_for(&self, agent: AgentId) -> Vec<MemoryAccess> {
        self.lock()
            .audit
            .iter()
            .filter(|a| a.agent_id == agent)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> MonitorStats {
        let state = self.lock();
        MonitorStats {
            registered_agents: state.agents.len(),
            total_registrations: state.total_registrations,
            total_memory_accesses: state.total_accesses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_is_idempotent() {
        let monitor = AgentMonitor::new();
        let agent = AgentId::new();
        monitor.register(agent);
        monitor.register(agent);
        assert_eq!(monitor.stats().total_registrations, 1);
        assert!(monitor.unregister(agent));
        assert!(!monitor.unregister(agent));
        assert!(!monitor.is_registered(agent));
    }

    #[test]
    fn test_audit_is_bounded() {
        let monitor = AgentMonitor::new();
        let agent = AgentId::new();
        for i in 0..(AUDIT_CAPACITY + 5) {
            monitor.record_access(agent, MemoryOperation::Recall, Some(&i.to_string()), false);
        }
        let recent = monitor.accesses_for(agent);
        assert_eq!(recent.len(), AUDIT_CAPACITY);
        assert_eq!(recent[0].key.as_deref(), Some("5"));
        assert_eq!(monitor.stats().total_memory_accesses, (AUDIT_CAPACITY + 5) as u64);
    }

    #[test]
    fn test_accesses_for_filters_by_agent() {
        let monitor = AgentMonitor::new();
        let a = AgentId::new();
        let b = AgentId::new();
        monitor.record_access(a, MemoryOperation::Remember, Some("k"), true);
        monitor.record_access(b, MemoryOperation::Clear, None, true);
        let entries = monitor.accesses_for(a);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, MemoryOperation::Remember);
    }
}
