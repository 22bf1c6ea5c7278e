//! Private key/value memory of one agent, with every access audited.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::core::monitor::{AgentMonitor, MemoryOperation};
use crate::logging::AUDIT_TARGET;
use crate::protocol::ids::AgentId;

/// Memory entry.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryEntry {
    fn new(value: Value) -> Self {
        let now = Utc::now();
        Self {
            value,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Key/value store never shared across agents.
pub struct AgentMemory {
    agent: AgentId,
    entries: Mutex<HashMap<String, MemoryEntry>>,
    monitor: Arc<AgentMonitor>,
}

impl AgentMemory {
    pub fn new(agent: AgentId, monitor: Arc<AgentMonitor>) -> Self {
        Self {
            agent,
            entries: Mutex::new(HashMap::new()),
            monitor,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, MemoryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn audit(&self, operation: MemoryOperation, key: Option<&str>, hit: bool) {
        tracing::info!(
            target: AUDIT_TARGET,
            agent = %self.agent,
            operation = %operation,
            key = key.unwrap_or(""),
            hit,
            "Memory access"
        );
        self.monitor.record_access(self.agent, operation, key, hit);
    }

    /// Store a value. Returns true when an existing entry was replaced.
    pub fn set(&self, key: &str, value: Value) -> bool {
        let replaced = {
            let mut entries = self.lock();
            match entries.get_mut(key) {
                Some(entry) => {
                    entry.value = value;
                    entry.updated_at = Utc::now();
                    true
                }
                None => {
                    entries.insert(key.to_string(), MemoryEntry::new(value));
                    false
                }
            }
        };
        self.audit(MemoryOperation::Remember, Some(key), replaced);
        replaced
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let value = self.lock().get(key).map(|e| e.value.clone());
        self.audit(MemoryOperation::Recall, Some(key), value.is_some());
        value
    }

    pub fn entry(&self, key: &str) -> Option<MemoryEntry> {
        self.lock().get(key).cloned()
    }

    pub fn delete(&self, key: &str) -> bool {
        let removed = self.lock().remove(key).is_some();
        self.audit(MemoryOperation::Forget, Some(key), removed);
        removed
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn clear(&self) -> usize {
        let cleared = {
            let mut entries = self.lock();
            let n = entries.len();
            entries.clear();
            n
        };
        self.audit(MemoryOperation::Clear, None, cleared > 0);
        cleared
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_get_delete() {
        let monitor = Arc::new(AgentMonitor::new());
        let agent = AgentId::new();
        let memory = AgentMemory::new(agent, Arc::clone(&monitor));

        assert!(!memory.set("count", json!(1)));
        assert!(memory.set("count", json!(2)));
        assert_eq!(memory.get("count"), Some(json!(2)));
        assert_eq!(memory.get("missing"), None);
        assert!(memory.delete("count"));
        assert!(!memory.delete("count"));
        assert!(memory.is_empty());

        let ops: Vec<MemoryOperation> = monitor
            .accesses_for(agent)
            .into_iter()
            .map(|a| a.operation)
            .collect();
        assert_eq!(ops.len(), 6);
        assert_eq!(ops[0], MemoryOperation::Remember);
        assert_eq!(ops[5], MemoryOperation::Forget);
    }

    #[test]
    fn test_updated_at_moves() {
        let memory = AgentMemory::new(AgentId::new(), Arc::new(AgentMonitor::new()));
        memory.set("k", json!("a"));
        let first = memory.entry("k").unwrap();
        memory.set("k", json!("b"));
        let second = memory.entry("k").unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at >= first.updated_at);
    }

    #[test]
    fn test_keys_sorted_and_clear() {
        let memory = AgentMemory::new(AgentId::new(), Arc::new(AgentMonitor::new()));
        memory.set("b", json!(null));
        memory.set("a", json!(null));
        assert_eq!(memory.keys(), vec!["a", "b"]);
        assert_eq!(memory.clear(), 2);
        assert!(memory.keys().is_empty());
    }
}
