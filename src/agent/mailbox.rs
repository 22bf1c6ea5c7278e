//! Bounded in-memory mailbox of delivered and sent envelopes.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::protocol::envelope::Envelope;
use crate::protocol::ids::AgentId;

/// Default envelopes kept per direction before the oldest are pruned.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1000;

/// An agent's mailbox.
#[derive(Debug, Clone)]
pub struct AgentMailbox {
    agent_id: AgentId,
    capacity: usize,
    /// Received envelopes, oldest first.
    inbox: VecDeque<Envelope>,
    /// Sent envelopes, oldest first.
    outbox: VecDeque<Envelope>,
    total_received: u64,
    total_sent: u64,
    pruned: u64,
    last_activity: DateTime<Utc>,
}

impl AgentMailbox {
    pub fn new(agent_id: AgentId, capacity: usize) -> Self {
        Self {
            agent_id,
            capacity: capacity.max(1),
            inbox: VecDeque::new(),
            outbox: VecDeque::new(),
            total_received: 0,
            total_sent: 0,
            pruned: 0,
            last_activity: Utc::now(),
        }
    }

    /// Record a delivered envelope.
    pub fn deliver(&mut self, envelope: Envelope) {
        push_bounded(&mut self.inbox, envelope, self.capacity, &mut self.pruned);
        self.total_received += 1;
        self.last_activity = Utc::now();
    }

    /// Record an envelope this agent sent.
    pub fn record_sent(&mut self, envelope: Envelope) {
        push_bounded(&mut self.outbox, envelope, self.capacity, &mut self.pruned);
        self.total_sent += 1;
        self.last_activity = Utc::now();
    }

    pub fn inbox(&self) -> impl Iterator<Item = &Envelope> {
        self.inbox.iter()
    }

    pub fn outbox(&self) -> impl Iterator<Item = &Envelope> {
        self.outbox.iter()
    }

    /// Get messages from a specific sender.
    pub fn from_agent(&self, agent: AgentId) -> Vec<&Envelope> {
        self.inbox.iter().filter(|e| e.from() == agent).collect()
    }

    /// Remove and return every received envelope.
    pub fn drain_inbox(&mut self) -> Vec<Envelope> {
        self.last_activity = Utc::now();
        self.inbox.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.inbox.clear();
        self.outbox.clear();
    }

    /// Get mailbox statistics.
    pub fn stats(&self) -> MailboxStats {
        MailboxStats {
            agent_id: self.agent_id,
            capacity: self.capacity,
            inbox_count: self.inbox.len(),
            outbox_count: self.outbox.len(),
            total_received: self.total_received,
            total_sent: self.total_sent,
            pruned: self.pruned,
            last_activity: self.last_activity,
        }
    }
}

fn push_bounded(queue: &mut VecDeque<Envelope>, envelope: Envelope, capacity: usize, pruned: &mut u64) {
    if queue.len() >= capacity {
        queue.pop_front();
        *pruned += 1;
    }
    queue.push_back(envelope);
}

/// Mailbox statistics.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MailboxStats {
    pub agent_id: AgentId,
    pub capacity: usize,
    pub inbox_count: usize,
    pub outbox_count: usize,
    pub total_received: u64,
    pub total_sent: u64,
    pub pruned: u64,
    pub last_activity: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::envelope::Payload;
    use crate::protocol::ids::create_message_type;

    fn envelope(from: AgentId, to: AgentId, message_type: &str) -> Envelope {
        Envelope::event(from, to, create_message_type(message_type).unwrap(), Payload::new())
    }

    #[test]
    fn test_deliver_message() {
        let owner = AgentId::new();
        let sender = AgentId::new();
        let mut mailbox = AgentMailbox::new(owner, 10);

        mailbox.deliver(envelope(sender, owner, "task.assigned"));
        mailbox.deliver(envelope(AgentId::new(), owner, "ping"));

        let stats = mailbox.stats();
        assert_eq!(stats.inbox_count, 2);
        assert_eq!(stats.total_received, 2);
        assert_eq!(mailbox.from_agent(sender).len(), 1);
    }

    #[test]
    fn test_prunes_oldest() {
        let owner = AgentId::new();
        let mut mailbox = AgentMailbox::new(owner, 2);
        for t in ["a", "b", "c"] {
            mailbox.deliver(envelope(AgentId::new(), owner, t));
        }
        let types: Vec<&str> = mailbox.inbox().map(|e| e.message_type().as_str()).collect();
        assert_eq!(types, vec!["b", "c"]);
        assert_eq!(mailbox.stats().pruned, 1);
        assert_eq!(mailbox.stats().total_received, 3);
    }

    #[test]
    fn test_drain_and_sent() {
        let owner = AgentId::new();
        let mut mailbox = AgentMailbox::new(owner, 4);
        mailbox.deliver(envelope(AgentId::new(), owner, "a"));
        mailbox.record_sent(envelope(owner, owner, "b"));

        assert_eq!(mailbox.drain_inbox().len(), 1);
        assert_eq!(mailbox.stats().inbox_count, 0);
        assert_eq!(mailbox.outbox().count(), 1);
        assert_eq!(mailbox.stats().total_sent, 1);
    }
}
