//! Agent facade: private memory, handlers and opt-in messaging.
//!
//! An [`Agent`] is a cheap handle; clones refer to the same actor. Messaging is
//! attached with [`Agent::enable_messaging`], after which the agent has an
//! endpoint in the system's directory and can publish, broadcast and request.

pub mod handler;
pub mod mailbox;
pub mod memory;

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub use handler::{handler_fn, request_handler_fn, MessageHandler, RequestHandler};
pub use mailbox::{AgentMailbox, MailboxStats};
pub use memory::{AgentMemory, MemoryEntry};

use crate::core::directory::{Endpoint, Undeliverable};
use crate::core::monitor::AgentMonitor;
use crate::core::router::{agent_component, RoutingResult};
use crate::error::{Error, Result, ValidationError};
use crate::protocol::envelope::{into_payload, Envelope, ExtendedMessage};
use crate::protocol::types::Priority;
use crate::protocol::ids::{
    create_message_pattern, create_message_type, AgentId, CorrelationId, MessageId,
    MessagePattern,
};
use crate::system::MessagingSystem;
use handler::Handlers;

/// Lifecycle of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Constructed and registered with monitoring, not yet used.
    Created,
    Active,
    Destroyed,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentState::Created => write!(f, "created"),
            AgentState::Active => write!(f, "active"),
            AgentState::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Optional filter applied to broadcast recipients.
pub type BroadcastFilter<'a> = &'a (dyn Fn(AgentId) -> bool + Sync);

enum Messaging {
    Disabled,
    Enabled(Arc<MessagingSystem>),
}

struct AgentInner {
    id: AgentId,
    state: Mutex<AgentState>,
    memory: AgentMemory,
    mailbox: Mutex<AgentMailbox>,
    handlers: Mutex<Handlers>,
    /// Message id to the number of handlers that already ran for a delivery
    /// that failed part way. A retry resumes after them.
    progress: Mutex<LruCache<MessageId, usize>>,
    messaging: RwLock<Messaging>,
    monitor: Arc<AgentMonitor>,
}

/// Partially handled deliveries remembered per agent.
const PROGRESS_CAPACITY: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AgentInner {
    /// Fail on a destroyed agent; the first successful use activates it.
    fn ensure_alive(&self) -> Result<()> {
        let mut state = lock(&self.state);
        match *state {
            AgentState::Destroyed => Err(Error::AgentDestroyed(self.id)),
            AgentState::Created => {
                *state = AgentState::Active;
                Ok(())
            }
            AgentState::Active => Ok(()),
        }
    }

    fn system(&self) -> Result<Arc<MessagingSystem>> {
        match &*self.messaging.read().unwrap_or_else(PoisonError::into_inner) {
            Messaging::Enabled(system) => Ok(Arc::clone(system)),
            Messaging::Disabled => Err(Error::MessagingNotEnabled(self.id)),
        }
    }

    /// Inbound path for every envelope delivered to this agent.
    ///
    /// Handlers that succeeded are not run again when the engine retries a
    /// delivery that failed in a later handler.
    async fn receive(&self, envelope: &Envelope) -> anyhow::Result<()> {
        let system = self
            .ensure_alive()
            .and_then(|()| self.system())
            .map_err(|e| Undeliverable(e.to_string()))?;

        if envelope.is_response() {
            system.correlation().resolve(envelope);
            lock(&self.mailbox).deliver(envelope.clone());
            return Ok(());
        }

        let (message_handlers, request_handler) = {
            let handlers = lock(&self.handlers);
            let matcher = system.matcher();
            let message_type = envelope.message_type();
            let message_handlers: Vec<Arc<dyn MessageHandler>> = handlers
                .messages
                .iter()
                .filter(|(pattern, _)| matcher.matches(pattern, message_type))
                .map(|(_, handler)| Arc::clone(handler))
                .collect();
            let request_handler = if envelope.is_request() {
                handlers
                    .requests
                    .iter()
                    .find(|(pattern, _)| matcher.matches(pattern, message_type))
                    .map(|(_, handler)| Arc::clone(handler))
            } else {
                None
            };
            (message_handlers, request_handler)
        };

        let done = lock(&self.progress).peek(&envelope.id()).copied().unwrap_or(0);
        for (index, handler) in message_handlers.iter().enumerate().skip(done) {
            if let Err(e) = handler.handle(envelope).await {
                lock(&self.progress).put(envelope.id(), index);
                return Err(e);
            }
        }

        if let Some(handler) = request_handler {
            let payload = match handler.handle(envelope).await {
                Ok(payload) => payload,
                Err(e) => {
                    lock(&self.progress).put(envelope.id(), message_handlers.len());
                    return Err(e);
                }
            };
            if let Some(response) = envelope.create_response(self.id, payload) {
                let result = system.router().route_to(&response, &[response.to()]).await;
                if !result.success {
                    tracing::warn!(
                        agent = %self.id,
                        correlation_id = ?response.correlation_id(),
                        error = ?result.error,
                        "Failed to route response"
                    );
                }
                lock(&self.mailbox).record_sent(response);
            }
        }

        lock(&self.progress).pop(&envelope.id());
        lock(&self.mailbox).deliver(envelope.clone());
        Ok(())
    }

    /// Release everything the agent holds. Safe to call more than once.
    fn teardown(&self) {
        let previous = std::mem::replace(
            &mut *self.messaging.write().unwrap_or_else(PoisonError::into_inner),
            Messaging::Disabled,
        );
        if let Messaging::Enabled(system) = previous {
            let removed = system.registry().unregister_agent(self.id);
            system.directory().detach(self.id);
            system.health().reset(&agent_component(self.id));
            let cancelled = system.correlation().cancel_requests_from(self.id);
            tracing::debug!(
                agent = %self.id,
                subscriptions = removed.len(),
                cancelled_requests = cancelled,
                "Detached agent from messaging"
            );
        }

        lock(&self.handlers).clear();
        lock(&self.progress).clear();
        if !self.memory.is_empty() {
            self.memory.clear();
        }
        lock(&self.mailbox).clear();
        self.monitor.unregister(self.id);
    }
}

impl Drop for AgentInner {
    fn drop(&mut self) {
        let state = *lock(&self.state);
        if state != AgentState::Destroyed {
            self.teardown();
        }
    }
}

/// Inbound endpoint registered in the directory. Holds the agent weakly.
struct AgentEndpoint {
    id: AgentId,
    agent: Weak<AgentInner>,
}

#[async_trait]
impl Endpoint for AgentEndpoint {
    async fn deliver(&self, envelope: &Envelope) -> anyhow::Result<()> {
        let Some(agent) = self.agent.upgrade() else {
            return Err(Undeliverable(format!("agent {} no longer exists", self.id)).into());
        };
        agent.receive(envelope).await
    }
}

/// Handle to an isolated actor.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("messaging", &self.is_messaging_enabled())
            .finish()
    }
}

impl Agent {
    pub(crate) fn new(id: AgentId, monitor: Arc<AgentMonitor>, mailbox_capacity: usize) -> Self {
        monitor.register(id);
        Self {
            inner: Arc::new(AgentInner {
                id,
                state: Mutex::new(AgentState::Created),
                memory: AgentMemory::new(id, Arc::clone(&monitor)),
                mailbox: Mutex::new(AgentMailbox::new(id, mailbox_capacity)),
                handlers: Mutex::new(Handlers::default()),
                progress: Mutex::new(LruCache::new(
                    NonZeroUsize::new(PROGRESS_CAPACITY).unwrap_or(NonZeroUsize::MIN),
                )),
                messaging: RwLock::new(Messaging::Disabled),
                monitor,
            }),
        }
    }

    pub fn id(&self) -> AgentId {
        self.inner.id
    }

    pub fn state(&self) -> AgentState {
        *lock(&self.inner.state)
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == AgentState::Destroyed
    }

    pub fn is_messaging_enabled(&self) -> bool {
        matches!(
            *self.inner.messaging.read().unwrap_or_else(PoisonError::into_inner),
            Messaging::Enabled(_)
        )
    }

    // Memory

    pub fn remember<V: Serialize>(&self, key: &str, value: V) -> Result<()> {
        self.inner.ensure_alive()?;
        let value = serde_json::to_value(value)?;
        self.inner.memory.set(key, value);
        Ok(())
    }

    pub fn recall(&self, key: &str) -> Result<Option<Value>> {
        self.inner.ensure_alive()?;
        Ok(self.inner.memory.get(key))
    }

    /// Recall and deserialize a value.
    pub fn recall_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.recall(key)?
            .map(serde_json::from_value)
            .transpose()
            .map_err(Error::from)
    }

    /// Stored value with its creation and update times. Not audited.
    pub fn memory_entry(&self, key: &str) -> Result<Option<MemoryEntry>> {
        self.inner.ensure_alive()?;
        Ok(self.inner.memory.entry(key))
    }

    pub fn forget(&self, key: &str) -> Result<bool> {
        self.inner.ensure_alive()?;
        Ok(self.inner.memory.delete(key))
    }

    pub fn memory_keys(&self) -> Result<Vec<String>> {
        self.inner.ensure_alive()?;
        Ok(self.inner.memory.keys())
    }

    pub fn clear_memory(&self) -> Result<usize> {
        self.inner.ensure_alive()?;
        Ok(self.inner.memory.clear())
    }

    // Handlers

    /// Run `handler` for every delivered envelope whose type matches `pattern`.
    pub fn on_message(&self, pattern: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        self.inner.ensure_alive()?;
        let pattern = create_message_pattern(pattern)?;
        lock(&self.inner.handlers).messages.push((pattern, handler));
        Ok(())
    }

    /// Answer matching requests. The first matching request handler wins.
    pub fn on_request(&self, pattern: &str, handler: Arc<dyn RequestHandler>) -> Result<()> {
        self.inner.ensure_alive()?;
        let pattern = create_message_pattern(pattern)?;
        lock(&self.inner.handlers).requests.push((pattern, handler));
        Ok(())
    }

    pub fn handler_count(&self) -> usize {
        lock(&self.inner.handlers).len()
    }

    // Messaging

    /// Attach the agent to a messaging system. Repeat calls with the same system are no-ops.
    pub fn enable_messaging(&self, system: &Arc<MessagingSystem>) -> Result<()> {
        self.inner.ensure_alive()?;
        let mut messaging = self
            .inner
            .messaging
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Messaging::Enabled(current) = &*messaging {
            if Arc::ptr_eq(current, system) {
                return Ok(());
            }
            return Err(Error::Config(format!(
                "agent {} is already attached to another messaging system",
                self.id()
            )));
        }

        system.directory().attach(
            self.id(),
            Arc::new(AgentEndpoint {
                id: self.id(),
                agent: Arc::downgrade(&self.inner),
            }),
        );
        system.registry().register_agent(self.id());
        *messaging = Messaging::Enabled(Arc::clone(system));

        tracing::debug!(agent = %self.id(), "Messaging enabled");
        Ok(())
    }

    fn messaging(&self) -> Result<Arc<MessagingSystem>> {
        self.inner.ensure_alive()?;
        self.inner.system()
    }

    pub fn subscribe(&self, pattern: &str) -> Result<bool> {
        let system = self.messaging()?;
        let pattern = create_message_pattern(pattern)?;
        let added = system.registry().subscribe(self.id(), pattern.clone())?;
        if added {
            tracing::debug!(agent = %self.id(), pattern = %pattern, "Subscribed");
        }
        Ok(added)
    }

    pub fn unsubscribe(&self, pattern: &str) -> Result<bool> {
        let system = self.messaging()?;
        let pattern = create_message_pattern(pattern)?;
        Ok(system.registry().unsubscribe(self.id(), &pattern))
    }

    pub fn subscriptions(&self) -> Result<Vec<MessagePattern>> {
        let system = self.messaging()?;
        Ok(system.registry().subscriptions_of(self.id()))
    }

    /// Publish to every subscriber of `message_type`.
    pub async fn publish_message<P: Serialize>(
        &self,
        message_type: &str,
        payload: P,
    ) -> Result<RoutingResult> {
        self.publish_with_priority(message_type, payload, Priority::Normal)
            .await
    }

    /// Publish with an explicit priority. High and urgent delivery failures log at error level.
    pub async fn publish_with_priority<P: Serialize>(
        &self,
        message_type: &str,
        payload: P,
        priority: Priority,
    ) -> Result<RoutingResult> {
        let system = self.messaging()?;
        let message_type = create_message_type(message_type)?;
        let payload = into_payload(payload)?;
        let envelope = Envelope::event(self.id(), self.id(), message_type, payload);

        tracing::debug!(
            agent = %self.id(),
            message_id = %envelope.id(),
            message_type = %envelope.message_type(),
            priority = %priority,
            "Publishing message"
        );
        lock(&self.inner.mailbox).record_sent(envelope.clone());
        let message = ExtendedMessage::from_envelope(envelope, system.delivery().config().max_retries)
            .with_priority(priority);
        Ok(system.router().route_extended(&message).await)
    }

    /// Send to every other messaging-enabled agent accepted by `filter`.
    pub async fn broadcast_message<P: Serialize>(
        &self,
        message_type: &str,
        payload: P,
        filter: Option<BroadcastFilter<'_>>,
    ) -> Result<RoutingResult> {
        let system = self.messaging()?;
        let message_type = create_message_type(message_type)?;
        let payload = into_payload(payload)?;
        let envelope = Envelope::event(self.id(), self.id(), message_type, payload);

        let recipients: Vec<AgentId> = system
            .registry()
            .get_all_active_agents()
            .into_iter()
            .filter(|agent| *agent != self.id())
            .filter(|agent| filter.map_or(true, |accept| accept(*agent)))
            .collect();

        tracing::debug!(
            agent = %self.id(),
            message_id = %envelope.id(),
            recipients = recipients.len(),
            "Broadcasting message"
        );
        lock(&self.inner.mailbox).record_sent(envelope.clone());
        Ok(system.router().route_to(&envelope, &recipients).await)
    }

    /// Send a request to `to` and wait for the correlated response.
    ///
    /// Delivery runs in the background; the call ends when a response arrives
    /// or `timeout` (default from configuration) elapses.
    pub async fn request_message<P: Serialize>(
        &self,
        to: AgentId,
        message_type: &str,
        payload: P,
        timeout: Option<Duration>,
    ) -> Result<Envelope> {
        let system = self.messaging()?;
        let message_type = create_message_type(message_type)?;
        let payload = into_payload(payload)?;
        let timeout = timeout.unwrap_or_else(|| system.correlation().default_timeout());

        let correlation_id = CorrelationId::new();
        let request = Envelope::request(self.id(), to, message_type, payload, correlation_id);
        let response = system
            .correlation()
            .register_request(correlation_id, &request, timeout, self.id())?;
        lock(&self.inner.mailbox).record_sent(request.clone());

        let router = Arc::clone(system.router());
        tokio::spawn(async move {
            let result = router.route_to(&request, &[to]).await;
            if !result.success {
                tracing::warn!(
                    correlation_id = %correlation_id,
                    to = %to,
                    error = ?result.error,
                    "Request delivery failed"
                );
            }
        });

        response.await
    }

    /// Answer `request` manually.
    pub async fn reply<P: Serialize>(&self, request: &Envelope, payload: P) -> Result<RoutingResult> {
        let system = self.messaging()?;
        let payload = into_payload(payload)?;
        let response = request.create_response(self.id(), payload).ok_or_else(|| {
            ValidationError::single("correlationId", "cannot reply to a message without one")
        })?;
        lock(&self.inner.mailbox).record_sent(response.clone());
        Ok(system.router().route_to(&response, &[response.to()]).await)
    }

    // Mailbox

    pub fn inbox(&self) -> Vec<Envelope> {
        lock(&self.inner.mailbox).inbox().cloned().collect()
    }

    /// Envelopes this agent sent, oldest first.
    pub fn outbox(&self) -> Vec<Envelope> {
        lock(&self.inner.mailbox).outbox().cloned().collect()
    }

    /// Take every received envelope out of the inbox.
    pub fn drain_inbox(&self) -> Vec<Envelope> {
        lock(&self.inner.mailbox).drain_inbox()
    }

    pub fn mailbox_stats(&self) -> MailboxStats {
        lock(&self.inner.mailbox).stats()
    }

    /// Unsubscribe everything, drop handlers and memory, leave monitoring.
    ///
    /// Idempotent. Every later operation fails with [`Error::AgentDestroyed`].
    pub fn destroy(&self) {
        {
            let mut state = lock(&self.inner.state);
            if *state == AgentState::Destroyed {
                return;
            }
            *state = AgentState::Destroyed;
        }
        self.inner.teardown();
        tracing::info!(agent = %self.id(), "Agent destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MessagingConfig;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn system() -> Arc<MessagingSystem> {
        MessagingSystem::new(MessagingConfig::default()).unwrap()
    }

    #[test]
    fn test_lifecycle() {
        let system = system();
        let agent = system.create_agent();
        assert_eq!(agent.state(), AgentState::Created);
        assert!(system.monitor().is_registered(agent.id()));

        agent.remember("k", 1).unwrap();
        assert_eq!(agent.state(), AgentState::Active);

        agent.destroy();
        agent.destroy();
        assert_eq!(agent.state(), AgentState::Destroyed);
        assert!(!system.monitor().is_registered(agent.id()));
        assert!(matches!(agent.recall("k"), Err(Error::AgentDestroyed(_))));
        assert!(matches!(agent.subscribe("a"), Err(Error::AgentDestroyed(_))));
    }

    #[test]
    fn test_memory_round_trip() {
        let system = system();
        let agent = system.create_agent();

        agent.remember("profile", json!({"name": "x"})).unwrap();
        agent.remember("count", 3).unwrap();
        assert_eq!(agent.recall("profile").unwrap(), Some(json!({"name": "x"})));
        assert_eq!(agent.recall_as::<u32>("count").unwrap(), Some(3));
        assert_eq!(agent.memory_keys().unwrap(), vec!["count", "profile"]);
        assert!(agent.forget("count").unwrap());
        assert_eq!(agent.clear_memory().unwrap(), 1);

        assert_eq!(system.monitor().accesses_for(agent.id()).len(), 6);
    }

    #[test]
    fn test_memory_is_isolated() {
        let system = system();
        let a = system.create_agent();
        let b = system.create_agent();
        a.remember("secret", "a-only").unwrap();
        assert_eq!(b.recall("secret").unwrap(), None);
    }

    #[tokio::test]
    async fn test_messaging_requires_opt_in() {
        let system = system();
        let agent = system.create_agent();
        assert!(matches!(agent.subscribe("a.*"), Err(Error::MessagingNotEnabled(_))));
        assert!(matches!(
            agent.publish_message("a.b", json!({})).await,
            Err(Error::MessagingNotEnabled(_))
        ));

        agent.enable_messaging(&system).unwrap();
        agent.enable_messaging(&system).unwrap();
        assert!(agent.subscribe("a.*").unwrap());
        assert_eq!(agent.subscriptions().unwrap().len(), 1);

        let other = MessagingSystem::new(MessagingConfig::default()).unwrap();
        assert!(matches!(agent.enable_messaging(&other), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected() {
        let system = system();
        let agent = system.create_messaging_agent().unwrap();
        assert!(matches!(agent.subscribe("a.b*"), Err(Error::InvalidIdentifier(_))));
        assert!(matches!(
            agent.publish_message("a.b", 42).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            agent.publish_message("a b", json!({})).await,
            Err(Error::InvalidIdentifier(_))
        ));
    }

    #[tokio::test]
    async fn test_destroy_detaches_messaging() {
        let system = system();
        let agent = system.create_messaging_agent().unwrap();
        agent.subscribe("order.*").unwrap();
        agent
            .on_message("order.*", handler_fn(|_| async { Ok(()) }))
            .unwrap();
        let publisher = system.create_messaging_agent().unwrap();
        publisher.publish_message("order.created", json!({})).await.unwrap();
        assert!(system.health().get_health(&agent_component(agent.id())).is_some());

        agent.destroy();
        assert!(system.health().get_health(&agent_component(agent.id())).is_none());
        assert_eq!(agent.handler_count(), 0);
        assert!(!agent.is_messaging_enabled());
        assert!(!system.directory().contains(agent.id()));
        assert!(system.registry().subscriptions_of(agent.id()).is_empty());
    }

    #[tokio::test]
    async fn test_dropping_last_handle_detaches() {
        let system = system();
        let id = {
            let agent = system.create_messaging_agent().unwrap();
            agent.subscribe("a").unwrap();
            agent.id()
        };
        assert!(!system.directory().contains(id));
        assert!(!system.registry().is_registered(id));
    }

    #[tokio::test]
    async fn test_retry_resumes_after_succeeded_handlers() {
        let system = system();
        let publisher = system.create_messaging_agent().unwrap();
        let listener = system.create_messaging_agent().unwrap();
        listener.subscribe("job.*").unwrap();

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        {
            let first = Arc::clone(&first);
            listener
                .on_message(
                    "job.*",
                    handler_fn(move |_| {
                        let first = Arc::clone(&first);
                        async move {
                            first.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    }),
                )
                .unwrap();
        }
        {
            let second = Arc::clone(&second);
            listener
                .on_message(
                    "job.*",
                    handler_fn(move |_| {
                        let second = Arc::clone(&second);
                        async move {
                            if second.fetch_add(1, Ordering::SeqCst) == 0 {
                                anyhow::bail!("not ready yet");
                            }
                            Ok(())
                        }
                    }),
                )
                .unwrap();
        }

        let result = publisher.publish_message("job.done", json!({})).await.unwrap();
        assert!(result.success);
        assert_eq!(result.delivery.as_ref().unwrap().retry_attempts, 1);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 2);
        assert_eq!(listener.inbox().len(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_delivery_to_destroyed_agent_is_undeliverable() {
        let system = system();
        let agent = system.create_messaging_agent().unwrap();
        let endpoint = AgentEndpoint {
            id: agent.id(),
            agent: Arc::downgrade(&agent.inner),
        };
        let envelope = Envelope::event(
            agent.id(),
            agent.id(),
            create_message_type("ping").unwrap(),
            Default::default(),
        );

        agent.destroy();
        let err = endpoint.deliver(&envelope).await.unwrap_err();
        assert!(err.downcast_ref::<Undeliverable>().is_some());

        drop(agent);
        let err = endpoint.deliver(&envelope).await.unwrap_err();
        assert!(err.downcast_ref::<Undeliverable>().is_some());
    }

    #[tokio::test]
    async fn test_unrepresentable_request_timeout_is_rejected() {
        let system = system();
        let requester = system.create_messaging_agent().unwrap();
        let responder = system.create_messaging_agent().unwrap();

        let result = requester
            .request_message(responder.id(), "ping", json!({}), Some(Duration::MAX))
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(system.correlation().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_priority_publish_and_mailbox_views() {
        let system = system();
        let publisher = system.create_messaging_agent().unwrap();
        let listener = system.create_messaging_agent().unwrap();
        listener.subscribe("alert.*").unwrap();

        let result = publisher
            .publish_with_priority("alert.disk", json!({"pct": 97}), Priority::Urgent)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(publisher.outbox().len(), 1);

        let drained = listener.drain_inbox();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].message_type().as_str(), "alert.disk");
        assert!(listener.inbox().is_empty());
        assert_eq!(listener.mailbox_stats().total_received, 1);
    }

    #[test]
    fn test_memory_entry_tracks_updates() {
        let system = system();
        let agent = system.create_agent();
        agent.remember("k", "a").unwrap();
        let first = agent.memory_entry("k").unwrap().unwrap();
        agent.remember("k", "b").unwrap();
        let second = agent.memory_entry("k").unwrap().unwrap();
        assert_eq!(second.value, json!("b"));
        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(agent.memory_entry("missing").unwrap(), None);
    }
}
