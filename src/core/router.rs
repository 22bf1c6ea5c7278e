//! Message router: subscriber lookup, delivery and accounting in one call.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;

use super::delivery::{panic_message, DeliveryEngine, DeliveryResult};
use super::health::HealthMonitor;
use super::registry::SubscriptionRegistry;
use super::serialize_duration_ms;
use crate::protocol::envelope::{Envelope, ExtendedMessage};
use crate::protocol::ids::{AgentId, MessageId, MessageType};

/// Health component name for the router itself.
pub const ROUTER_COMPONENT: &str = "router";

/// Routing time above which a warning is logged.
pub const DEFAULT_ROUTING_BUDGET: Duration = Duration::from_millis(30);

const ROUTING_WINDOW: usize = 1000;

/// Health component name for one recipient.
pub fn agent_component(agent: AgentId) -> String {
    format!("agent:{}", agent)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingResult {
    pub success: bool,
    pub message_id: MessageId,
    pub message_type: MessageType,
    pub no_subscribers_found: bool,
    pub delivery: Option<DeliveryResult>,
    #[serde(rename = "lookupTimeMs", serialize_with = "serialize_duration_ms")]
    pub lookup_time: Duration,
    #[serde(rename = "routingTimeMs", serialize_with = "serialize_duration_ms")]
    pub routing_time: Duration,
    pub error: Option<String>,
}

impl RoutingResult {
    fn new(envelope: &Envelope) -> Self {
        Self {
            success: true,
            message_id: envelope.id(),
            message_type: envelope.message_type().clone(),
            no_subscribers_found: false,
            delivery: None,
            lookup_time: Duration::ZERO,
            routing_time: Duration::ZERO,
            error: None,
        }
    }

    /// Recipients that received the message.
    pub fn delivered_to(&self) -> &[AgentId] {
        self.delivery
            .as_ref()
            .map(|d| d.delivered_to.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouterStats {
    pub total_routed_messages: u64,
    pub successful_routes: u64,
    pub failed_routes: u64,
    pub no_subscriber_count: u64,
    pub budget_overruns: u64,
    pub average_routing_time_ms: f64,
    pub success_rate: f64,
    pub window_samples: usize,
}

#[derive(Default)]
struct RouterState {
    routing_times: VecDeque<Duration>,
    total: u64,
    successful: u64,
    failed: u64,
    no_subscribers: u64,
    budget_overruns: u64,
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub routing_budget: Duration,
    pub enable_performance_logging: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            routing_budget: DEFAULT_ROUTING_BUDGET,
            enable_performance_logging: false,
        }
    }
}

pub struct MessageRouter {
    registry: Arc<SubscriptionRegistry>,
    delivery: Arc<DeliveryEngine>,
    health: Arc<HealthMonitor>,
    config: RouterConfig,
    state: Mutex<RouterState>,
}

enum Recipients<'a> {
    Subscribers,
    Explicit(&'a [AgentId]),
}

impl MessageRouter {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        delivery: Arc<DeliveryEngine>,
        health: Arc<HealthMonitor>,
        config: RouterConfig,
    ) -> Self {
        Self {
            registry,
            delivery,
            health,
            config,
            state: Mutex::new(RouterState::default()),
        }
    }

    /// Route to every agent subscribed to the envelope's type.
    pub async fn route(&self, envelope: &Envelope) -> RoutingResult {
        let message =
            ExtendedMessage::from_envelope(envelope.clone(), self.delivery.config().max_retries);
        self.route_extended(&message).await
    }

    pub async fn route_extended(&self, message: &ExtendedMessage) -> RoutingResult {
        self.run(message, Recipients::Subscribers).await
    }

    /// Route to an explicit recipient list without subscription lookup.
    pub async fn route_to(&self, envelope: &Envelope, recipients: &[AgentId]) -> RoutingResult {
        let message =
            ExtendedMessage::from_envelope(envelope.clone(), self.delivery.config().max_retries);
        self.run(&message, Recipients::Explicit(recipients)).await
    }

    async fn run(&self, message: &ExtendedMessage, recipients: Recipients<'_>) -> RoutingResult {
        let envelope = message.envelope();
        let start = Instant::now();

        let outcome = AssertUnwindSafe(self.dispatch(message, recipients))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                let error = format!("routing failure: {}", panic_message(panic.as_ref()));
                tracing::error!(message_id = %envelope.id(), error = %error, "Routing panicked");
                self.health.record_failure(ROUTER_COMPONENT, &error);
                RoutingResult {
                    success: false,
                    routing_time: start.elapsed(),
                    error: Some(error),
                    ..RoutingResult::new(envelope)
                }
            }
        };

        self.record(&result);
        result
    }

    async fn dispatch(&self, message: &ExtendedMessage, recipients: Recipients<'_>) -> RoutingResult {
        let envelope = message.envelope();
        let mut result = RoutingResult::new(envelope);

        let lookup_start = Instant::now();
        let subscribers = match recipients {
            Recipients::Subscribers => self.registry.get_subscribers(envelope.message_type()),
            Recipients::Explicit(list) => list.to_vec(),
        };
        result.lookup_time = lookup_start.elapsed();

        if subscribers.is_empty() {
            result.no_subscribers_found = true;
            result.routing_time = result.lookup_time;
            self.health.record_health(ROUTER_COMPONENT);
            tracing::debug!(
                message_id = %envelope.id(),
                message_type = %envelope.message_type(),
                "No subscribers"
            );
            return result;
        }

        let delivery = self.delivery.deliver(message, &subscribers).await;
        result.routing_time = result.lookup_time + delivery.delivery_time;
        result.success = delivery.success;

        for agent in &delivery.delivered_to {
            self.health.record_health(&agent_component(*agent));
        }
        for failure in &delivery.failed_deliveries {
            self.health
                .record_failure(&agent_component(failure.agent_id), &failure.error);
        }
        self.health.record_health(ROUTER_COMPONENT);

        if !delivery.success {
            result.error = Some(format!(
                "{} of {} deliveries failed",
                delivery.failed_deliveries.len(),
                delivery.total_deliveries
            ));
        }
        result.delivery = Some(delivery);
        result
    }

    fn record(&self, result: &RoutingResult) {
        let over_budget = result.routing_time > self.config.routing_budget;
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.total += 1;
            if result.success {
                state.successful += 1;
            } else {
                state.failed += 1;
            }
            if result.no_subscribers_found {
                state.no_subscribers += 1;
            }
            if over_budget {
                state.budget_overruns += 1;
            }
            if state.routing_times.len() == ROUTING_WINDOW {
                state.routing_times.pop_front();
            }
            state.routing_times.push_back(result.routing_time);
        }

        if over_budget {
            tracing::warn!(
                message_id = %result.message_id,
                message_type = %result.message_type,
                routing_ms = result.routing_time.as_millis() as u64,
                budget_ms = self.config.routing_budget.as_millis() as u64,
                "Routing exceeded time budget"
            );
        }
        if self.config.enable_performance_logging {
            tracing::debug!(
                message_id = %result.message_id,
                lookup_us = result.lookup_time.as_micros() as u64,
                routing_us = result.routing_time.as_micros() as u64,
                recipients = result.delivery.as_ref().map(|d| d.total_deliveries).unwrap_or(0),
                success = result.success,
                "Routed message"
            );
        }
    }

    pub fn stats(&self) -> RouterStats {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let n = state.routing_times.len();
        RouterStats {
            total_routed_messages: state.total,
            successful_routes: state.successful,
            failed_routes: state.failed,
            no_subscriber_count: state.no_subscribers,
            budget_overruns: state.budget_overruns,
            average_routing_time_ms: if n == 0 {
                0.0
            } else {
                state
                    .routing_times
                    .iter()
                    .map(|d| d.as_secs_f64() * 1000.0)
                    .sum::<f64>()
                    / n as f64
            },
            success_rate: if state.total == 0 {
                1.0
            } else {
                state.successful as f64 / state.total as f64
            },
            window_samples: n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::delivery::DeliveryConfig;
    use crate::core::directory::{AgentDirectory, Endpoint};
    use crate::core::pattern::PatternMatcher;
    use crate::protocol::envelope::Payload;
    use crate::protocol::ids::{create_message_pattern, create_message_type};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter(AtomicUsize);

    #[async_trait]
    impl Endpoint for Counter {
        async fn deliver(&self, _envelope: &Envelope) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl Endpoint for Broken {
        async fn deliver(&self, _envelope: &Envelope) -> anyhow::Result<()> {
            anyhow::bail!("broken endpoint")
        }
    }

    struct Slow;

    #[async_trait]
    impl Endpoint for Slow {
        async fn deliver(&self, _envelope: &Envelope) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_millis(45)).await;
            Ok(())
        }
    }

    struct Fixture {
        router: MessageRouter,
        registry: Arc<SubscriptionRegistry>,
        directory: Arc<AgentDirectory>,
        health: Arc<HealthMonitor>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(SubscriptionRegistry::new(Arc::new(PatternMatcher::new(64)), 10));
        let directory = Arc::new(AgentDirectory::new());
        let delivery = Arc::new(DeliveryEngine::new(
            Arc::clone(&directory),
            DeliveryConfig {
                max_retries: 0,
                ..DeliveryConfig::default()
            },
        ));
        let health = Arc::new(HealthMonitor::new(1));
        let router = MessageRouter::new(
            Arc::clone(&registry),
            delivery,
            Arc::clone(&health),
            RouterConfig::default(),
        );
        Fixture {
            router,
            registry,
            directory,
            health,
        }
    }

    fn envelope(message_type: &str) -> Envelope {
        let sender = AgentId::new();
        Envelope::event(sender, sender, create_message_type(message_type).unwrap(), Payload::new())
    }

    #[tokio::test]
    async fn test_no_subscribers() {
        let f = fixture();
        let result = f.router.route(&envelope("order.created")).await;
        assert!(result.success);
        assert!(result.no_subscribers_found);
        assert!(result.delivery.is_none());
        assert_eq!(f.router.stats().no_subscriber_count, 1);
    }

    #[tokio::test]
    async fn test_routes_to_matching_subscribers() {
        let f = fixture();
        let agent = AgentId::new();
        let counter = Arc::new(Counter::default());
        f.directory.attach(agent, counter.clone());
        f.registry
            .subscribe(agent, create_message_pattern("order.*").unwrap())
            .unwrap();

        let result = f.router.route(&envelope("order.created")).await;
        assert!(result.success);
        assert_eq!(result.delivered_to(), &[agent]);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(f.health.get_health(&agent_component(agent)).is_some());

        let miss = f.router.route(&envelope("invoice.created")).await;
        assert!(miss.no_subscribers_found);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_partial_failure_updates_health() {
        let f = fixture();
        let good = AgentId::new();
        let bad = AgentId::new();
        f.directory.attach(good, Arc::new(Counter::default()));
        f.directory.attach(bad, Arc::new(Broken));

        let result = f.router.route_to(&envelope("ping"), &[good, bad]).await;
        assert!(!result.success);
        assert!(result.error.is_some());
        assert!(f.health.is_healthy(&agent_component(good)));
        assert!(!f.health.is_healthy(&agent_component(bad)));
        assert!(f.health.is_healthy(ROUTER_COMPONENT));

        let stats = f.router.stats();
        assert_eq!(stats.total_routed_messages, 1);
        assert_eq!(stats.failed_routes, 1);
        assert_eq!(stats.success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_budget_overrun_is_counted() {
        let f = fixture();
        let slow = AgentId::new();
        let fast = AgentId::new();
        f.directory.attach(slow, Arc::new(Slow));
        f.directory.attach(fast, Arc::new(Counter::default()));

        let result = f.router.route_to(&envelope("report.build"), &[slow]).await;
        assert!(result.success);
        assert!(result.routing_time > DEFAULT_ROUTING_BUDGET);
        f.router.route_to(&envelope("ping"), &[fast]).await;

        let stats = f.router.stats();
        assert_eq!(stats.total_routed_messages, 2);
        assert_eq!(stats.budget_overruns, 1);
    }

    #[tokio::test]
    async fn test_routing_window_is_bounded() {
        let f = fixture();
        for _ in 0..ROUTING_WINDOW + 3 {
            f.router.route(&envelope("nobody.listens")).await;
        }
        let stats = f.router.stats();
        assert_eq!(stats.window_samples, ROUTING_WINDOW);
        assert_eq!(stats.total_routed_messages, (ROUTING_WINDOW + 3) as u64);
        assert_eq!(stats.no_subscriber_count, (ROUTING_WINDOW + 3) as u64);
    }
}
