//! Messaging system: the composition root that owns every shared component.

use std::sync::Arc;

use serde::Serialize;

use crate::agent::Agent;
use crate::config::MessagingConfig;
use crate::core::correlation::{CorrelationManager, CorrelationStats};
use crate::core::delivery::{DeliveryEngine, DeliveryStats};
use crate::core::directory::AgentDirectory;
use crate::core::health::{HealthMonitor, HealthStats};
use crate::core::monitor::{AgentMonitor, MonitorStats};
use crate::core::pattern::{PatternCacheStats, PatternMatcher};
use crate::core::registry::{RegistryStats, SubscriptionRegistry};
use crate::core::router::{MessageRouter, RouterStats};
use crate::error::Result;
use crate::protocol::ids::{create_agent_id, AgentId};

/// Serializable snapshot of every component's statistics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    pub router: RouterStats,
    pub delivery: DeliveryStats,
    pub pattern_cache: PatternCacheStats,
    pub registry: RegistryStats,
    pub health: HealthStats,
    pub correlation: CorrelationStats,
    pub monitor: MonitorStats,
    pub endpoints: usize,
}

pub struct MessagingSystem {
    config: MessagingConfig,
    matcher: Arc<PatternMatcher>,
    registry: Arc<SubscriptionRegistry>,
    directory: Arc<AgentDirectory>,
    delivery: Arc<DeliveryEngine>,
    health: Arc<HealthMonitor>,
    correlation: Arc<CorrelationManager>,
    router: Arc<MessageRouter>,
    monitor: Arc<AgentMonitor>,
}

impl MessagingSystem {
    /// Validate `config` and wire the components. Invalid values fail here.
    pub fn new(config: MessagingConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let matcher = Arc::new(PatternMatcher::new(config.pattern_cache_size));
        let registry = Arc::new(SubscriptionRegistry::new(
            Arc::clone(&matcher),
            config.subscription_limit,
        ));
        let directory = Arc::new(AgentDirectory::new());
        let delivery = Arc::new(DeliveryEngine::new(
            Arc::clone(&directory),
            config.delivery_config(),
        ));
        let health = Arc::new(HealthMonitor::new(config.circuit_breaker_threshold));
        let correlation = Arc::new(CorrelationManager::new(config.request_timeout()));
        let router = Arc::new(MessageRouter::new(
            Arc::clone(&registry),
            Arc::clone(&delivery),
            Arc::clone(&health),
            config.router_config(),
        ));
        let monitor = Arc::new(AgentMonitor::new());

        tracing::info!(
            max_concurrent_deliveries = config.max_concurrent_deliveries,
            pattern_cache_size = config.pattern_cache_size,
            subscription_limit = config.subscription_limit,
            "Messaging system ready"
        );

        Ok(Arc::new(Self {
            config,
            matcher,
            registry,
            directory,
            delivery,
            health,
            correlation,
            router,
            monitor,
        }))
    }

    /// New agent with messaging disabled.
    pub fn create_agent(&self) -> Agent {
        Agent::new(AgentId::new(), Arc::clone(&self.monitor), self.config.mailbox_capacity)
    }

    /// New agent whose id is rehydrated from a UUID string.
    pub fn create_agent_with_seed(&self, seed: &str) -> Result<Agent> {
        let id = create_agent_id(Some(seed))?;
        Ok(Agent::new(id, Arc::clone(&self.monitor), self.config.mailbox_capacity))
    }

    /// New agent already attached to this system.
    pub fn create_messaging_agent(self: &Arc<Self>) -> Result<Agent> {
        let agent = self.create_agent();
        agent.enable_messaging(self)?;
        Ok(agent)
    }

    pub fn config(&self) -> &MessagingConfig {
        &self.config
    }

    pub fn matcher(&self) -> &Arc<PatternMatcher> {
        &self.matcher
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn directory(&self) -> &Arc<AgentDirectory> {
        &self.directory
    }

    pub fn delivery(&self) -> &Arc<DeliveryEngine> {
        &self.delivery
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn correlation(&self) -> &Arc<CorrelationManager> {
        &self.correlation
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn monitor(&self) -> &Arc<AgentMonitor> {
        &self.monitor
    }

    pub fn stats(&self) -> SystemStats {
        SystemStats {
            router: self.router.stats(),
            delivery: self.delivery.stats(),
            pattern_cache: self.matcher.stats(),
            registry: self.registry.stats(),
            health: self.health.get_stats(),
            correlation: self.correlation.stats(),
            monitor: self.monitor.stats(),
            endpoints: self.directory.len(),
        }
    }

    /// Cancel every pending request. Returns how many were cancelled.
    pub fn shutdown(&self) -> usize {
        let cancelled = self.correlation.cancel_all();
        tracing::info!(cancelled_requests = cancelled, "Messaging system shut down");
        cancelled
    }
}
