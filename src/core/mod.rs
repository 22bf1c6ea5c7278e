//! Core module - matching, subscriptions, delivery and routing.
//!
//! This module contains the heart of agentmesh's message processing:
//! - Wildcard pattern matching with a compiled-pattern cache
//! - Subscription registry and agent directory
//! - Batched delivery with retries
//! - Health tracking and request correlation
//! - The router tying them together

pub mod correlation;
pub mod delivery;
pub mod directory;
pub mod health;
pub mod monitor;
pub mod pattern;
pub mod registry;
pub mod router;

use std::time::Duration;

use serde::Serializer;

pub use correlation::{CorrelationManager, CorrelationStats, RequestState};
pub use delivery::{DeliveryConfig, DeliveryEngine, DeliveryFailure, DeliveryResult, DeliveryStats};
pub use directory::{AgentDirectory, Endpoint};
pub use health::{ComponentHealth, HealthMonitor, HealthStats};
pub use monitor::{AgentMonitor, MemoryAccess, MemoryOperation, MonitorStats};
pub use pattern::{CompiledPattern, PatternCacheStats, PatternMatcher};
pub use registry::{RegistryStats, SubscriptionRegistry};
pub use router::{MessageRouter, RouterConfig, RouterStats, RoutingResult};

pub(crate) fn serialize_duration_ms<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
}
