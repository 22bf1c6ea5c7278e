//! Passive per-component health tracking.
//!
//! A component's circuit opens once its consecutive failures reach the
//! threshold and closes on the next recorded success. Nothing is blocked:
//! callers read the state and decide what to do with it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Default consecutive failures before a component is reported unhealthy.
pub const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub consecutive_failures: u32,
    pub circuit_open: bool,
    pub total_successes: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl ComponentHealth {
    pub fn is_healthy(&self) -> bool {
        !self.circuit_open
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthStats {
    pub threshold: u32,
    pub unhealthy_components: Vec<String>,
    pub components: BTreeMap<String, ComponentHealth>,
}

struct HealthState {
    threshold: u32,
    components: HashMap<String, ComponentHealth>,
}

pub struct HealthMonitor {
    state: Mutex<HealthState>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_CIRCUIT_BREAKER_THRESHOLD)
    }
}

impl HealthMonitor {
    pub fn new(threshold: u32) -> Self {
        Self {
            state: Mutex::new(HealthState {
                threshold: threshold.max(1),
                components: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HealthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_health(&self, component: &str) {
        let mut state = self.lock();
        let health = state.components.entry(component.to_string()).or_default();
        if health.circuit_open {
            tracing::info!(component, "Component recovered");
        }
        health.consecutive_failures = 0;
        health.circuit_open = false;
        health.total_successes += 1;
        health.last_success_at = Some(Utc::now());
    }

    pub fn record_failure(&self, component: &str, error: &str) {
        let mut state = self.lock();
        let threshold = state.threshold;
        let health = state.components.entry(component.to_string()).or_default();
        health.consecutive_failures += 1;
        health.total_failures += 1;
        health.last_error = Some(error.to_string());
        health.last_failure_at = Some(Utc::now());

        if !health.circuit_open && health.consecutive_failures >= threshold {
            health.circuit_open = true;
            tracing::warn!(
                component,
                failures = health.consecutive_failures,
                error,
                "Circuit opened"
            );
        }
    }

    /// Change the threshold and re-evaluate every component against it.
    pub fn set_circuit_breaker_threshold(&self, threshold: u32) {
        let mut state = self.lock();
        let threshold = threshold.max(1);
        state.threshold = threshold;
        for health in state.components.values_mut() {
            health.circuit_open = health.consecutive_failures >= threshold;
        }
    }

    pub fn circuit_breaker_threshold(&self) -> u32 {
        self.lock().threshold
    }

    pub fn get_health(&self, component: &str) -> Option<ComponentHealth> {
        self.lock().components.get(component).cloned()
    }

    /// Unknown components count as healthy.
    pub fn is_healthy(&self, component: &str) -> bool {
        self.lock()
            .components
            .get(component)
            .map(ComponentHealth::is_healthy)
            .unwrap_or(true)
    }

    pub fn reset(&self, component: &str) -> bool {
        self.lock().components.remove(component).is_some()
    }

    pub fn get_stats(&self) -> HealthStats {
        let state = self.lock();
        let components: BTreeMap<String, ComponentHealth> = state
            .components
            .iter()
            .map(|(name, health)| (name.clone(), health.clone()))
            .collect();
        let unhealthy_components = components
            .iter()
            .filter(|(_, health)| !health.is_healthy())
            .map(|(name, _)| name.clone())
            .collect();
        HealthStats {
            threshold: state.threshold,
            unhealthy_components,
            components,
        }
    }
}
