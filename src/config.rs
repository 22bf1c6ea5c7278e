//! Configuration loading for agentmesh.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::delivery::DeliveryConfig;
use crate::core::router::RouterConfig;
use crate::error::{Error, Result};

/// Get the agentmesh home directory (~/.agentmesh).
pub fn get_home_dir() -> Result<PathBuf> {
    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".agentmesh"))
}

/// Get the settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("settings.json"))
}

/// Load and validate a configuration file. Missing fields take defaults.
pub fn load_config(path: &Path) -> Result<MessagingConfig> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "Settings file not found at {}",
            path.display()
        )));
    }

    let content = std::fs::read_to_string(path)?;
    let config: MessagingConfig = serde_json::from_str(&content)?;
    config.validate()?;

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(config)
}

/// Load ~/.agentmesh/settings.json or return defaults if it is missing or invalid.
pub fn load_config_or_default() -> MessagingConfig {
    get_settings_path()
        .and_then(|path| load_config(&path))
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to load settings: {}, using defaults", e);
            MessagingConfig::default()
        })
}

/// Composition configuration for a messaging system.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MessagingConfig {
    /// Batch size for deliveries above the concurrent threshold.
    pub max_concurrent_deliveries: usize,
    /// Milliseconds.
    pub default_request_timeout: u64,
    pub circuit_breaker_threshold: u32,
    pub pattern_cache_size: usize,
    pub subscription_limit: usize,
    pub enable_performance_logging: bool,
    pub max_retries: u32,
    /// Milliseconds.
    pub initial_retry_delay: u64,
    pub backoff_multiplier: f64,
    /// Milliseconds.
    pub routing_budget: u64,
    pub mailbox_capacity: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_deliveries: 10,
            default_request_timeout: 5000,
            circuit_breaker_threshold: 5,
            pattern_cache_size: 1000,
            subscription_limit: 100,
            enable_performance_logging: false,
            max_retries: 3,
            initial_retry_delay: 10,
            backoff_multiplier: 2.0,
            routing_budget: 30,
            mailbox_capacity: 1000,
        }
    }
}

fn check_range<T: PartialOrd + std::fmt::Display>(
    problems: &mut Vec<String>,
    field: &str,
    value: T,
    min: T,
    max: T,
) {
    if value < min || value > max {
        problems.push(format!("{} must be between {} and {}, got {}", field, min, max, value));
    }
}

impl MessagingConfig {
    /// Reject out-of-range values. Nothing is clamped.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        check_range(&mut problems, "maxConcurrentDeliveries", self.max_concurrent_deliveries, 1, 1000);
        check_range(&mut problems, "defaultRequestTimeout", self.default_request_timeout, 1, 300_000);
        check_range(&mut problems, "circuitBreakerThreshold", self.circuit_breaker_threshold, 1, 1000);
        check_range(&mut problems, "patternCacheSize", self.pattern_cache_size, 1, 100_000);
        check_range(&mut problems, "subscriptionLimit", self.subscription_limit, 1, 10_000);
        check_range(&mut problems, "maxRetries", self.max_retries, 0, 10);
        check_range(&mut problems, "initialRetryDelay", self.initial_retry_delay, 0, 10_000);
        check_range(&mut problems, "routingBudget", self.routing_budget, 1, 60_000);
        check_range(&mut problems, "mailboxCapacity", self.mailbox_capacity, 1, 1_000_000);
        if !(1.0..=10.0).contains(&self.backoff_multiplier) {
            problems.push(format!(
                "backoffMultiplier must be between 1 and 10, got {}",
                self.backoff_multiplier
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems.join("; ")))
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.default_request_timeout)
    }

    pub fn delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            max_concurrent_deliveries: self.max_concurrent_deliveries,
            max_retries: self.max_retries,
            initial_retry_delay: Duration::from_millis(self.initial_retry_delay),
            backoff_multiplier: self.backoff_multiplier,
        }
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            routing_budget: Duration::from_millis(self.routing_budget),
            enable_performance_logging: self.enable_performance_logging,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = MessagingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.delivery_config(), DeliveryConfig::default());
    }

    #[test]
    fn test_out_of_range_fails() {
        let config = MessagingConfig {
            max_concurrent_deliveries: 0,
            default_request_timeout: 300_001,
            backoff_multiplier: 0.5,
            ..MessagingConfig::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("maxConcurrentDeliveries"));
        assert!(err.contains("defaultRequestTimeout"));
        assert!(err.contains("backoffMultiplier"));
        assert!(!err.contains("subscriptionLimit"));
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"subscriptionLimit": 5, "enablePerformanceLogging": true}}"#).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(
            config,
            MessagingConfig {
                subscription_limit: 5,
                enable_performance_logging: true,
                ..MessagingConfig::default()
            }
        );
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"patternCacheSize": 0}"#).unwrap();
        assert!(matches!(load_config(&path), Err(Error::Config(_))));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(load_config(&path), Err(Error::Json(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(&dir.path().join("absent.json")).is_err());
    }
}
