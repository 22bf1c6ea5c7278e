//! Delivery engine: fans one message out to an explicit recipient list.
//!
//! Small lists are delivered concurrently in one go; larger lists are split
//! into batches that run one after another, concurrent within each batch.
//! Failed attempts are retried with exponential backoff. Nothing here returns
//! an error: per-recipient failures are reported in the [`DeliveryResult`].

use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;

use super::directory::{AgentDirectory, Undeliverable};
use super::serialize_duration_ms;
use crate::protocol::envelope::ExtendedMessage;
use crate::protocol::ids::AgentId;
use crate::protocol::types::Priority;

/// Recipient lists up to this size skip batching.
pub const CONCURRENT_DELIVERY_THRESHOLD: usize = 5;

/// Samples kept for rolling statistics.
pub const STATS_WINDOW: usize = 1000;

/// Retry and batching parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryConfig {
    /// Batch size for lists above the concurrent threshold.
    pub max_concurrent_deliveries: usize,
    pub max_retries: u32,
    pub initial_retry_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_deliveries: 10,
            max_retries: 3,
            initial_retry_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl DeliveryConfig {
    /// Delay before retry number `retry` (zero-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(retry as i32);
        self.initial_retry_delay.mul_f64(factor)
    }
}

/// One recipient that could not be reached.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryFailure {
    pub agent_id: AgentId,
    pub error: String,
    pub attempts: u32,
}

/// Outcome of delivering one message to a recipient list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    pub success: bool,
    pub total_deliveries: usize,
    pub successful_deliveries: usize,
    pub failed_deliveries: Vec<DeliveryFailure>,
    pub delivered_to: Vec<AgentId>,
    #[serde(rename = "deliveryTimeMs", serialize_with = "serialize_duration_ms")]
    pub delivery_time: Duration,
    pub batch_count: usize,
    pub retry_attempts: u32,
}

impl DeliveryResult {
    pub fn empty() -> Self {
        Self {
            success: true,
            total_deliveries: 0,
            successful_deliveries: 0,
            failed_deliveries: Vec::new(),
            delivered_to: Vec::new(),
            delivery_time: Duration::ZERO,
            batch_count: 0,
            retry_attempts: 0,
        }
    }
}

/// Rolling delivery statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStats {
    pub total_messages: u64,
    pub total_deliveries: u64,
    pub total_failures: u64,
    pub total_retries: u64,
    pub average_delivery_time_ms: f64,
    pub success_rate: f64,
    /// Samples behind the averages, at most [`STATS_WINDOW`].
    pub window_samples: usize,
}

struct Sample {
    delivery_time: Duration,
    success_rate: f64,
}

#[derive(Default)]
struct StatsState {
    samples: VecDeque<Sample>,
    total_messages: u64,
    total_deliveries: u64,
    total_failures: u64,
    total_retries: u64,
}

struct RecipientOutcome {
    agent: AgentId,
    error: Option<String>,
    attempts: u32,
    retries: u32,
}

pub struct DeliveryEngine {
    directory: Arc<AgentDirectory>,
    config: DeliveryConfig,
    stats: Mutex<StatsState>,
}

impl DeliveryEngine {
    pub fn new(directory: Arc<AgentDirectory>, config: DeliveryConfig) -> Self {
        Self {
            directory,
            config,
            stats: Mutex::new(StatsState::default()),
        }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Deliver `message` to every subscriber, reporting per-recipient outcomes.
    pub async fn deliver(
        &self,
        message: &ExtendedMessage,
        subscribers: &[AgentId],
    ) -> DeliveryResult {
        if subscribers.is_empty() {
            return DeliveryResult::empty();
        }

        let start = Instant::now();
        let mut outcomes = Vec::with_capacity(subscribers.len());
        let mut batch_count = 0;

        if subscribers.len() <= CONCURRENT_DELIVERY_THRESHOLD {
            outcomes.extend(
                join_all(subscribers.iter().map(|a| self.deliver_to(message, *a))).await,
            );
            batch_count = 1;
        } else {
            let batch_size = self.config.max_concurrent_deliveries.max(1);
            for batch in subscribers.chunks(batch_size) {
                outcomes.extend(join_all(batch.iter().map(|a| self.deliver_to(message, *a))).await);
                batch_count += 1;
            }
        }

        let mut result = DeliveryResult {
            success: true,
            total_deliveries: subscribers.len(),
            successful_deliveries: 0,
            failed_deliveries: Vec::new(),
            delivered_to: Vec::new(),
            delivery_time: Duration::ZERO,
            batch_count,
            retry_attempts: 0,
        };

        for outcome in outcomes {
            result.retry_attempts += outcome.retries;
            match outcome.error {
                None => {
                    result.successful_deliveries += 1;
                    result.delivered_to.push(outcome.agent);
                }
                Some(error) => result.failed_deliveries.push(DeliveryFailure {
                    agent_id: outcome.agent,
                    error,
                    attempts: outcome.attempts,
                }),
            }
        }
        result.success = result.failed_deliveries.is_empty();
        result.delivery_time = start.elapsed();

        self.record(&result);
        result
    }

    async fn deliver_to(&self, message: &ExtendedMessage, agent: AgentId) -> RecipientOutcome {
        let Some(endpoint) = self.directory.get(agent) else {
            tracing::debug!(agent = %agent, "No endpoint registered for recipient");
            return RecipientOutcome {
                agent,
                error: Some(format!("no endpoint registered for agent {}", agent)),
                attempts: 1,
                retries: 0,
            };
        };

        let envelope = message.envelope().readdressed(agent);
        let mut attempt = message.clone();
        let mut retries = 0;

        loop {
            attempt.record_attempt();
            let outcome = AssertUnwindSafe(endpoint.deliver(&envelope))
                .catch_unwind()
                .await;

            let mut permanent = false;
            let error = match outcome {
                Ok(Ok(())) => {
                    attempt.mark_delivered();
                    return RecipientOutcome {
                        agent,
                        error: None,
                        attempts: attempt.delivery_attempts,
                        retries,
                    };
                }
                Ok(Err(e)) => {
                    permanent = e.downcast_ref::<Undeliverable>().is_some();
                    format!("{:#}", e)
                }
                Err(panic) => format!("handler panicked: {}", panic_message(panic.as_ref())),
            };

            attempt.record_failure(error.clone());
            if permanent || !attempt.can_retry() {
                if attempt.priority >= Priority::High {
                    tracing::error!(
                        agent = %agent,
                        message_id = %envelope.id(),
                        priority = %attempt.priority,
                        attempts = attempt.delivery_attempts,
                        error = %error,
                        "Delivery failed"
                    );
                } else {
                    tracing::warn!(
                        agent = %agent,
                        message_id = %envelope.id(),
                        priority = %attempt.priority,
                        attempts = attempt.delivery_attempts,
                        error = %error,
                        "Delivery failed"
                    );
                }
                return RecipientOutcome {
                    agent,
                    error: Some(error),
                    attempts: attempt.delivery_attempts,
                    retries,
                };
            }

            let delay = self.config.backoff(attempt.retry_count);
            tracing::debug!(
                agent = %agent,
                message_id = %envelope.id(),
                retry = attempt.retry_count + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying delivery"
            );
            attempt.record_retry();
            retries += 1;
            tokio::time::sleep(delay).await;
        }
    }

    fn record(&self, result: &DeliveryResult) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.total_messages += 1;
        stats.total_deliveries += result.successful_deliveries as u64;
        stats.total_failures += result.failed_deliveries.len() as u64;
        stats.total_retries += result.retry_attempts as u64;
        if stats.samples.len() == STATS_WINDOW {
            stats.samples.pop_front();
        }
        stats.samples.push_back(Sample {
            delivery_time: result.delivery_time,
            success_rate: result.successful_deliveries as f64 / result.total_deliveries as f64,
        });
    }

    pub fn stats(&self) -> DeliveryStats {
        let stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        let n = stats.samples.len();
        let (average_delivery_time_ms, success_rate) = if n == 0 {
            (0.0, 1.0)
        } else {
            let total_ms: f64 = stats
                .samples
                .iter()
                .map(|s| s.delivery_time.as_secs_f64() * 1000.0)
                .sum();
            let total_rate: f64 = stats.samples.iter().map(|s| s.success_rate).sum();
            (total_ms / n as f64, total_rate / n as f64)
        };
        DeliveryStats {
            total_messages: stats.total_messages,
            total_deliveries: stats.total_deliveries,
            total_failures: stats.total_failures,
            total_retries: stats.total_retries,
            average_delivery_time_ms,
            success_rate,
            window_samples: n,
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
