//! Correlation manager: request/response on top of one-way delivery.
//!
//! Each pending request owns a oneshot sender keyed by correlation id.
//! Leaving the pending state is a removal from the map, so exactly one of
//! resolve, timeout and cancel wins for any request.

use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use lru::LruCache;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Error, Result, ValidationError};
use crate::protocol::envelope::Envelope;
use crate::protocol::ids::{AgentId, CorrelationId, MessageType};

/// Completed requests remembered for [`CorrelationManager::request_state`].
const COMPLETED_HISTORY: usize = 1000;

/// Lifecycle of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Pending,
    Resolved,
    TimedOut,
    Cancelled,
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestState::Pending => write!(f, "pending"),
            RequestState::Resolved => write!(f, "resolved"),
            RequestState::TimedOut => write!(f, "timed_out"),
            RequestState::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationStats {
    pub pending: usize,
    pub resolved: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub late_responses: u64,
}

struct PendingRequest {
    sender: oneshot::Sender<Envelope>,
    requester: AgentId,
    request_type: MessageType,
    deadline: Instant,
}

struct Shared {
    pending: DashMap<CorrelationId, PendingRequest>,
    completed: Mutex<LruCache<CorrelationId, RequestState>>,
    resolved: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    late_responses: AtomicU64,
}

impl Shared {
    fn finish(&self, id: CorrelationId, state: RequestState) {
        let counter = match state {
            RequestState::Resolved => &self.resolved,
            RequestState::TimedOut => &self.timed_out,
            RequestState::Cancelled => &self.cancelled,
            RequestState::Pending => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(id, state);
    }
}

/// Cancels the request if the response future is dropped while pending.
struct PendingGuard {
    shared: Arc<Shared>,
    id: CorrelationId,
    armed: bool,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.armed && self.shared.pending.remove(&self.id).is_some() {
            tracing::debug!(correlation_id = %self.id, "Request dropped by caller");
            self.shared.finish(self.id, RequestState::Cancelled);
        }
    }
}

pub struct CorrelationManager {
    shared: Arc<Shared>,
    default_timeout: Duration,
}

impl CorrelationManager {
    pub fn new(default_timeout: Duration) -> Self {
        let history = NonZeroUsize::new(COMPLETED_HISTORY).unwrap_or(NonZeroUsize::MIN);
        Self {
            shared: Arc::new(Shared {
                pending: DashMap::new(),
                completed: Mutex::new(LruCache::new(history)),
                resolved: AtomicU64::new(0),
                timed_out: AtomicU64::new(0),
                cancelled: AtomicU64::new(0),
                late_responses: AtomicU64::new(0),
            }),
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Register a pending request and return the future for its response.
    ///
    /// Registration happens before this returns and the deadline is fixed now,
    /// not when the future is first polled. A timeout whose deadline cannot be
    /// represented is rejected with [`Error::Validation`].
    pub fn register_request(
        &self,
        correlation_id: CorrelationId,
        request: &Envelope,
        timeout: Duration,
        requester: AgentId,
    ) -> Result<impl Future<Output = Result<Envelope>> + Send + 'static> {
        let deadline = Instant::now().checked_add(timeout).ok_or_else(|| {
            ValidationError::single("timeout", format!("{:?} is too far in the future", timeout))
        })?;
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let (sender, mut receiver) = oneshot::channel();

        let previous = self.shared.pending.insert(
            correlation_id,
            PendingRequest {
                sender,
                requester,
                request_type: request.message_type().clone(),
                deadline,
            },
        );
        if previous.is_some() {
            tracing::warn!(correlation_id = %correlation_id, "Replaced pending request with same correlation id");
            self.shared.finish(correlation_id, RequestState::Cancelled);
        }
        tracing::debug!(
            correlation_id = %correlation_id,
            requester = %requester,
            message_type = %request.message_type(),
            timeout_ms,
            "Registered request"
        );

        let shared = Arc::clone(&self.shared);
        let guard = PendingGuard {
            shared: Arc::clone(&shared),
            id: correlation_id,
            armed: true,
        };

        Ok(async move {
            let mut guard = guard;
            let outcome = tokio::time::timeout_at(deadline, &mut receiver).await;
            guard.armed = false;

            match outcome {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(_)) => Err(Error::RequestCancelled(correlation_id)),
                Err(_) => {
                    if shared.pending.remove(&correlation_id).is_some() {
                        tracing::debug!(correlation_id = %correlation_id, timeout_ms, "Request timed out");
                        shared.finish(correlation_id, RequestState::TimedOut);
                        return Err(Error::RequestTimeout {
                            correlation_id,
                            timeout_ms,
                        });
                    }
                    // Resolve or cancel removed the entry first; its outcome is in flight.
                    receiver
                        .await
                        .map_err(|_| Error::RequestCancelled(correlation_id))
                }
            }
        })
    }

    /// Hand a response to its waiting request. Returns false for unknown or late responses.
    pub fn resolve(&self, response: &Envelope) -> bool {
        let Some(correlation_id) = response.correlation_id() else {
            return false;
        };

        match self.shared.pending.remove(&correlation_id) {
            Some((_, pending)) => {
                tracing::debug!(
                    correlation_id = %correlation_id,
                    request_type = %pending.request_type,
                    remaining_ms = pending.deadline.saturating_duration_since(Instant::now()).as_millis() as u64,
                    "Resolved request"
                );
                self.shared.finish(correlation_id, RequestState::Resolved);
                if pending.sender.send(response.clone()).is_err() {
                    tracing::debug!(correlation_id = %correlation_id, "Requester stopped waiting");
                }
                true
            }
            None => {
                self.shared.late_responses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    correlation_id = %correlation_id,
                    from = %response.from(),
                    "Dropped unknown or late response"
                );
                false
            }
        }
    }

    pub fn cancel(&self, correlation_id: CorrelationId) -> bool {
        match self.shared.pending.remove(&correlation_id) {
            Some(_) => {
                self.shared.finish(correlation_id, RequestState::Cancelled);
                true
            }
            None => false,
        }
    }

    /// Cancel every pending request made by `requester`.
    pub fn cancel_requests_from(&self, requester: AgentId) -> usize {
        let ids: Vec<CorrelationId> = self
            .shared
            .pending
            .iter()
            .filter(|entry| entry.value().requester == requester)
            .map(|entry| *entry.key())
            .collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    pub fn cancel_all(&self) -> usize {
        let ids: Vec<CorrelationId> = self.shared.pending.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Current state, or the final state of a recently completed request.
    pub fn request_state(&self, correlation_id: CorrelationId) -> Option<RequestState> {
        if self.shared.pending.contains_key(&correlation_id) {
            return Some(RequestState::Pending);
        }
        self.shared
            .completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .peek(&correlation_id)
            .copied()
    }

    pub fn stats(&self) -> CorrelationStats {
        CorrelationStats {
            pending: self.shared.pending.len(),
            resolved: self.shared.resolved.load(Ordering::Relaxed),
            timed_out: self.shared.timed_out.load(Ordering::Relaxed),
            cancelled: self.shared.cancelled.load(Ordering::Relaxed),
            late_responses: self.shared.late_responses.load(Ordering::Relaxed),
        }
    }
}
