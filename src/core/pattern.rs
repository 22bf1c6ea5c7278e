//! Wildcard pattern matching with a bounded LRU cache of compiled patterns.
//!
//! A compiled pattern is a list of literal and `*` segments. Matching is a
//! segment-by-segment comparison, linear in the length of the message type,
//! so no pattern can cause super-linear work.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use serde::Serialize;

use crate::protocol::ids::{MessagePattern, MessageType, WILDCARD};

/// One segment of a compiled pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Wildcard,
}

/// Executable form of a [`MessagePattern`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPattern {
    segments: Vec<Segment>,
}

impl CompiledPattern {
    pub fn compile(pattern: &MessagePattern) -> Self {
        let segments = pattern
            .segments()
            .map(|s| {
                if s == WILDCARD {
                    Segment::Wildcard
                } else {
                    Segment::Literal(s.to_string())
                }
            })
            .collect();
        Self { segments }
    }

    /// Segment counts must agree; each `*` matches exactly one segment.
    pub fn is_match(&self, message_type: &MessageType) -> bool {
        let mut candidate = message_type.segments();
        for segment in &self.segments {
            let Some(part) = candidate.next() else {
                return false;
            };
            if let Segment::Literal(literal) = segment {
                if literal != part {
                    return false;
                }
            }
        }
        candidate.next().is_none()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

/// Pattern cache statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatternCacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

struct CacheState {
    cache: LruCache<String, Arc<CompiledPattern>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Matches message types against patterns, caching compiled patterns.
pub struct PatternMatcher {
    state: Mutex<CacheState>,
}

impl PatternMatcher {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(CacheState {
                cache: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch the compiled form, compiling and caching on a miss.
    pub fn compile(&self, pattern: &MessagePattern) -> Arc<CompiledPattern> {
        let mut state = self.lock();
        if let Some(compiled) = state.cache.get(pattern.as_str()) {
            let compiled = Arc::clone(compiled);
            state.hits += 1;
            return compiled;
        }

        state.misses += 1;
        let compiled = Arc::new(CompiledPattern::compile(pattern));
        if let Some((evicted, _)) = state
            .cache
            .push(pattern.as_str().to_string(), Arc::clone(&compiled))
        {
            state.evictions += 1;
            tracing::trace!(pattern = %evicted, "Evicted compiled pattern");
        }
        compiled
    }

    pub fn matches(&self, pattern: &MessagePattern, message_type: &MessageType) -> bool {
        self.compile(pattern).is_match(message_type)
    }

    /// Whether a compiled form is cached. Does not touch recency.
    pub fn contains(&self, pattern: &MessagePattern) -> bool {
        self.lock().cache.contains(pattern.as_str())
    }

    pub fn cache_size(&self) -> usize {
        self.lock().cache.len()
    }

    pub fn capacity(&self) -> usize {
        self.lock().cache.cap().get()
    }

    pub fn stats(&self) -> PatternCacheStats {
        let state = self.lock();
        let lookups = state.hits + state.misses;
        PatternCacheStats {
            size: state.cache.len(),
            capacity: state.cache.cap().get(),
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
        }
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.cache.clear();
        state.hits = 0;
        state.misses = 0;
        state.evictions = 0;
    }
}
