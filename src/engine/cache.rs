// In-memory LRU cache of loaded sessions keyed by model identifier.

use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use lru::LruCache;
use tracing::debug;

use crate::adapter::traits::SessionHandle;

/// A session that left the cache. The caller owns it now and should release it.
pub struct EvictedSession {
    pub model_id: String,
    pub session: SessionHandle,
}

pub struct SessionCache {
    entries: LruCache<String, SessionHandle>,
}

impl SessionCache {
    /// Create a cache holding at most `capacity` sessions.
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity =
            NonZeroUsize::new(capacity).ok_or_else(|| anyhow!("cache capacity must be > 0"))?;
        Ok(Self {
            entries: LruCache::new(capacity),
        })
    }

    /// Look up a session and mark it most-recently-used.
    pub fn get(&mut self, model_id: &str) -> Option<SessionHandle> {
        self.entries.get(model_id).cloned()
    }

    /// Look up a session without touching recency.
    pub fn peek(&self, model_id: &str) -> Option<SessionHandle> {
        self.entries.peek(model_id).cloned()
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.entries.contains(model_id)
    }

    /// Insert or replace a session, marking it most-recently-used.
    ///
    /// Returns the session that had to leave the cache: the least-recently-used
    /// entry when a new key arrives at capacity, or the previous handle when an
    /// existing key is replaced by a different one.
    pub fn put(&mut self, model_id: &str, session: SessionHandle) -> Option<EvictedSession> {
        let pushed = Arc::clone(&session);
        match self.entries.push(model_id.to_string(), session) {
            Some((old_id, old_session)) if old_id == model_id => {
                if Arc::ptr_eq(&old_session, &pushed) {
                    None
                } else {
                    debug!("session cache replaced entry for {}", old_id);
                    Some(EvictedSession {
                        model_id: old_id,
                        session: old_session,
                    })
                }
            }
            Some((evicted_id, evicted)) => {
                debug!(
                    "session cache full (capacity {}), evicted {}",
                    self.capacity(),
                    evicted_id
                );
                Some(EvictedSession {
                    model_id: evicted_id,
                    session: evicted,
                })
            }
            None => None,
        }
    }

    /// Remove every entry, least-recently-used first.
    pub fn drain(&mut self) -> Vec<EvictedSession> {
        let mut drained = Vec::with_capacity(self.entries.len());
        while let Some((model_id, session)) = self.entries.pop_lru() {
            drained.push(EvictedSession { model_id, session });
        }
        drained
    }

    /// Keys ordered from least- to most-recently-used.
    pub fn keys_lru_order(&self) -> Vec<String> {
        self.entries.iter().rev().map(|(k, _)| k.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }
}
