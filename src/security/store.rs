//! Sliding-window timestamp storage.
//!
//! The rate limiter only needs one primitive from its store: for a key,
//! drop timestamps older than the window, add `now`, and report the count,
//! all as one atomic step. `MemoryWindowStore` gets that atomicity from the
//! `DashMap` entry lock; an external store would use a script or transaction.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store call timed out after {0} ms")]
    Timeout(u64),
}

/// Atomic per-key sliding window.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Prune entries older than `now_ms - window_ms`, record `now_ms`, refresh
    /// the key's expiry and return the count including the new entry.
    async fn record(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<usize, StoreError>;
}

#[derive(Debug, Default)]
struct WindowEntry {
    /// Millisecond timestamps, oldest first. Duplicates are kept.
    hits: VecDeque<i64>,
    expires_at_ms: i64,
}

/// In-process window store.
#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    windows: DashMap<String, WindowEntry>,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop keys whose window has fully elapsed. Returns how many went.
    pub fn purge_expired(&self, now_ms: i64) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, entry| entry.expires_at_ms > now_ms);
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            tracing::debug!(removed, "Purged idle rate windows");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn record(&self, key: &str, now_ms: i64, window_ms: i64) -> Result<usize, StoreError> {
        let cutoff = now_ms - window_ms;
        let mut entry = self.windows.entry(key.to_string()).or_default();

        while entry.hits.front().is_some_and(|t| *t <= cutoff) {
            entry.hits.pop_front();
        }
        // Clock steps backwards are rare; keep the deque ordered anyway.
        let at = entry.hits.partition_point(|t| *t <= now_ms);
        entry.hits.insert(at, now_ms);
        entry.expires_at_ms = entry.expires_at_ms.max(now_ms + window_ms);

        Ok(entry.hits.len())
    }
}
