use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{CounterStore, FrozenState, WINDOW};
use crate::error::StoreError;

// How often increments sweep out expired entries
pub const PURGE_INTERVAL: Duration = Duration::from_secs(10);

// Counter entry - count plus the instant it expires
struct CounterEntry {
    count: u64,
    expires_at: Option<Instant>,
}

impl CounterEntry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// In-process counter store.
///
/// Only shared by tasks of one process, so it cannot coordinate several
/// gateway instances. Selected with `--store memory` for single-node runs.
/// Expired entries are swept by `increment` and `freeze` at most once per
/// [`PURGE_INTERVAL`], so the map stays bounded by the identities seen
/// within the longest live TTL.
pub struct MemoryCounterStore {
    counters: DashMap<String, CounterEntry>,
    next_purge: Mutex<Instant>,
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            next_purge: Mutex::new(Instant::now() + PURGE_INTERVAL),
        }
    }

    // Drop every entry whose expiry has passed
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.counters.retain(|_, entry| !entry.is_expired(now));
    }

    // Must run before an entry guard is taken, retain locks every shard
    fn maybe_purge(&self, now: Instant) {
        // another task is already sweeping
        let Ok(mut next) = self.next_purge.try_lock() else {
            return;
        };
        if now < *next {
            return;
        }
        *next = now + PURGE_INTERVAL;
        drop(next);

        let before = self.counters.len();
        self.counters.retain(|_, entry| !entry.is_expired(now));
        debug!(removed = before.saturating_sub(self.counters.len()), "Purged expired counters");
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        let now = Instant::now();
        self.maybe_purge(now);

        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert(CounterEntry {
                count: 0,
                expires_at: None,
            });

        // window over..? start again
        if entry.is_expired(now) {
            entry.count = 0;
            entry.expires_at = None;
        }

        entry.count += 1;
        if entry.count == 1 {
            entry.expires_at = Some(now + WINDOW);
        }

        trace!(key, count = entry.count, "memory increment");
        Ok(entry.count)
    }

    async fn freeze(&self, key: &str, seconds: u64) -> Result<(), StoreError> {
        let now = Instant::now();
        self.maybe_purge(now);

        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert(CounterEntry {
                count: 0,
                expires_at: None,
            });

        if entry.is_expired(now) {
            entry.count = 0;
        }
        entry.expires_at = Some(now + Duration::from_secs(seconds));
        Ok(())
    }

    async fn is_frozen(&self, key: &str) -> Result<FrozenState, StoreError> {
        let now = Instant::now();

        let Some(entry) = self.counters.get(key) else {
            return Ok(FrozenState::NOT_FROZEN);
        };

        match entry.expires_at {
            Some(at) if at > now => Ok(FrozenState::from_ttl(at - now)),
            _ => Ok(FrozenState::NOT_FROZEN),
        }
    }
}
