//! Shared counter store abstraction.
//!
//! Admission state lives entirely in the store: one counter per identity whose
//! time-to-live doubles as the freeze marker. A TTL of at most one window is an
//! ordinary window, anything longer is a freeze.

mod memory;
mod redis_store;

pub use memory::MemoryCounterStore;
pub use redis_store::{DEFAULT_CONNECT_TIMEOUT, RedisCounterStore, StoreConfig};

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// Length of one counting window.
pub const WINDOW: Duration = Duration::from_secs(1);

/// Result of reading a key's time-to-live.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrozenState {
    pub frozen: bool,
    pub ttl_seconds: f64,
}

impl FrozenState {
    pub const NOT_FROZEN: FrozenState = FrozenState {
        frozen: false,
        ttl_seconds: 0.0,
    };

    /// Interpret a remaining time-to-live.
    pub fn from_ttl(ttl: Duration) -> Self {
        Self {
            frozen: ttl > WINDOW,
            ttl_seconds: ttl.as_secs_f64(),
        }
    }
}

/// Capability interface over a TTL-capable key-value store.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter for `key`, creating it at 1 with a one-window expiry.
    async fn increment(&self, key: &str) -> Result<u64, StoreError>;

    /// Override the key's expiry with `seconds`. Absent keys are tolerated.
    async fn freeze(&self, key: &str, seconds: u64) -> Result<(), StoreError>;

    /// Report whether the key's remaining TTL exceeds one window.
    async fn is_frozen(&self, key: &str) -> Result<FrozenState, StoreError>;
}
