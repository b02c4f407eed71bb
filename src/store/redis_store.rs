//! Redis-backed counter store.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::{RedisResult, Script};
use tracing::{debug, error, info, warn};

use super::{CounterStore, FrozenState, WINDOW};
use crate::error::StoreError;

lazy_static! {
    // INCR and the first-window EXPIRE in one round trip
    static ref INCREMENT_SCRIPT: Script = Script::new(
        r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"
    );
}

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings for [`RedisCounterStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// `redis://` URL of the shared store
    pub url: String,
    /// Upper bound for connecting, PING and the optional flush
    pub connect_timeout: Duration,
    /// Upper bound for a single store command
    pub command_timeout: Option<Duration>,
    /// Run increment and first expiry as one script instead of two commands
    pub atomic_increment: bool,
    /// Flush the selected database once connected
    pub flush_on_start: bool,
}

impl StoreConfig {
    pub fn new(host: &str) -> Self {
        Self {
            url: redis_url(host),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: None,
            atomic_increment: false,
            flush_on_start: false,
        }
    }
}

// Accept "host:port" as well as a full URL
pub fn redis_url(host: &str) -> String {
    let host = host.trim();
    if host.starts_with("redis://") || host.starts_with("rediss://") || host.starts_with("unix://") {
        host.to_string()
    } else {
        format!("redis://{}", host)
    }
}

// PTTL answers -2 for a missing key and -1 for a key without expiry
fn frozen_state_from_pttl(pttl_ms: i64) -> FrozenState {
    if pttl_ms <= 0 {
        return FrozenState::NOT_FROZEN;
    }
    FrozenState::from_ttl(Duration::from_millis(pttl_ms as u64))
}

/// Counter store shared by every gateway instance pointing at the same Redis.
///
/// By default the increment and the first-window expiry are issued as two
/// commands. A failure between them can leave a counter without expiry, which
/// then never resets. `atomic_increment` closes that gap with a script.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    config: StoreConfig,
}

impl RedisCounterStore {
    /// Connect and verify the store answers PING.
    ///
    /// The whole sequence is bounded by `connect_timeout`, so a store that
    /// accepts connections but never answers fails startup instead of hanging.
    pub async fn connect(config: StoreConfig) -> Result<Self, StoreError> {
        info!(url = %config.url, "Connecting to Redis");

        let limit = config.connect_timeout;
        let conn = match tokio::time::timeout(limit, open_connection(&config)).await {
            Ok(conn) => conn?,
            Err(_) => {
                error!(url = %config.url, "Redis did not answer within {:?}", limit);
                return Err(StoreError::Timeout(limit));
            }
        };

        Ok(Self { conn, config })
    }
}

async fn open_connection(config: &StoreConfig) -> Result<ConnectionManager, StoreError> {
    let client = redis::Client::open(config.url.as_str())?;
    let mut conn = ConnectionManager::new(client).await?;

    let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
    info!("Connected to Redis: {}", pong);

    if config.flush_on_start {
        warn!("Flushing counter database on start");
        let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
    }

    Ok(conn)
}

// Bound one store operation and log its failure
async fn bounded<T, F>(limit: Option<Duration>, op: &'static str, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = RedisResult<T>> + Send,
    T: Send,
{
    let result = match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(limit)),
        },
        None => fut.await.map_err(StoreError::from),
    };

    if let Err(e) = &result {
        error!(op, "Redis command failed: {}", e);
    }
    result
}

// INCR, then EXPIRE for the window only when this call opened it
async fn incr_with_expiry<C>(conn: &mut C, key: &str, atomic: bool) -> RedisResult<u64>
where
    C: ConnectionLike + Send,
{
    let window_secs = WINDOW.as_secs();

    if atomic {
        let mut invocation = INCREMENT_SCRIPT.key(key);
        invocation.arg(window_secs);
        return invocation.invoke_async(conn).await;
    }

    let count: u64 = redis::cmd("INCR").arg(key).query_async(conn).await?;
    if count == 1 {
        let _: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(window_secs)
            .query_async(conn)
            .await?;
    }
    Ok(count)
}

// EXPIRE overrides whatever TTL the key had
async fn expire<C>(conn: &mut C, key: &str, seconds: u64) -> RedisResult<()>
where
    C: ConnectionLike + Send,
{
    let _: i64 = redis::cmd("EXPIRE").arg(key).arg(seconds).query_async(conn).await?;
    Ok(())
}

async fn frozen_state<C>(conn: &mut C, key: &str) -> RedisResult<FrozenState>
where
    C: ConnectionLike + Send,
{
    let pttl: i64 = redis::cmd("PTTL").arg(key).query_async(conn).await?;
    Ok(frozen_state_from_pttl(pttl))
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let count = bounded(
            self.config.command_timeout,
            "increment",
            incr_with_expiry(&mut conn, key, self.config.atomic_increment),
        )
        .await?;

        debug!(key, count, "Incremented request count");
        Ok(count)
    }

    async fn freeze(&self, key: &str, seconds: u64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        bounded(self.config.command_timeout, "freeze", expire(&mut conn, key, seconds)).await?;

        debug!(key, seconds, "Froze key");
        Ok(())
    }

    async fn is_frozen(&self, key: &str) -> Result<FrozenState, StoreError> {
        let mut conn = self.conn.clone();
        bounded(self.config.command_timeout, "pttl", frozen_state(&mut conn, key)).await
    }
}
