//! Redis-backed counter store.
//!
//! The increment runs server-side as a Lua script, so concurrent processes
//! sharing the store agree on every count and no request can slip through a
//! read-then-write gap. Every command is wrapped in a bounded timeout; a slow
//! store is treated the same as an unreachable one.

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{Client, Script};
use std::time::Duration;

use crate::clock::epoch_millis_now;
use crate::error::StoreError;
use crate::store::{CounterStore, WindowCount};

/// Deadline for the initial connection attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default deadline for a single counter operation.
const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(250);

/// Increment the key and arm its expiry on first touch. PTTL can report a
/// missing expiry (-1) if a previous EXPIRE was lost; re-arm rather than let
/// the counter live forever.
const INCR_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

/// Counter store over a shared Redis instance.
///
/// Cloning shares the underlying multiplexed connection. The connection
/// manager re-establishes dropped connections on its own; while it cannot
/// reach the server, operations fail fast with [`StoreError::Unavailable`]
/// and the failover layer takes over.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    script: Script,
    op_timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("op_timeout", &self.op_timeout).finish()
    }
}

impl RedisStore {
    /// Connect to the store at `url` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// This is the startup connection attempt; it fails with
    /// [`StoreError::Unavailable`] if the server cannot be reached in time.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client =
            Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let config = ConnectionManagerConfig::new().set_number_of_retries(1);

        let conn = tokio::time::timeout(
            CONNECT_TIMEOUT,
            client.get_connection_manager_with_config(config),
        )
        .await
        .map_err(|_| {
            StoreError::Unavailable(format!(
                "connect to {url} timed out after {CONNECT_TIMEOUT:?}"
            ))
        })?
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self { conn, script: Script::new(INCR_SCRIPT), op_timeout: DEFAULT_OP_TIMEOUT })
    }

    /// Override the per-operation deadline.
    pub fn with_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn incr(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let window_millis: u64 = window.as_millis().try_into().unwrap_or(u64::MAX);
        let mut conn = self.conn.clone();

        let invocation = async {
            let reply: (u64, i64) =
                self.script.key(key).arg(window_millis).invoke_async(&mut conn).await?;
            Ok::<_, redis::RedisError>(reply)
        };

        let (count, ttl_millis) = tokio::time::timeout(self.op_timeout, invocation)
            .await
            .map_err(|_| {
                StoreError::Unavailable(format!(
                    "incr timed out after {:?}",
                    self.op_timeout
                ))
            })?
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let ttl_millis = u64::try_from(ttl_millis).unwrap_or(window_millis);
        Ok(WindowCount {
            count,
            reset_at: epoch_millis_now().saturating_add(ttl_millis),
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let pong = async {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<_, redis::RedisError>(())
        };
        tokio::time::timeout(self.op_timeout, pong)
            .await
            .map_err(|_| {
                StoreError::Unavailable(format!(
                    "ping timed out after {:?}",
                    self.op_timeout
                ))
            })?
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}
