//! Redis-backed counter store
//!
//! Distributed implementation of [`CounterStore`] for multi-instance
//! deployments. Uses a multiplexed connection for efficient reuse and runs
//! every operation under the configured time bound: a slow store is treated
//! exactly like an unreachable one, so callers behind [`FallbackStore`]
//! degrade instead of stalling request handling.
//!
//! Increments are a single atomic `INCR` + `PTTL` transaction; the TTL is
//! attached only when the key is fresh, which is what makes the window-reset
//! race impossible - two concurrent first requests both go through `INCR`
//! and observe counts 1 and 2, never 1 and 1.
//!
//! [`FallbackStore`]: super::FallbackStore

use async_trait::async_trait;
use chrono::Utc;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use std::future::Future;
use std::time::Duration;

use super::{Counter, CounterStore, StoreError};

/// Distributed [`CounterStore`] backed by Redis.
#[derive(Clone)]
pub struct RedisCounterStore {
    client: Client,
    timeout: Duration,
}

impl RedisCounterStore {
    /// Connect to Redis and verify the server responds.
    ///
    /// The probe is a `PING` under the operation timeout; a server that
    /// cannot answer it now is not a usable primary.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::open(url)
            .map_err(|e| StoreError::Connection(format!("invalid store url: {}", e)))?;

        let store = Self { client, timeout };

        let mut conn = store.connection().await?;
        let pong: String = store
            .bounded(async {
                redis::cmd("PING").query_async(&mut conn).await
            })
            .await?;
        if pong != "PONG" {
            return Err(StoreError::Connection(format!(
                "unexpected probe reply: {}",
                pong
            )));
        }

        Ok(store)
    }

    /// Build a store around an existing client without probing it.
    pub(crate) fn from_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        let fut = self.client.get_multiplexed_async_connection();
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(StoreError::Connection(e.to_string())),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }

    /// Run a Redis future under the operation time bound.
    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(StoreError::Operation(e.to_string())),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<Counter, StoreError> {
        let mut conn = self.connection().await?;

        // INCR is atomic server-side; pairing it with PTTL in one MULTI/EXEC
        // tells us whether this increment created the key (no TTL yet).
        let (count, pttl): (u64, i64) = self
            .bounded(async {
                redis::pipe()
                    .atomic()
                    .incr(key, 1i64)
                    .pttl(key)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        let now = Utc::now();
        let reset_at = if pttl < 0 {
            // Fresh key: start its window now
            let ttl_ms = ttl.as_millis().max(1) as i64;
            let _: i64 = self.bounded(conn.pexpire(key, ttl_ms)).await?;
            now + chrono::Duration::milliseconds(ttl_ms)
        } else {
            now + chrono::Duration::milliseconds(pttl)
        };

        Ok(Counter { count, reset_at })
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let ttl_secs = ttl.as_secs().max(1);
        let () = self.bounded(conn.set_ex(key, value, ttl_secs)).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = self.bounded(conn.get(key)).await?;
        Ok(value)
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let deleted: i64 = self.bounded(conn.del(key)).await?;
        Ok(deleted > 0)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("timeout_ms", &self.timeout.as_millis())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let result = RedisCounterStore::connect("not-a-url", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(StoreError::Connection(_))));
    }

    #[tokio::test]
    async fn test_connect_times_out_on_dead_server() {
        // Port 1 is never a Redis server; the probe must fail within the
        // bound instead of hanging.
        let started = std::time::Instant::now();
        let result =
            RedisCounterStore::connect("redis://127.0.0.1:1", Duration::from_millis(200)).await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
