//! Distributed Counter Store
//!
//! Key/value storage with TTL and atomic increment, shared by the rate
//! limiter, the CSRF guard, and suspicious-activity tracking.
//!
//! # Dual-Path Design
//!
//! One [`CounterStore`] trait, two implementations:
//!
//! - [`RedisCounterStore`]: the distributed primary, consistent across
//!   portal instances
//! - [`MemoryCounterStore`]: the in-process fallback, consistent only within
//!   one instance
//!
//! [`connect`] probes the configured backend once at startup and wires the
//! result together: with a reachable Redis it returns a [`FallbackStore`]
//! that degrades to the in-process map on per-operation errors or timeouts;
//! without one it returns the in-process map directly. Consumers hold an
//! `Arc<dyn CounterStore>` and never branch on the backend themselves.
//!
//! Degraded operation is an accepted trade: per-instance limits still hold,
//! cross-instance consistency is sacrificed until the primary returns. It is
//! logged for operators and invisible to end users.

mod fallback;
mod memory;
mod redis;

pub use fallback::FallbackStore;
pub use memory::{spawn_sweeper, MemoryCounterStore, SWEEP_INTERVAL};
pub use redis::RedisCounterStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::audit::AuditEvent;
use crate::clock::SharedClock;
use crate::config::SecurityConfig;

// ============================================================================
// Store Errors
// ============================================================================

/// Counter-store operation failure.
///
/// These never reach end users: the fallback layer absorbs them, and
/// anything that escapes is mapped to an opaque internal error.
#[derive(Debug)]
pub enum StoreError {
    /// Could not reach the backend
    Connection(String),
    /// The backend rejected or failed the operation
    Operation(String),
    /// The operation exceeded the configured time bound
    Timeout(Duration),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(msg) => write!(f, "store connection failed: {}", msg),
            Self::Operation(msg) => write!(f, "store operation failed: {}", msg),
            Self::Timeout(bound) => {
                write!(f, "store operation exceeded {}ms", bound.as_millis())
            }
        }
    }
}

impl std::error::Error for StoreError {}

// ============================================================================
// Counter Store Trait
// ============================================================================

/// Result of an atomic increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    /// Value after this increment (1 for a fresh window)
    pub count: u64,
    /// When the key expires and the window resets
    pub reset_at: DateTime<Utc>,
}

/// Key/value store with TTL and atomic increment.
///
/// Every method is a potentially slow I/O operation; callers must await and
/// must not hold locks across calls. For a single key, `increment` is
/// linearizable: concurrent callers observe distinct counts.
#[async_trait]
pub trait CounterStore: Send + Sync + fmt::Debug {
    /// Atomically increment `key`, creating it with `ttl` if absent or
    /// expired. Returns the post-increment count and the window reset time.
    ///
    /// The TTL is applied only when the key is created; later increments
    /// inherit the remaining window.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<Counter, StoreError>;

    /// Store a value under `key` with the given TTL, replacing any previous
    /// value.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Fetch the value under `key`. Expired entries read as `None` and may
    /// be evicted on access.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Delete `key`. Returns whether a live entry was removed.
    async fn remove(&self, key: &str) -> Result<bool, StoreError>;

    /// Identifier for logs ("redis", "memory", "redis+fallback")
    fn backend_name(&self) -> &'static str;
}

/// Shared store handle
pub type SharedStore = Arc<dyn CounterStore>;

// ============================================================================
// Startup Capability Probe
// ============================================================================

/// Select and wire the counter-store backend for this process.
///
/// If a store URL is configured, the backend is probed once (a `PING` within
/// the configured timeout). A reachable primary is wrapped in a
/// [`FallbackStore`] so later per-operation failures degrade instead of
/// erroring; an unreachable one drops the process into in-process mode
/// immediately. No URL means in-process mode by choice.
///
/// Either way this function returns a usable store - infrastructure state
/// never prevents startup. The in-process side gets its hourly eviction
/// sweeper spawned here; it runs for the life of the process.
pub async fn connect(config: &SecurityConfig, clock: SharedClock) -> SharedStore {
    let memory = Arc::new(MemoryCounterStore::new(clock));
    spawn_sweeper(Arc::clone(&memory), SWEEP_INTERVAL);

    let Some(url) = config.store_url.as_deref() else {
        tracing::info!(backend = "memory", "No counter store configured, using in-process store");
        return memory;
    };

    match RedisCounterStore::connect(url, config.store_timeout).await {
        Ok(primary) => {
            tracing::info!(backend = "redis", "Counter store connected");
            Arc::new(FallbackStore::new(primary, memory))
        }
        Err(err) => {
            crate::audit_event!(
                AuditEvent::StoreDegraded,
                error = %err,
                "Counter store unreachable at startup, using in-process store"
            );
            memory
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;

    #[tokio::test]
    async fn test_connect_without_url_uses_memory() {
        let config = SecurityConfig::builder()
            .signing_secret("kX9!mQ2@vR7#bN4$wL8%hT3^jD6&fG1*")
            .build()
            .unwrap();

        let store = connect(&config, system_clock()).await;
        assert_eq!(store.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_connect_with_unreachable_url_degrades_to_memory() {
        let config = SecurityConfig::builder()
            .signing_secret("kX9!mQ2@vR7#bN4$wL8%hT3^jD6&fG1*")
            .store_url("redis://127.0.0.1:1")
            .store_timeout(Duration::from_millis(100))
            .build()
            .unwrap();

        // Probe failure must select the fallback, not crash startup
        let store = connect(&config, system_clock()).await;
        assert_eq!(store.backend_name(), "memory");

        // And the degraded store must still serve requests
        let counter = store.increment("probe", Duration::from_secs(60)).await.unwrap();
        assert_eq!(counter.count, 1);
    }
}
