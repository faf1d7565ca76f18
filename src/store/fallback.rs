//! Primary-with-fallback store composition
//!
//! Wraps the distributed primary and the in-process fallback behind one
//! [`CounterStore`] so the rate limiter, CSRF guard, and activity tracker
//! stay backend-agnostic. Every operation tries the primary first; an error
//! or timeout routes the same operation to the in-process map and logs the
//! degradation for operators. Callers never see the failure.
//!
//! While degraded, counts and CSRF entries are only consistent within this
//! process. That is the accepted trade - per-instance limits still hold, and
//! the primary is retried on the next operation rather than being marked
//! dead.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{Counter, CounterStore, MemoryCounterStore, RedisCounterStore, StoreError};
use crate::audit::AuditEvent;

/// Dual-path store: distributed primary, in-process fallback.
#[derive(Debug)]
pub struct FallbackStore {
    primary: RedisCounterStore,
    fallback: Arc<MemoryCounterStore>,
}

impl FallbackStore {
    /// Compose a primary store with its in-process fallback.
    pub fn new(primary: RedisCounterStore, fallback: Arc<MemoryCounterStore>) -> Self {
        Self { primary, fallback }
    }

    /// The in-process side, for wiring the sweeper.
    pub fn fallback(&self) -> Arc<MemoryCounterStore> {
        Arc::clone(&self.fallback)
    }

    fn note_degraded(&self, operation: &'static str, err: &StoreError) {
        crate::audit_event!(
            AuditEvent::StoreDegraded,
            operation = operation,
            error = %err,
            "Counter store operation failed, using in-process fallback"
        );
    }
}

#[async_trait]
impl CounterStore for FallbackStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<Counter, StoreError> {
        match self.primary.increment(key, ttl).await {
            Ok(counter) => Ok(counter),
            Err(err) => {
                self.note_degraded("increment", &err);
                self.fallback.increment(key, ttl).await
            }
        }
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        match self.primary.put(key, value, ttl).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.note_degraded("put", &err);
                self.fallback.put(key, value, ttl).await
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.primary.get(key).await {
            Ok(value) => Ok(value),
            Err(err) => {
                self.note_degraded("get", &err);
                self.fallback.get(key).await
            }
        }
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        match self.primary.remove(key).await {
            Ok(removed) => Ok(removed),
            Err(err) => {
                self.note_degraded("remove", &err);
                self.fallback.remove(key).await
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "redis+fallback"
    }
}

// ============================================================================
// Tests
// ============================================================================
