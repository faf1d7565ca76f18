//! In-process fallback store
//!
//! Process-local implementation of [`CounterStore`] backing degraded-mode
//! operation (and small single-instance deployments). Entries live in one
//! map guarded by an `RwLock`; every mutation takes the write lock, which
//! gives per-key atomicity for increments without a distributed primitive.
//!
//! Entries carry their expiry inline and are treated as absent once past it,
//! but nothing enforces TTL in the background - [`spawn_sweeper`] runs the
//! periodic eviction pass (hourly by default) so abandoned rate-limit
//! windows, CSRF entries, and activity counters don't accumulate forever.
//!
//! The clock is injected so tests can cross TTL boundaries without sleeping.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::{Counter, CounterStore, StoreError};
use crate::clock::SharedClock;

/// Default interval between eviction sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
enum Slot {
    Counter(u64),
    Text(String),
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: DateTime<Utc>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// In-process [`CounterStore`] implementation.
#[derive(Debug)]
pub struct MemoryCounterStore {
    entries: RwLock<HashMap<String, Entry>>,
    clock: SharedClock,
}

impl MemoryCounterStore {
    /// Create an empty store using the given clock.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Evict every expired entry. Called by the sweeper; safe to call at any
    /// time.
    pub fn sweep(&self) {
        let now = self.clock.now();
        let mut entries = self.entries.write().expect("store lock poisoned");
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let evicted = before - entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = entries.len(), "Swept in-process store");
        }
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        let entries = self.entries.read().expect("store lock poisoned");
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    /// Whether the store holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ttl_to_expiry(&self, ttl: Duration) -> DateTime<Utc> {
        // TTLs here are bounded (minutes to a day); an out-of-range value is
        // capped rather than wrapped
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(3650));
        self.clock.now() + ttl
    }
}

/// Spawn the periodic eviction task for a store.
///
/// Runs until the returned handle is aborted or the runtime shuts down.
pub fn spawn_sweeper(
    store: Arc<MemoryCounterStore>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; skip it so the sweep cadence starts
        // one interval from now.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            store.sweep();
        }
    })
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<Counter, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().expect("store lock poisoned");

        // Single mutation path under the write lock: the expiry check and
        // the increment cannot interleave with another caller, so two
        // concurrent requests never both observe count 1.
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                let count = match &mut entry.slot {
                    Slot::Counter(n) => {
                        *n += 1;
                        *n
                    }
                    Slot::Text(_) => {
                        // Key reused across kinds; restart as a counter
                        entry.slot = Slot::Counter(1);
                        1
                    }
                };
                Ok(Counter { count, reset_at: entry.expires_at })
            }
            _ => {
                let expires_at = self.ttl_to_expiry(ttl);
                entries.insert(
                    key.to_string(),
                    Entry { slot: Slot::Counter(1), expires_at },
                );
                Ok(Counter { count: 1, reset_at: expires_at })
            }
        }
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = self.ttl_to_expiry(ttl);
        let mut entries = self.entries.write().expect("store lock poisoned");
        entries.insert(
            key.to_string(),
            Entry { slot: Slot::Text(value.to_string()), expires_at },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();

        let expired = {
            let entries = self.entries.read().expect("store lock poisoned");
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    return Ok(match &entry.slot {
                        Slot::Text(s) => Some(s.clone()),
                        Slot::Counter(n) => Some(n.to_string()),
                    });
                }
                Some(_) => true,
                None => false,
            }
        };

        // Evict the expired entry we just saw (re-checked under the write
        // lock in case it was replaced meanwhile).
        if expired {
            let mut entries = self.entries.write().expect("store lock poisoned");
            if entries.get(key).is_some_and(|e| e.is_expired(now)) {
                entries.remove(key);
            }
        }
        Ok(None)
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().expect("store lock poisoned");
        match entries.remove(key) {
            Some(entry) => Ok(!entry.is_expired(now)),
            None => Ok(false),
        }
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

// ============================================================================
// Tests
// ============================================================================
