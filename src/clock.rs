//! Clock abstraction for TTL-bearing components.
//!
//! The in-process fallback store, the authenticator's lockout checks, and the
//! CSRF guard all compare timestamps against "now". Injecting the clock lets
//! tests simulate TTL expiry deterministically instead of sleeping through
//! real windows.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Source of the current time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Production clock backed by the system time.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Default shared system clock
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// Manually advanced clock for tests.
///
/// Starts at the real current time and only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<std::sync::RwLock<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a manual clock pinned to the current instant
    pub fn new() -> Self {
        Self {
            now: Arc::new(std::sync::RwLock::new(Utc::now())),
        }
    }

    /// Advance the clock by the given duration
    pub fn advance(&self, duration: chrono::Duration) {
        let mut now = self.now.write().expect("clock lock poisoned");
        *now += duration;
    }

    /// Advance the clock by whole seconds
    pub fn advance_secs(&self, secs: i64) {
        self.advance(chrono::Duration::seconds(secs));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().expect("clock lock poisoned")
    }
}
