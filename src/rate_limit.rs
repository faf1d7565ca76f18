//! Request Rate Limiting
//!
//! Per-identifier request quotas over sliding windows, counted on the shared
//! counter store so limits hold across portal instances (and degrade to
//! per-instance limits when the store falls back).
//!
//! # Window Semantics
//!
//! A window is defined by its reset time: the first request for an
//! identifier creates the counter with the policy's TTL, and every later
//! request inherits that window. Counting is a single atomic increment on
//! the store followed by a threshold check - there is no read-then-write, so
//! two concurrent "first" requests observe counts 1 and 2, never both 1.
//! Once the TTL lapses the key is gone and the next request starts a fresh
//! window.
//!
//! # Policies
//!
//! | Policy | Limit | Window | Use |
//! |---|---|---|---|
//! | strict | 10 | 15 min | login and other credential endpoints |
//! | moderate | 100 | 15 min | general authenticated API |
//! | relaxed | 500 | 15 min | public read-only endpoints |
//!
//! # Usage
//!
//! ```ignore
//! use portcullis::rate_limit::{RateLimiter, RateLimitPolicy, rate_limit_middleware, RateLimitState};
//!
//! let limiter = Arc::new(RateLimiter::new(store));
//! let app = Router::new()
//!     .route("/login", post(login))
//!     .layer(axum::middleware::from_fn_with_state(
//!         RateLimitState { limiter, policy: RateLimitPolicy::strict() },
//!         rate_limit_middleware,
//!     ));
//! ```

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::audit::{extract_client_ip, AuditEvent};
use crate::error::AppError;
use crate::store::SharedStore;

// ============================================================================
// Policies
// ============================================================================

/// A named quota: so many requests per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Policy name, part of the counter key and the logs
    pub name: &'static str,
    /// Requests allowed per window
    pub max_requests: u64,
    /// Window length
    pub window: Duration,
}

impl RateLimitPolicy {
    /// Login and other credential endpoints: 10 requests / 15 minutes.
    pub const fn strict() -> Self {
        Self {
            name: "strict",
            max_requests: 10,
            window: Duration::from_secs(15 * 60),
        }
    }

    /// General authenticated API: 100 requests / 15 minutes.
    pub const fn moderate() -> Self {
        Self {
            name: "moderate",
            max_requests: 100,
            window: Duration::from_secs(15 * 60),
        }
    }

    /// Public endpoints: 500 requests / 15 minutes.
    pub const fn relaxed() -> Self {
        Self {
            name: "relaxed",
            max_requests: 500,
            window: Duration::from_secs(15 * 60),
        }
    }
}

// ============================================================================
// Limiter
// ============================================================================

/// Outcome of a quota check.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// The policy's limit, echoed for response headers
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// When the current window resets
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, at least 1.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        (self.reset_at - now).num_seconds().max(1) as u64
    }
}

/// Enforces request quotas on the shared counter store.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: SharedStore,
}

impl RateLimiter {
    /// Build a limiter over a counter store.
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Count one request for `identifier` under `policy` and decide.
    ///
    /// The increment happens before the check and is never rolled back:
    /// rejected requests still consume nothing further (the rejection is
    /// based on the count exceeding the limit), and the window's reset time
    /// is fixed when its first request creates the counter.
    pub async fn check_and_consume(
        &self,
        identifier: &str,
        policy: &RateLimitPolicy,
    ) -> Result<RateLimitDecision, AppError> {
        let key = format!("rate:{}:{}", policy.name, identifier);
        let counter = self.store.increment(&key, policy.window).await?;

        if counter.count > policy.max_requests {
            crate::audit_event!(
                AuditEvent::RateLimitExceeded,
                actor = %identifier,
                policy = policy.name,
                count = counter.count,
                limit = policy.max_requests,
                "Rate limit exceeded"
            );
            return Ok(RateLimitDecision {
                allowed: false,
                limit: policy.max_requests,
                remaining: 0,
                reset_at: counter.reset_at,
            });
        }

        Ok(RateLimitDecision {
            allowed: true,
            limit: policy.max_requests,
            remaining: policy.max_requests - counter.count,
            reset_at: counter.reset_at,
        })
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// State handed to [`rate_limit_middleware`]: the limiter plus the policy
/// for this route class.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    /// Shared limiter
    pub limiter: Arc<RateLimiter>,
    /// Policy applied to every request through this layer
    pub policy: RateLimitPolicy,
}

/// Quota-enforcing middleware.
///
/// Allowed responses gain `X-RateLimit-Limit`, `X-RateLimit-Remaining`, and
/// `X-RateLimit-Reset` (Unix seconds). Rejections are a structured 429 with
/// `Retry-After`.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let identifier = extract_client_ip(&request);

    let decision = match state
        .limiter
        .check_and_consume(&identifier, &state.policy)
        .await
    {
        Ok(decision) => decision,
        Err(err) => return err.into_response(),
    };

    if !decision.allowed {
        return AppError::rate_limited(decision.retry_after_secs(Utc::now())).into_response();
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    if let Ok(value) = decision.limit.to_string().parse() {
        headers.insert("X-RateLimit-Limit", value);
    }
    if let Ok(value) = decision.remaining.to_string().parse() {
        headers.insert("X-RateLimit-Remaining", value);
    }
    if let Ok(value) = decision.reset_at.timestamp().to_string().parse() {
        headers.insert("X-RateLimit-Reset", value);
    }
    response
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::store::MemoryCounterStore;

    fn limiter_with_clock() -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new();
        let store = Arc::new(MemoryCounterStore::new(Arc::new(clock.clone())));
        (RateLimiter::new(store), clock)
    }

    #[tokio::test]
    async fn test_exactly_n_requests_allowed() {
        let (limiter, _clock) = limiter_with_clock();
        let policy = RateLimitPolicy::strict();

        for i in 1..=policy.max_requests {
            let decision = limiter.check_and_consume("10.0.0.1", &policy).await.unwrap();
            assert!(decision.allowed, "request {} should be allowed", i);
            assert_eq!(decision.remaining, policy.max_requests - i);
        }

        let decision = limiter.check_and_consume("10.0.0.1", &policy).await.unwrap();
        assert!(!decision.allowed, "request {} must be rejected", policy.max_requests + 1);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn test_window_resets_after_reset_at() {
        let (limiter, clock) = limiter_with_clock();
        let policy = RateLimitPolicy::strict();

        for _ in 0..=policy.max_requests {
            limiter.check_and_consume("10.0.0.1", &policy).await.unwrap();
        }
        assert!(!limiter
            .check_and_consume("10.0.0.1", &policy)
            .await
            .unwrap()
            .allowed);

        // Just before the reset: still rejected
        clock.advance_secs(policy.window.as_secs() as i64 - 1);
        assert!(!limiter
            .check_and_consume("10.0.0.1", &policy)
            .await
            .unwrap()
            .allowed);

        // Past the reset: fresh window, allowed again
        clock.advance_secs(2);
        let decision = limiter.check_and_consume("10.0.0.1", &policy).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, policy.max_requests - 1);
    }

    #[tokio::test]
    async fn test_identifiers_are_independent() {
        let (limiter, _clock) = limiter_with_clock();
        let policy = RateLimitPolicy::strict();

        for _ in 0..=policy.max_requests {
            limiter.check_and_consume("10.0.0.1", &policy).await.unwrap();
        }
        assert!(!limiter
            .check_and_consume("10.0.0.1", &policy)
            .await
            .unwrap()
            .allowed);

        // A different identifier is untouched
        assert!(limiter
            .check_and_consume("10.0.0.2", &policy)
            .await
            .unwrap()
            .allowed);
    }

    #[tokio::test]
    async fn test_policies_are_keyed_separately() {
        let (limiter, _clock) = limiter_with_clock();

        // Exhaust strict for this identifier
        let strict = RateLimitPolicy::strict();
        for _ in 0..=strict.max_requests {
            limiter.check_and_consume("10.0.0.1", &strict).await.unwrap();
        }
        assert!(!limiter
            .check_and_consume("10.0.0.1", &strict)
            .await
            .unwrap()
            .allowed);

        // Moderate traffic from the same identifier still flows
        let moderate = RateLimitPolicy::moderate();
        assert!(limiter
            .check_and_consume("10.0.0.1", &moderate)
            .await
            .unwrap()
            .allowed);
    }

    #[tokio::test]
    async fn test_retry_after_bounded_by_window() {
        let (limiter, clock) = limiter_with_clock();
        let policy = RateLimitPolicy::strict();

        for _ in 0..=policy.max_requests {
            limiter.check_and_consume("10.0.0.1", &policy).await.unwrap();
        }
        let decision = limiter.check_and_consume("10.0.0.1", &policy).await.unwrap();
        assert!(!decision.allowed);

        let retry_after = decision.retry_after_secs(clock.now());
        assert!(retry_after >= 1);
        assert!(retry_after <= policy.window.as_secs());
    }

    #[test]
    fn test_named_policies() {
        assert_eq!(RateLimitPolicy::strict().max_requests, 10);
        assert_eq!(RateLimitPolicy::moderate().max_requests, 100);
        assert_eq!(RateLimitPolicy::relaxed().max_requests, 500);
        assert_eq!(RateLimitPolicy::strict().window, Duration::from_secs(900));
    }
}
