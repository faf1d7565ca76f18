//! CSRF Protection
//!
//! Per-session anti-forgery tokens for state-changing requests. A token is
//! generated when a protected form or SPA view is served, stored against the
//! session id on the shared counter store with a one-hour TTL, and compared
//! on submission.
//!
//! # Validation Contract
//!
//! Validation fails closed on a missing entry, an expired entry, or a value
//! mismatch. Expired entries encountered during validation are actively
//! evicted rather than left to the sweeper. Comparison is an exact string
//! match - CSRF tokens are not password-class secrets, so constant-time
//! comparison is not required, but prefix matches are not acceptable.
//!
//! Tokens are multi-use within their TTL: validation does not consume them,
//! which keeps polling SPAs working. Callers wanting single-use semantics
//! call [`CsrfGuard::invalidate`] after a successful submission.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use rand::{distributions::Alphanumeric, Rng};
use std::sync::Arc;
use std::time::Duration;

use crate::audit::AuditEvent;
use crate::error::AppError;
use crate::session::CurrentSession;
use crate::store::SharedStore;

/// How long a generated token stays valid.
pub const CSRF_TTL: Duration = Duration::from_secs(60 * 60);

/// Header carrying the token on state-changing requests.
pub const CSRF_HEADER: &str = "X-CSRF-Token";

/// Length of each of the two random segments a token is built from.
const SEGMENT_LENGTH: usize = 12;

// ============================================================================
// Guard
// ============================================================================

/// Issues and validates per-session anti-forgery tokens.
#[derive(Debug, Clone)]
pub struct CsrfGuard {
    store: SharedStore,
}

impl CsrfGuard {
    /// Build a guard over a counter store.
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    fn key(session_id: &str) -> String {
        format!("csrf:{}", session_id)
    }

    /// Generate and store a token for a session.
    ///
    /// The token is two concatenated random alphanumeric segments (24
    /// characters total). A fresh call replaces any previous token for the
    /// session and restarts the TTL.
    pub async fn generate_token(&self, session_id: &str) -> Result<String, AppError> {
        let token = format!(
            "{}{}",
            random_segment(SEGMENT_LENGTH),
            random_segment(SEGMENT_LENGTH)
        );
        self.store
            .put(&Self::key(session_id), &token, CSRF_TTL)
            .await?;
        Ok(token)
    }

    /// Validate a submitted token for a session.
    ///
    /// `false` for a missing entry, an expired entry (the store evicts
    /// expired entries on read), or any value mismatch.
    pub async fn validate_token(
        &self,
        session_id: &str,
        candidate: &str,
    ) -> Result<bool, AppError> {
        let Some(stored) = self.store.get(&Self::key(session_id)).await? else {
            return Ok(false);
        };
        Ok(stored == candidate)
    }

    /// Drop a session's token. Returns whether one existed.
    pub async fn invalidate(&self, session_id: &str) -> Result<bool, AppError> {
        Ok(self.store.remove(&Self::key(session_id)).await?)
    }
}

fn random_segment(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

// ============================================================================
// Middleware
// ============================================================================

/// Anti-forgery middleware for state-changing methods.
///
/// `GET`/`HEAD`/`OPTIONS` pass through untouched. Everything else must
/// carry a valid [`CSRF_HEADER`] for the verified session, so this layer
/// belongs after `require_session`.
pub async fn csrf_middleware(
    State(guard): State<Arc<CsrfGuard>>,
    request: Request,
    next: Next,
) -> Response {
    if matches!(request.method().as_str(), "GET" | "HEAD" | "OPTIONS") {
        return next.run(request).await;
    }

    let Some(CurrentSession(session)) = request.extensions().get::<CurrentSession>().cloned()
    else {
        return AppError::unauthorized("no verified session on request").into_response();
    };

    let Some(candidate) = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        crate::audit_event!(
            AuditEvent::CsrfRejected,
            actor = %session.user.id,
            detail = "token header missing",
            "CSRF validation failed"
        );
        return AppError::csrf_rejected("token header missing").into_response();
    };

    match guard.validate_token(&session.session_id, &candidate).await {
        Ok(true) => next.run(request).await,
        Ok(false) => {
            crate::audit_event!(
                AuditEvent::CsrfRejected,
                actor = %session.user.id,
                detail = "token missing, expired, or mismatched",
                "CSRF validation failed"
            );
            AppError::csrf_rejected("token missing, expired, or mismatched").into_response()
        }
        Err(err) => err.into_response(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryCounterStore;

    fn guard_with_clock() -> (CsrfGuard, ManualClock) {
        let clock = ManualClock::new();
        let store = Arc::new(MemoryCounterStore::new(Arc::new(clock.clone())));
        (CsrfGuard::new(store), clock)
    }

    #[tokio::test]
    async fn test_roundtrip_validates() {
        let (guard, _clock) = guard_with_clock();

        let token = guard.generate_token("sess-1").await.unwrap();
        assert!(guard.validate_token("sess-1", &token).await.unwrap());
    }

    #[tokio::test]
    async fn test_token_shape() {
        let (guard, _clock) = guard_with_clock();

        let token = guard.generate_token("sess-1").await.unwrap();
        assert_eq!(token.len(), 2 * SEGMENT_LENGTH);
        assert!(token.len() >= 20);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn test_mismatch_rejected() {
        let (guard, _clock) = guard_with_clock();

        let token = guard.generate_token("sess-1").await.unwrap();
        assert!(!guard.validate_token("sess-1", "different-token").await.unwrap());

        // Prefix of the real token is not a match
        assert!(!guard
            .validate_token("sess-1", &token[..token.len() - 1])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_wrong_session_rejected() {
        let (guard, _clock) = guard_with_clock();

        let token = guard.generate_token("sess-1").await.unwrap();
        assert!(!guard.validate_token("sess-2", &token).await.unwrap());
    }

    #[tokio::test]
    async fn test_expires_after_ttl() {
        let (guard, clock) = guard_with_clock();

        let token = guard.generate_token("sess-1").await.unwrap();
        clock.advance_secs(CSRF_TTL.as_secs() as i64 + 1);

        assert!(!guard.validate_token("sess-1", &token).await.unwrap());
    }

    #[tokio::test]
    async fn test_multi_use_within_ttl() {
        let (guard, _clock) = guard_with_clock();

        let token = guard.generate_token("sess-1").await.unwrap();
        // Validation does not consume the token
        assert!(guard.validate_token("sess-1", &token).await.unwrap());
        assert!(guard.validate_token("sess-1", &token).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalidate_consumes() {
        let (guard, _clock) = guard_with_clock();

        let token = guard.generate_token("sess-1").await.unwrap();
        assert!(guard.invalidate("sess-1").await.unwrap());
        assert!(!guard.validate_token("sess-1", &token).await.unwrap());
        assert!(!guard.invalidate("sess-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_regeneration_replaces() {
        let (guard, _clock) = guard_with_clock();

        let first = guard.generate_token("sess-1").await.unwrap();
        let second = guard.generate_token("sess-1").await.unwrap();

        assert_ne!(first, second);
        assert!(!guard.validate_token("sess-1", &first).await.unwrap());
        assert!(guard.validate_token("sess-1", &second).await.unwrap());
    }
}
