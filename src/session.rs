//! Session Verification
//!
//! Turns a bearer token into a validated member. Verification is two-phase:
//! the token codec checks signature and expiry, then the member is
//! re-fetched live and must still be active and verified. A deactivated
//! account is rejected even while holding a structurally valid, unexpired
//! token - the token alone is never trusted.
//!
//! # Token Transport
//!
//! Tokens arrive either as the `portal_session` cookie or as an
//! `Authorization: Bearer` header. When both are present **the cookie takes
//! precedence**; this is a deliberate policy, implemented in one place
//! ([`extract_token`]) and pinned by test.
//!
//! # Cookies
//!
//! The session cookie is `HttpOnly`, `SameSite=Strict`, `Secure` (unless
//! disabled for local development), with `Max-Age` matching the token
//! lifetime. Logout is stateless: it clears the cookie with `Max-Age=0` and
//! invalidates nothing server-side.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::Duration;

use crate::audit::AuditEvent;
use crate::credentials::{AuthenticatedUser, CredentialStore, Role};
use crate::error::AppError;
use crate::token::{SessionClaims, TokenCodec};

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "portal_session";

// ============================================================================
// Token Extraction (cookie precedence)
// ============================================================================

/// Where a token was found, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    /// `portal_session` cookie
    Cookie,
    /// `Authorization: Bearer` header
    BearerHeader,
}

/// Extract the session token from a request.
///
/// Checks the cookie first, then the bearer header. The ordering is the
/// crate's transport-precedence policy; do not reorder.
pub fn extract_token(request: &Request) -> Option<(String, TokenSource)> {
    if let Some(cookie_header) = request.headers().get(header::COOKIE) {
        if let Ok(cookies) = cookie_header.to_str() {
            for pair in cookies.split(';') {
                if let Some((name, value)) = pair.trim().split_once('=') {
                    if name == SESSION_COOKIE && !value.is_empty() {
                        return Some((value.to_string(), TokenSource::Cookie));
                    }
                }
            }
        }
    }

    if let Some(auth) = request.headers().get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                if !token.is_empty() {
                    return Some((token.to_string(), TokenSource::BearerHeader));
                }
            }
        }
    }

    None
}

// ============================================================================
// Cookie Builders
// ============================================================================

/// Build the `Set-Cookie` value installing a session token.
pub fn session_cookie(token: &str, max_age: Duration, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Strict",
        SESSION_COOKIE,
        token,
        max_age.as_secs()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Build the `Set-Cookie` value clearing the session cookie.
pub fn clear_session_cookie(secure: bool) -> String {
    let mut cookie = format!(
        "{}=; Path=/; Max-Age=0; HttpOnly; SameSite=Strict",
        SESSION_COOKIE
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

// ============================================================================
// Session Verifier
// ============================================================================

/// A verified session: the live member plus the token claims.
#[derive(Debug, Clone)]
pub struct VerifiedSession {
    /// The member, re-fetched live during verification
    pub user: AuthenticatedUser,
    /// Session identifier (the token's id); keys per-session state such as
    /// CSRF entries
    pub session_id: String,
    /// Token issued-at (Unix seconds)
    pub issued_at: i64,
    /// Token expiry (Unix seconds)
    pub expires_at: i64,
}

/// Validates session tokens against the signing key and the live account.
#[derive(Debug)]
pub struct SessionVerifier {
    codec: Arc<TokenCodec>,
    store: Arc<dyn CredentialStore>,
}

impl SessionVerifier {
    /// Build a verifier from the codec and credential store.
    pub fn new(codec: Arc<TokenCodec>, store: Arc<dyn CredentialStore>) -> Self {
        Self { codec, store }
    }

    /// Verify a token and return the validated session.
    ///
    /// Fails closed (`None`) on: malformed token, bad signature, expired
    /// token, missing member, deactivated member, unverified member. The
    /// live re-fetch makes this an I/O operation even though the token is
    /// self-contained; that is the price of honoring revocation.
    pub async fn verify(&self, token: &str) -> Result<Option<VerifiedSession>, AppError> {
        let claims: SessionClaims = match self.codec.decode(token) {
            Ok(claims) => claims,
            Err(rejection) => {
                crate::audit_event!(
                    AuditEvent::TokenRejected,
                    detail = %rejection,
                    "Session token rejected"
                );
                return Ok(None);
            }
        };

        let Some(user) = self.store.find_by_id(claims.sub).await? else {
            crate::audit_event!(
                AuditEvent::TokenRejected,
                actor = %claims.sub,
                detail = "member no longer exists",
                "Session token rejected"
            );
            return Ok(None);
        };

        if !user.active || !user.verified {
            crate::audit_event!(
                AuditEvent::TokenRejected,
                actor = %user.id,
                detail = "account deactivated or unverified",
                "Session token rejected"
            );
            return Ok(None);
        }

        Ok(Some(VerifiedSession {
            user: AuthenticatedUser::from(&user),
            session_id: claims.jti,
            issued_at: claims.iat,
            expires_at: claims.exp,
        }))
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// Request extension carrying the verified session.
#[derive(Debug, Clone)]
pub struct CurrentSession(pub VerifiedSession);

/// Middleware requiring a valid session on every request it guards.
///
/// On success the verified session is inserted as a [`CurrentSession`]
/// extension; on failure the request is rejected with the generic 401.
pub async fn require_session(
    State(verifier): State<Arc<SessionVerifier>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some((token, _source)) = extract_token(&request) else {
        return AppError::unauthorized("no session token presented").into_response();
    };

    match verifier.verify(&token).await {
        Ok(Some(session)) => {
            request.extensions_mut().insert(CurrentSession(session));
            next.run(request).await
        }
        Ok(None) => AppError::unauthorized("session token rejected").into_response(),
        Err(err) => err.into_response(),
    }
}

/// Middleware requiring the verified member to hold the admin role.
///
/// Must run after [`require_session`]. A valid session without the role is
/// a 403, distinct from the 401 an invalid session gets.
pub async fn require_admin(request: Request, next: Next) -> Response {
    match request.extensions().get::<CurrentSession>() {
        Some(CurrentSession(session)) if session.user.role == Role::Admin => {
            next.run(request).await
        }
        Some(CurrentSession(session)) => {
            crate::audit_event!(
                AuditEvent::TokenRejected,
                actor = %session.user.id,
                detail = "admin role required",
                "Authorization refused"
            );
            AppError::forbidden("Administrator access required").into_response()
        }
        None => AppError::unauthorized("no verified session on request").into_response(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{MemoryCredentialStore, UserRecord};
    use crate::password::hash_password;
    use axum::body::Body;

    const SECRET: &str = "kX9!mQ2@vR7#bN4$wL8%hT3^jD6&fG1*";

    async fn fixture() -> (SessionVerifier, Arc<TokenCodec>, Arc<MemoryCredentialStore>, AuthenticatedUser)
    {
        let codec = Arc::new(TokenCodec::new(SECRET).unwrap());
        let store = Arc::new(MemoryCredentialStore::new());

        let mut record = UserRecord::new(
            "member@example.org",
            hash_password("correct-Horse7-battery").unwrap(),
            Role::Regular,
        );
        record.verified = true;
        let user = AuthenticatedUser::from(&record);
        store.create(record).await.unwrap();

        let verifier = SessionVerifier::new(
            Arc::clone(&codec),
            Arc::clone(&store) as Arc<dyn CredentialStore>,
        );
        (verifier, codec, store, user)
    }

    #[tokio::test]
    async fn test_verify_roundtrip() {
        let (verifier, codec, _store, user) = fixture().await;

        let token = codec.issue(&user, false).unwrap();
        let session = verifier.verify(&token).await.unwrap().unwrap();

        assert_eq!(session.user, user);
        assert!(session.expires_at > session.issued_at);
    }

    #[tokio::test]
    async fn test_garbage_token_fails_closed() {
        let (verifier, _codec, _store, _user) = fixture().await;
        assert!(verifier.verify("garbage").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deactivated_member_rejected_with_valid_token() {
        let (verifier, codec, store, user) = fixture().await;
        let token = codec.issue(&user, false).unwrap();

        // Token verifies while the account is live...
        assert!(verifier.verify(&token).await.unwrap().is_some());

        // ...then the account is deactivated; the same unexpired token must
        // now be rejected.
        store.set_account_flags(user.id, false, true);
        assert!(verifier.verify(&token).await.unwrap().is_none());

        // Reactivated but unverified is equally rejected
        store.set_account_flags(user.id, true, false);
        assert!(verifier.verify(&token).await.unwrap().is_none());

        // Fully restored, the token works again
        store.set_account_flags(user.id, true, true);
        assert!(verifier.verify(&token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cookie_takes_precedence_over_bearer() {
        let (verifier, codec, _store, user) = fixture().await;

        let cookie_token = codec.issue(&user, false).unwrap();
        // The bearer slot carries garbage; if precedence were wrong the
        // request would be rejected.
        let request = Request::builder()
            .header(header::COOKIE, format!("{}={}", SESSION_COOKIE, cookie_token))
            .header(header::AUTHORIZATION, "Bearer not-a-valid-token")
            .body(Body::empty())
            .unwrap();

        let (token, source) = extract_token(&request).unwrap();
        assert_eq!(source, TokenSource::Cookie);
        assert_eq!(token, cookie_token);
        assert!(verifier.verify(&token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bearer_used_when_no_cookie() {
        let (_verifier, codec, _store, user) = fixture().await;
        let token = codec.issue(&user, false).unwrap();

        let request = Request::builder()
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();

        let (extracted, source) = extract_token(&request).unwrap();
        assert_eq!(source, TokenSource::BearerHeader);
        assert_eq!(extracted, token);
    }

    #[test]
    fn test_extract_token_ignores_other_cookies() {
        let request = Request::builder()
            .header(header::COOKIE, "theme=dark; locale=en")
            .body(Body::empty())
            .unwrap();
        assert!(extract_token(&request).is_none());
    }

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session_cookie("tok123", Duration::from_secs(604_800), true);
        assert!(cookie.starts_with("portal_session=tok123"));
        assert!(cookie.contains("Max-Age=604800"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Secure"));

        let dev_cookie = session_cookie("tok123", Duration::from_secs(60), false);
        assert!(!dev_cookie.contains("Secure"));
    }

    #[test]
    fn test_clear_cookie_expires_immediately() {
        let cookie = clear_session_cookie(true);
        assert!(cookie.contains("Max-Age=0"));
        assert!(cookie.starts_with("portal_session=;"));
    }
}
