//! Authentication Endpoints
//!
//! The HTTP surface of the subsystem: login, session check, logout, and
//! CSRF token issuance. Everything else in the portal consumes sessions
//! through the middleware in [`crate::session`]; these handlers are the only
//! places tokens are minted or cookies touched.
//!
//! # Response Contract
//!
//! - **Login** sets the session token as an `HttpOnly`/`Secure`/
//!   `SameSite=Strict` cookie *and* returns it in the body for non-cookie
//!   clients. Every refusal is the same generic 401 - the response never
//!   reveals whether the email exists.
//! - **Session check** returns the verified claims or the structured 401.
//! - **Logout** clears the cookie (`Max-Age=0`) and invalidates nothing
//!   server-side; tokens are stateless.
//! - Login sits behind the `strict` rate-limit policy.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use std::sync::Arc;

use crate::audit::{AuditEvent, ClientInfo};
use crate::authn::Authenticator;
use crate::credentials::AuthenticatedUser;
use crate::csrf::CsrfGuard;
use crate::error::AppError;
use crate::rate_limit::{rate_limit_middleware, RateLimitPolicy, RateLimitState, RateLimiter};
use crate::session::{
    clear_session_cookie, require_session, session_cookie, CurrentSession, SessionVerifier,
};
use crate::token::TokenCodec;

// ============================================================================
// State
// ============================================================================

/// Everything the authentication endpoints need, assembled at startup.
#[derive(Debug, Clone)]
pub struct AuthState {
    /// Credential verification with lockout
    pub authenticator: Arc<Authenticator>,
    /// Token mint
    pub codec: Arc<TokenCodec>,
    /// Token verification with live re-check
    pub verifier: Arc<SessionVerifier>,
    /// Anti-forgery tokens
    pub csrf: Arc<CsrfGuard>,
    /// Request quotas
    pub limiter: Arc<RateLimiter>,
    /// Whether cookies carry the `Secure` attribute
    pub cookie_secure: bool,
}

/// Build the authentication router.
///
/// `/auth/login` is rate-limited with the `strict` policy;
/// `/auth/session` and `/auth/csrf` require a valid session.
pub fn routes(state: AuthState) -> Router {
    let protected = Router::new()
        .route("/auth/session", get(session_check))
        .route("/auth/csrf", get(issue_csrf_token))
        .route_layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state.verifier),
            require_session,
        ))
        .with_state(state.clone());

    let public = Router::new()
        .route("/auth/login", post(login))
        .route_layer(axum::middleware::from_fn_with_state(
            RateLimitState {
                limiter: Arc::clone(&state.limiter),
                policy: RateLimitPolicy::strict(),
            },
            rate_limit_middleware,
        ))
        .route("/auth/logout", post(logout))
        .with_state(state);

    protected.merge(public)
}

// ============================================================================
// Login
// ============================================================================

/// Login request body.
#[derive(Debug, serde::Deserialize)]
pub struct LoginRequest {
    /// Member email; normalized before lookup
    pub email: String,
    /// Candidate password
    pub password: String,
    /// Extends the session from 7 to 30 days
    #[serde(default)]
    pub remember_me: bool,
}

/// Login response body.
#[derive(Debug, serde::Serialize)]
pub struct LoginResponse {
    /// The session token, for clients that cannot use the cookie
    pub token: String,
    /// Token lifetime in seconds
    pub expires_in: u64,
    /// The authenticated member
    pub user: AuthenticatedUser,
}

async fn login(
    State(state): State<AuthState>,
    headers: HeaderMap,
    Json(input): Json<LoginRequest>,
) -> Result<Response, AppError> {
    if input.email.trim().is_empty() || input.password.is_empty() {
        return Err(AppError::bad_request("Email and password are required"));
    }

    let client = ClientInfo::from_headers(&headers);

    let user = state
        .authenticator
        .authenticate(&input.email, &input.password, &client)
        .await?
        .ok_or_else(|| AppError::authentication_failed("credentials rejected"))?;

    let token = state.codec.issue(&user, input.remember_me)?;
    let lifetime = state.codec.lifetime(input.remember_me);

    crate::audit_event!(
        AuditEvent::TokenIssued,
        actor = %user.id,
        remember_me = input.remember_me,
        client_ip = %client.ip,
        "Session token issued"
    );

    let body = LoginResponse {
        token: token.clone(),
        expires_in: lifetime.as_secs(),
        user,
    };

    let cookie = session_cookie(&token, lifetime, state.cookie_secure);
    let mut response = (StatusCode::OK, Json(body)).into_response();
    response.headers_mut().insert(
        header::SET_COOKIE,
        cookie
            .parse()
            .map_err(|_| AppError::internal_msg("session cookie is not a valid header value"))?,
    );
    Ok(response)
}

// ============================================================================
// Session Check
// ============================================================================

/// Session-check response body.
#[derive(Debug, serde::Serialize)]
pub struct SessionResponse {
    /// The verified member
    pub user: AuthenticatedUser,
    /// Token issued-at (Unix seconds)
    pub issued_at: i64,
    /// Token expiry (Unix seconds)
    pub expires_at: i64,
}

async fn session_check(
    Extension(CurrentSession(session)): Extension<CurrentSession>,
) -> Json<SessionResponse> {
    Json(SessionResponse {
        user: session.user,
        issued_at: session.issued_at,
        expires_at: session.expires_at,
    })
}

// ============================================================================
// Logout
// ============================================================================

/// Logout response body.
#[derive(Debug, serde::Serialize)]
pub struct LogoutResponse {
    /// Confirmation message
    pub message: &'static str,
}

async fn logout(
    State(state): State<AuthState>,
    headers: HeaderMap,
    session: Option<Extension<CurrentSession>>,
) -> Result<Response, AppError> {
    if let Some(Extension(CurrentSession(session))) = session {
        let client = ClientInfo::from_headers(&headers);
        crate::audit_event!(
            AuditEvent::UserLogout,
            actor = %session.user.id,
            client_ip = %client.ip,
            "Member signed out"
        );
    }

    // Stateless logout: the cookie goes away, the token simply ages out.
    let cookie = clear_session_cookie(state.cookie_secure);
    let mut response = (
        StatusCode::OK,
        Json(LogoutResponse { message: "Signed out" }),
    )
        .into_response();
    response.headers_mut().insert(
        header::SET_COOKIE,
        cookie
            .parse()
            .map_err(|_| AppError::internal_msg("session cookie is not a valid header value"))?,
    );
    Ok(response)
}

// ============================================================================
// CSRF Token Issuance
// ============================================================================

/// CSRF issuance response body.
#[derive(Debug, serde::Serialize)]
pub struct CsrfResponse {
    /// Token to echo back in `X-CSRF-Token` on state-changing requests
    pub csrf_token: String,
}

async fn issue_csrf_token(
    State(state): State<AuthState>,
    Extension(CurrentSession(session)): Extension<CurrentSession>,
) -> Result<Json<CsrfResponse>, AppError> {
    let csrf_token = state.csrf.generate_token(&session.session_id).await?;
    Ok(Json(CsrfResponse { csrf_token }))
}
