//! Secure Error Handling
//!
//! Error types for the authentication and request-protection stack, designed
//! to prevent information leakage while staying debuggable.
//!
//! # Security Rationale
//!
//! Error messages can leak sensitive information:
//! - Distinguishing "unknown email" from "wrong password" enables account
//!   enumeration
//! - Database errors reveal schema details
//! - Infrastructure failures reveal deployment topology
//!
//! This module therefore draws three hard lines:
//! - Authentication failures collapse to one generic outward message; the
//!   internal distinction is logged, never returned.
//! - Authorization failures (valid session, insufficient role) are a distinct
//!   `forbidden` signal, separate from authentication failure.
//! - Rate-limit and CSRF rejections are explicit, structured rejections with
//!   machine-readable codes, not generic 500s.
//!
//! Configuration problems (missing or short signing secret) use a separate
//! [`ConfigError`] type returned from constructors, so a misconfigured
//! deployment fails at startup instead of failing requests one at a time.
//!
//! # Usage
//!
//! ```ignore
//! use portcullis::error::AppError;
//!
//! async fn handler() -> Result<String, AppError> {
//!     let user = lookup(&id).await.ok_or_else(|| AppError::not_found("No such member"))?;
//!     Ok(user.email)
//! }
//! ```

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::fmt;

// ============================================================================
// Configuration Errors
// ============================================================================

/// Startup-time configuration error.
///
/// Returned from component constructors (`TokenCodec::new`,
/// `SecurityConfig::from_env`). These must never be swallowed: a component
/// that fails to construct must prevent the affected feature from starting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required setting is absent from the environment
    Missing { name: &'static str },
    /// The signing secret is shorter than the required minimum
    SecretTooShort { actual: usize, minimum: usize },
    /// The signing secret contains a well-known weak pattern
    SecretWeakPattern { pattern: String },
    /// A setting is present but unparseable
    Invalid { name: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { name } => {
                write!(f, "required configuration '{}' is not set", name)
            }
            Self::SecretTooShort { actual, minimum } => {
                write!(
                    f,
                    "signing secret is {} characters, minimum is {}",
                    actual, minimum
                )
            }
            Self::SecretWeakPattern { pattern } => {
                write!(f, "signing secret contains weak pattern '{}'", pattern)
            }
            Self::Invalid { name, reason } => {
                write!(f, "configuration '{}' is invalid: {}", name, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Application Errors
// ============================================================================

/// Error categories with their HTTP mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request (400) - safe to expose details
    BadRequest,
    /// Authentication failed or missing (401) - always generic outward
    Unauthorized,
    /// Authenticated but not allowed (403)
    Forbidden,
    /// CSRF token missing, expired, or mismatched (403)
    CsrfRejected,
    /// Resource doesn't exist (404)
    NotFound,
    /// Input failed validation (422) - safe to expose details
    Validation,
    /// Request quota exhausted (429)
    RateLimited,
    /// Unexpected internal failure (500) - details logged, never exposed
    Internal,
}

impl ErrorKind {
    /// HTTP status code for this error kind
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::CsrfRejected => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller-supplied message can be exposed as-is
    pub fn expose_message(&self) -> bool {
        !matches!(self, Self::Forbidden | Self::Internal)
    }

    /// Stable machine-readable code for API clients
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::Unauthorized => "authentication_failed",
            Self::Forbidden => "forbidden",
            Self::CsrfRejected => "csrf_rejected",
            Self::NotFound => "not_found",
            Self::Validation => "validation_error",
            Self::RateLimited => "rate_limited",
            Self::Internal => "internal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Application error with secure response mapping.
///
/// Internal details are logged when the response is rendered; what reaches
/// the client depends on [`ErrorKind::expose_message`]. Constructors for the
/// sensitive kinds (`authentication_failed`, `csrf_rejected`) already pin the
/// outward message to a stable generic string, so callers cannot leak the
/// internal reason by accident.
#[derive(Debug)]
pub struct AppError {
    /// Category; determines status code and exposure policy
    pub kind: ErrorKind,
    /// Message shown to the caller when the kind allows it
    pub message: String,
    /// Internal context, logged but never exposed
    pub details: Option<String>,
    /// Underlying error, kept for logging
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Seconds the client should wait before retrying (429 responses)
    pub retry_after: Option<u64>,
}

impl AppError {
    /// Create a new error of the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            source: None,
            retry_after: None,
        }
    }

    /// Malformed request (400)
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    /// Credential verification failure (401).
    ///
    /// The outward message is always the same generic string regardless of
    /// whether the email was unknown, the password wrong, or the account
    /// locked or inactive. The argument is kept as internal detail for the
    /// operator log only.
    pub fn authentication_failed(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, "Invalid email or password").with_details(detail)
    }

    /// Missing or invalid session (401)
    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, "Authentication required").with_details(detail)
    }

    /// Insufficient privileges (403)
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    /// CSRF validation failure (403)
    pub fn csrf_rejected(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::CsrfRejected, "Request could not be verified").with_details(reason)
    }

    /// Missing resource (404)
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Validation failure (422)
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Rate limit exceeded (429)
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        let mut err = Self::new(
            ErrorKind::RateLimited,
            format!("Too many requests. Try again in {} seconds.", retry_after_secs),
        );
        err.retry_after = Some(retry_after_secs);
        err
    }

    /// Internal failure (500) with source
    pub fn internal(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind: ErrorKind::Internal,
            message: message.into(),
            details: Some(source.to_string()),
            source: Some(Box::new(source)),
            retry_after: None,
        }
    }

    /// Internal failure (500) without a source error
    pub fn internal_msg(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attach internal context (logged, never exposed)
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    fn log(&self) {
        let details = self.details.as_deref().unwrap_or("none");
        match self.kind {
            ErrorKind::Internal => {
                tracing::error!(
                    error_kind = %self.kind,
                    message = %self.message,
                    details = %details,
                    "Internal error"
                );
            }
            ErrorKind::Unauthorized | ErrorKind::Forbidden | ErrorKind::CsrfRejected => {
                tracing::warn!(
                    error_kind = %self.kind,
                    details = %details,
                    "Request rejected"
                );
            }
            _ => {
                tracing::debug!(
                    error_kind = %self.kind,
                    message = %self.message,
                    "Client error"
                );
            }
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        // Should have been caught at startup; if one leaks to request time,
        // fail the request closed without echoing the reason.
        AppError::internal("Configuration error", err)
    }
}

impl From<crate::store::StoreError> for AppError {
    fn from(err: crate::store::StoreError) -> Self {
        AppError::internal("Counter store error", err)
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        // Never expose database details to the caller
        AppError::internal("Database error", err)
    }
}

// ============================================================================
// Error Response
// ============================================================================

/// JSON body rendered for every error response
#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorResponse {
    /// Machine-readable code (`authentication_failed`, `rate_limited`, ...)
    pub error: &'static str,
    /// Human-readable message, generic for sensitive kinds
    pub message: String,
    /// Seconds until the client may retry (rate limiting only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.kind.status_code();
        let message = if self.kind.expose_message() {
            self.message.clone()
        } else {
            match self.kind {
                ErrorKind::Forbidden => "Access denied".to_string(),
                _ => "An internal error occurred".to_string(),
            }
        };

        let body = ErrorResponse {
            error: self.kind.code(),
            message,
            retry_after: self.retry_after,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = self.retry_after {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Result alias for handlers returning [`AppError`]
pub type Result<T> = std::result::Result<T, AppError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ErrorKind::BadRequest.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorKind::CsrfRejected.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorKind::RateLimited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorKind::Internal.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_exposure_policy() {
        assert!(ErrorKind::BadRequest.expose_message());
        assert!(ErrorKind::Validation.expose_message());
        assert!(!ErrorKind::Forbidden.expose_message());
        assert!(!ErrorKind::Internal.expose_message());
    }

    #[test]
    fn test_authentication_failure_is_generic() {
        // Different internal reasons, identical outward message
        let unknown = AppError::authentication_failed("no record for email");
        let wrong = AppError::authentication_failed("password mismatch");
        let locked = AppError::authentication_failed("account locked");

        assert_eq!(unknown.message, wrong.message);
        assert_eq!(wrong.message, locked.message);
        assert_ne!(unknown.details, wrong.details);
    }

    #[test]
    fn test_rate_limited_carries_retry_after() {
        let err = AppError::rate_limited(120);
        assert_eq!(err.retry_after, Some(120));
        assert_eq!(err.kind, ErrorKind::RateLimited);
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::SecretTooShort { actual: 10, minimum: 32 };
        assert!(err.to_string().contains("10"));
        assert!(err.to_string().contains("32"));

        let err = ConfigError::Missing { name: "SESSION_SIGNING_SECRET" };
        assert!(err.to_string().contains("SESSION_SIGNING_SECRET"));
    }

    #[test]
    fn test_error_display() {
        let err = AppError::not_found("No such member");
        assert_eq!(format!("{}", err), "not_found: No such member");
    }
}
