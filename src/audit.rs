//! Security Audit Logging
//!
//! Structured logging for security-relevant events: logins, lockouts, token
//! issuance failures, verification-email outcomes. Events are emitted through
//! `tracing` so the consuming application decides where they land (stdout,
//! JSON shipper, collector); this crate never buffers or persists them.
//!
//! # Usage
//!
//! ```ignore
//! use portcullis::audit::{AuditEvent, ClientInfo};
//! use portcullis::audit_event;
//!
//! audit_event!(
//!     AuditEvent::UserLogin,
//!     actor = %user.id,
//!     client_ip = %client.ip,
//!     user_agent = %client.user_agent,
//!     "Member signed in"
//! );
//! ```
//!
//! Every event carries the actor identifier, free-text detail, client IP,
//! user agent, and timestamp (supplied by the tracing layer).

use axum::extract::Request;
use std::fmt;

// ============================================================================
// Audit Events
// ============================================================================

/// Security-relevant event categories.
///
/// The first five are the events the portal's logging/notification
/// collaborator consumes; the rest cover escalations this crate raises
/// itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEvent {
    /// Successful member authentication
    UserLogin,
    /// Failed authentication attempt (wrong password, unknown email,
    /// inactive or locked account - the detail field says which)
    UserLoginFailed,
    /// Account locked after repeated failures
    AccountLocked,
    /// Verification email handed to the notifier
    EmailVerificationSent,
    /// Verification email could not be sent or the token was rejected
    EmailVerificationFailed,
    /// Member signed out
    UserLogout,
    /// Session token issued
    TokenIssued,
    /// Session token rejected (bad signature, expired, revoked account)
    TokenRejected,
    /// Request quota exhausted for an identifier
    RateLimitExceeded,
    /// CSRF validation failed
    CsrfRejected,
    /// Per-IP suspicious-activity threshold crossed
    SuspiciousActivity,
    /// IP automatically blocked
    IpBlocked,
    /// Distributed store unreachable, fallback engaged
    StoreDegraded,
}

impl AuditEvent {
    /// Event name as it appears in the structured log stream
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserLogin => "USER_LOGIN",
            Self::UserLoginFailed => "USER_LOGIN_FAILED",
            Self::AccountLocked => "ACCOUNT_LOCKED",
            Self::EmailVerificationSent => "EMAIL_VERIFICATION_SENT",
            Self::EmailVerificationFailed => "EMAIL_VERIFICATION_FAILED",
            Self::UserLogout => "USER_LOGOUT",
            Self::TokenIssued => "TOKEN_ISSUED",
            Self::TokenRejected => "TOKEN_REJECTED",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::CsrfRejected => "CSRF_REJECTED",
            Self::SuspiciousActivity => "SUSPICIOUS_ACTIVITY",
            Self::IpBlocked => "IP_BLOCKED",
            Self::StoreDegraded => "STORE_DEGRADED",
        }
    }

    /// Grouping for filtering downstream
    pub fn category(&self) -> &'static str {
        match self {
            Self::UserLogin | Self::UserLoginFailed | Self::UserLogout => "authentication",
            Self::AccountLocked | Self::SuspiciousActivity | Self::IpBlocked => "security",
            Self::EmailVerificationSent | Self::EmailVerificationFailed => "verification",
            Self::TokenIssued | Self::TokenRejected => "session",
            Self::RateLimitExceeded | Self::CsrfRejected => "protection",
            Self::StoreDegraded => "infrastructure",
        }
    }

    /// Severity drives which tracing level the event is emitted at
    pub fn severity(&self) -> Severity {
        match self {
            Self::SuspiciousActivity | Self::IpBlocked => Severity::Critical,

            Self::UserLoginFailed
            | Self::AccountLocked
            | Self::TokenRejected
            | Self::RateLimitExceeded
            | Self::CsrfRejected
            | Self::EmailVerificationFailed
            | Self::StoreDegraded => Severity::High,

            Self::UserLogin | Self::TokenIssued | Self::EmailVerificationSent => Severity::Medium,

            Self::UserLogout => Severity::Low,
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Routine operations
    Low,
    /// Notable state changes
    Medium,
    /// Security-relevant failures
    High,
    /// Immediate attention required
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Emit an audit event with structured fields.
///
/// The macro stamps every record with `audit_event`, `category`, and
/// `severity`, then forwards the remaining fields to the tracing level the
/// severity maps to.
#[macro_export]
macro_rules! audit_event {
    ($event:expr, $($field:tt)*) => {{
        let event = $event;
        let severity = event.severity();
        let category = event.category();
        let event_name = event.name();

        match severity {
            $crate::audit::Severity::Critical => {
                ::tracing::error!(
                    audit_event = event_name,
                    category = category,
                    severity = "critical",
                    $($field)*
                );
            }
            $crate::audit::Severity::High => {
                ::tracing::warn!(
                    audit_event = event_name,
                    category = category,
                    severity = "high",
                    $($field)*
                );
            }
            $crate::audit::Severity::Medium => {
                ::tracing::info!(
                    audit_event = event_name,
                    category = category,
                    severity = "medium",
                    $($field)*
                );
            }
            $crate::audit::Severity::Low => {
                ::tracing::debug!(
                    audit_event = event_name,
                    category = category,
                    severity = "low",
                    $($field)*
                );
            }
        }
    }};
}

// ============================================================================
// Client Metadata
// ============================================================================

/// Client metadata attached to audit records.
///
/// Supplied by the HTTP layer; the authenticator and guards treat it as
/// opaque context.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    /// Client IP, best-effort (proxy headers first, "unknown" otherwise)
    pub ip: String,
    /// User-Agent header value
    pub user_agent: String,
}

impl ClientInfo {
    /// Build client info with explicit values
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.into(),
        }
    }

    /// Extract client metadata from request headers.
    ///
    /// IP resolution order: `X-Forwarded-For` (first entry), `X-Real-IP`,
    /// then "unknown". Deployments not behind a proxy should prefer
    /// `ConnectInfo` and pass the socket address explicitly.
    pub fn from_request(request: &Request) -> Self {
        Self::from_headers(request.headers())
    }

    /// Header-map variant of [`ClientInfo::from_request`].
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        Self {
            ip: client_ip_from_headers(headers),
            user_agent: headers
                .get(axum::http::header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown")
                .to_string(),
        }
    }
}

/// Record that a verification email was handed to the notifier.
///
/// The notifier itself is an external collaborator; this subsystem only
/// owns the audit trail of the attempt.
pub fn record_verification_sent(actor: &str, detail: &str, client: &ClientInfo) {
    crate::audit_event!(
        AuditEvent::EmailVerificationSent,
        actor = %actor,
        detail = %detail,
        client_ip = %client.ip,
        user_agent = %client.user_agent,
        "Verification email sent"
    );
}

/// Record that a verification email failed to send or verify.
pub fn record_verification_failed(actor: &str, detail: &str, client: &ClientInfo) {
    crate::audit_event!(
        AuditEvent::EmailVerificationFailed,
        actor = %actor,
        detail = %detail,
        client_ip = %client.ip,
        user_agent = %client.user_agent,
        "Verification email failed"
    );
}

/// Extract the client IP from proxy headers.
///
/// Checks `X-Forwarded-For` (leftmost entry is the original client) and
/// `X-Real-IP`. Returns "unknown" when neither is present or parseable.
pub fn extract_client_ip(request: &Request) -> String {
    client_ip_from_headers(request.headers())
}

/// Header-map variant of [`extract_client_ip`] for handlers that only hold
/// the headers.
pub fn client_ip_from_headers(headers: &axum::http::HeaderMap) -> String {
    if let Some(xff) = headers.get("x-forwarded-for") {
        if let Ok(xff_str) = xff.to_str() {
            if let Some(first_ip) = xff_str.split(',').next() {
                let trimmed = first_ip.trim();
                if !trimmed.is_empty() {
                    return trimmed.to_string();
                }
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip) = real_ip.to_str() {
            return ip.trim().to_string();
        }
    }

    "unknown".to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_event_names_match_contract() {
        assert_eq!(AuditEvent::UserLogin.name(), "USER_LOGIN");
        assert_eq!(AuditEvent::UserLoginFailed.name(), "USER_LOGIN_FAILED");
        assert_eq!(AuditEvent::AccountLocked.name(), "ACCOUNT_LOCKED");
        assert_eq!(AuditEvent::EmailVerificationSent.name(), "EMAIL_VERIFICATION_SENT");
        assert_eq!(AuditEvent::EmailVerificationFailed.name(), "EMAIL_VERIFICATION_FAILED");
    }

    #[test]
    fn test_event_categories() {
        assert_eq!(AuditEvent::UserLogin.category(), "authentication");
        assert_eq!(AuditEvent::AccountLocked.category(), "security");
        assert_eq!(AuditEvent::RateLimitExceeded.category(), "protection");
        assert_eq!(AuditEvent::StoreDegraded.category(), "infrastructure");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
        assert_eq!(AuditEvent::IpBlocked.severity(), Severity::Critical);
        assert_eq!(AuditEvent::UserLogout.severity(), Severity::Low);
    }

    #[test]
    fn test_client_ip_from_forwarded_for() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_client_ip(&request), "203.0.113.9");
    }

    #[test]
    fn test_client_ip_from_real_ip() {
        let request = Request::builder()
            .header("x-real-ip", "198.51.100.4")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_client_ip(&request), "198.51.100.4");
    }

    #[test]
    fn test_client_ip_unknown_without_headers() {
        let request = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(extract_client_ip(&request), "unknown");
    }

    #[test]
    fn test_client_info_from_request() {
        let request = Request::builder()
            .header("x-real-ip", "198.51.100.4")
            .header("user-agent", "Mozilla/5.0")
            .body(Body::empty())
            .unwrap();

        let info = ClientInfo::from_request(&request);
        assert_eq!(info.ip, "198.51.100.4");
        assert_eq!(info.user_agent, "Mozilla/5.0");
    }
}
