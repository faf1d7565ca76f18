//! Authenticator
//!
//! Credential verification with account lockout. This is the only component
//! that reads password hashes; everything it hands back is the hash-free
//! [`AuthenticatedUser`] view.
//!
//! # Lockout Contract
//!
//! - A password mismatch increments the member's failed-login counter.
//! - The fifth consecutive failure locks the account for fifteen minutes and
//!   resets the counter to zero.
//! - A lockout whose expiry has passed counts as "not locked"; no write is
//!   needed to clear it.
//! - A successful login clears the counter and any lockout expiry.
//!
//! The threshold and duration are the portal's behavioral contract and are
//! deliberately constants, not configuration.
//!
//! # Fail-Closed Outcomes
//!
//! `authenticate` returns `None` for: unknown email, inactive account,
//! unverified account, active lockout, and password mismatch. Which of
//! those happened is recorded in the audit stream, never in the return
//! value - the login handler's outward response must not distinguish them.

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;

use crate::audit::{AuditEvent, ClientInfo};
use crate::clock::SharedClock;
use crate::credentials::{normalize_email, AuthenticatedUser, CredentialStore};
use crate::error::AppError;
use crate::password::verify_password;

/// Consecutive failures that trigger a lockout.
pub const MAX_FAILED_LOGINS: u32 = 5;

/// How long a lockout lasts.
pub const LOCKOUT_DURATION: Duration = Duration::from_secs(15 * 60);

/// Verifies member credentials against the credential store.
#[derive(Debug)]
pub struct Authenticator {
    store: Arc<dyn CredentialStore>,
    clock: SharedClock,
}

impl Authenticator {
    /// Build an authenticator over a credential store.
    pub fn new(store: Arc<dyn CredentialStore>, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    /// Verify an email/password pair.
    ///
    /// Returns the authenticated member on success, `None` on every refusal.
    /// `Err` is reserved for backend failures; it never encodes anything
    /// about the credentials.
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<Option<AuthenticatedUser>, AppError> {
        let email = normalize_email(email);

        let Some(user) = self.store.find_by_email(&email).await? else {
            crate::audit_event!(
                AuditEvent::UserLoginFailed,
                actor = %email,
                detail = "unknown email",
                client_ip = %client.ip,
                user_agent = %client.user_agent,
                "Login refused"
            );
            return Ok(None);
        };

        if !user.active {
            crate::audit_event!(
                AuditEvent::UserLoginFailed,
                actor = %user.id,
                detail = "account deactivated",
                client_ip = %client.ip,
                user_agent = %client.user_agent,
                "Login refused"
            );
            return Ok(None);
        }

        if !user.verified {
            crate::audit_event!(
                AuditEvent::UserLoginFailed,
                actor = %user.id,
                detail = "email not verified",
                client_ip = %client.ip,
                user_agent = %client.user_agent,
                "Login refused"
            );
            return Ok(None);
        }

        let now = self.clock.now();
        if user.is_locked(now) {
            crate::audit_event!(
                AuditEvent::UserLoginFailed,
                actor = %user.id,
                detail = "account locked",
                client_ip = %client.ip,
                user_agent = %client.user_agent,
                "Login refused"
            );
            return Ok(None);
        }

        if verify_password(password, &user.password_hash) {
            self.store.record_login_success(user.id).await?;
            crate::audit_event!(
                AuditEvent::UserLogin,
                actor = %user.id,
                client_ip = %client.ip,
                user_agent = %client.user_agent,
                "Member authenticated"
            );
            return Ok(Some(AuthenticatedUser::from(&user)));
        }

        // Wrong password: bump the counter, locking on the threshold.
        let failed = user.failed_logins + 1;
        if failed >= MAX_FAILED_LOGINS {
            let until = now + ChronoDuration::from_std(LOCKOUT_DURATION).expect("fixed duration");
            self.store.record_login_failure(user.id, 0, Some(until)).await?;
            crate::audit_event!(
                AuditEvent::AccountLocked,
                actor = %user.id,
                detail = %format!("{} consecutive failures", failed),
                client_ip = %client.ip,
                user_agent = %client.user_agent,
                "Account locked"
            );
        } else {
            self.store.record_login_failure(user.id, failed, None).await?;
        }

        crate::audit_event!(
            AuditEvent::UserLoginFailed,
            actor = %user.id,
            detail = "password mismatch",
            client_ip = %client.ip,
            user_agent = %client.user_agent,
            "Login refused"
        );
        Ok(None)
    }
}

// ============================================================================
// Tests
// ============================================================================
