//! # Portcullis
//!
//! Authentication, session validation, and request protection for
//! member-portal services built on Axum.
//!
//! The surrounding portal - pages, CRUD, dashboards, integrations - consumes
//! this crate as its security core:
//!
//! - **Credential verification with lockout**: five consecutive failures
//!   lock an account for fifteen minutes; every outcome lands in the audit
//!   stream.
//! - **Stateless session tokens**: signed claims with a live account
//!   re-check on every verification, so revoking an account revokes its
//!   tokens.
//! - **Distributed rate limiting**: named per-route-class policies counted
//!   on Redis, degrading transparently to in-process counters when the
//!   store is unreachable or slow.
//! - **CSRF protection**: per-session tokens with a one-hour TTL on the
//!   same store.
//! - **Input sanitization and IP defense**: script-stripping sanitizer and
//!   automatic 24-hour blocks for IPs that keep tripping alarms.
//!
//! ## Quick Start
//!
//! ```ignore
//! use portcullis::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     portcullis::observability::init_tracing_from_env();
//!
//!     let config = SecurityConfig::from_env()?;
//!     let clock = portcullis::clock::system_clock();
//!     let store = portcullis::store::connect(&config, Arc::clone(&clock)).await;
//!
//!     let credentials: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
//!     let codec = Arc::new(TokenCodec::from_config(&config)?);
//!
//!     let state = AuthState {
//!         authenticator: Arc::new(Authenticator::new(Arc::clone(&credentials), Arc::clone(&clock))),
//!         verifier: Arc::new(SessionVerifier::new(Arc::clone(&codec), credentials)),
//!         csrf: Arc::new(CsrfGuard::new(Arc::clone(&store))),
//!         limiter: Arc::new(RateLimiter::new(store)),
//!         codec,
//!         cookie_secure: config.cookie_secure,
//!     };
//!
//!     let app = portcullis::routes::routes(state);
//!     // merge with the portal's own routes and serve...
//!     Ok(())
//! }
//! ```
//!
//! ## Degraded Mode
//!
//! The rate limiter, CSRF guard, and IP defense share one counter store.
//! With `COUNTER_STORE_URL` set, that is Redis with a per-operation time
//! bound; on failure or timeout each operation falls back to an in-process
//! map and the degradation is logged. Without the variable the in-process
//! map is used from the start. Either way, limits keep holding per
//! instance - store trouble is never a user-visible error.

pub mod audit;
pub mod authn;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod csrf;
pub mod defense;
pub mod error;
pub mod observability;
pub mod password;
pub mod rate_limit;
pub mod routes;
pub mod session;
pub mod store;
pub mod token;

/// Common imports for applications embedding the security core.
pub mod prelude {
    pub use crate::audit::{AuditEvent, ClientInfo, Severity};
    pub use crate::authn::Authenticator;
    pub use crate::config::{SecurityConfig, SecurityConfigBuilder};
    pub use crate::credentials::{
        AuthenticatedUser, CredentialStore, MemoryCredentialStore, Role, UserRecord,
    };
    pub use crate::csrf::{csrf_middleware, CsrfGuard, CSRF_HEADER};
    pub use crate::defense::{
        ip_block_middleware, sanitize_html, SuspiciousActivityTracker,
    };
    pub use crate::error::{AppError, ConfigError, ErrorKind};
    pub use crate::password::{evaluate_strength, hash_password, verify_password};
    pub use crate::rate_limit::{
        rate_limit_middleware, RateLimitPolicy, RateLimitState, RateLimiter,
    };
    pub use crate::routes::AuthState;
    pub use crate::session::{
        require_admin, require_session, CurrentSession, SessionVerifier, SESSION_COOKIE,
    };
    pub use crate::store::{CounterStore, MemoryCounterStore, SharedStore};
    pub use crate::token::TokenCodec;

    #[cfg(feature = "postgres")]
    pub use crate::credentials::PgCredentialStore;
}
