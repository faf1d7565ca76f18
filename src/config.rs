//! Security configuration
//!
//! Environment-driven configuration for the authentication and protection
//! stack, with startup-time validation of the pieces that must never be
//! wrong at request time.
//!
//! # Environment Variables
//!
//! - `SESSION_SIGNING_SECRET`: token signing secret, **required**, minimum
//!   32 characters and free of well-known weak patterns
//! - `COUNTER_STORE_URL`: distributed store connection string (e.g.
//!   `redis://localhost:6379`). Optional - absence selects in-process
//!   fallback mode at startup.
//! - `COUNTER_STORE_TIMEOUT_MS`: per-operation store timeout (default 500)
//! - `SESSION_COOKIE_SECURE`: "true"/"false" (default "true"); disable only
//!   for local plain-HTTP development
//!
//! # Example
//!
//! ```ignore
//! use portcullis::config::SecurityConfig;
//!
//! let config = SecurityConfig::from_env()?;
//! // or programmatically
//! let config = SecurityConfig::builder()
//!     .signing_secret("0123456789abcdef0123456789abcdef")
//!     .store_url("redis://cache:6379")
//!     .build()?;
//! ```

use std::time::Duration;

use crate::error::ConfigError;

/// Minimum accepted signing-secret length.
pub const MIN_SECRET_LENGTH: usize = 32;

/// Default session lifetime (7 days).
pub const SESSION_LIFETIME: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Extended session lifetime when the caller requests "remember me" (30 days).
pub const REMEMBER_ME_LIFETIME: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Default per-operation timeout for the distributed store.
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(500);

/// Configuration for the security stack.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Secret used to sign session tokens. Validated at construction.
    pub signing_secret: String,

    /// Distributed counter store connection string. `None` selects
    /// in-process fallback mode.
    pub store_url: Option<String>,

    /// Bound on any single distributed-store operation; beyond this the
    /// caller falls back to the in-process path.
    pub store_timeout: Duration,

    /// Session token lifetime without "remember me"
    pub session_lifetime: Duration,

    /// Session token lifetime with "remember me"
    pub remember_me_lifetime: Duration,

    /// Whether the session cookie carries the `Secure` attribute
    pub cookie_secure: bool,
}

impl SecurityConfig {
    /// Create a builder.
    pub fn builder() -> SecurityConfigBuilder {
        SecurityConfigBuilder::default()
    }

    /// Load configuration from the environment.
    ///
    /// Fails if `SESSION_SIGNING_SECRET` is absent or rejected by
    /// [`validate_signing_secret`]. This is deliberately a hard startup
    /// error: the token codec must not come up with a weak secret.
    pub fn from_env() -> Result<Self, ConfigError> {
        let signing_secret = std::env::var("SESSION_SIGNING_SECRET")
            .map_err(|_| ConfigError::Missing { name: "SESSION_SIGNING_SECRET" })?;
        validate_signing_secret(&signing_secret)?;

        let store_url = std::env::var("COUNTER_STORE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let store_timeout = match std::env::var("COUNTER_STORE_TIMEOUT_MS") {
            Ok(raw) => {
                let ms: u64 = raw.parse().map_err(|_| ConfigError::Invalid {
                    name: "COUNTER_STORE_TIMEOUT_MS",
                    reason: format!("'{}' is not a number of milliseconds", raw),
                })?;
                Duration::from_millis(ms)
            }
            Err(_) => DEFAULT_STORE_TIMEOUT,
        };

        let cookie_secure = std::env::var("SESSION_COOKIE_SECURE")
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        Ok(Self {
            signing_secret,
            store_url,
            store_timeout,
            session_lifetime: SESSION_LIFETIME,
            remember_me_lifetime: REMEMBER_ME_LIFETIME,
            cookie_secure,
        })
    }
}

/// Validate a signing secret at startup.
///
/// Rejects secrets shorter than [`MIN_SECRET_LENGTH`] and secrets containing
/// well-known weak substrings. Entropy is the deployer's responsibility; the
/// pattern list only catches the obvious copy-paste defaults.
pub fn validate_signing_secret(secret: &str) -> Result<(), ConfigError> {
    if secret.len() < MIN_SECRET_LENGTH {
        return Err(ConfigError::SecretTooShort {
            actual: secret.len(),
            minimum: MIN_SECRET_LENGTH,
        });
    }

    const WEAK_PATTERNS: &[&str] = &[
        "secret", "password", "changeme", "default", "example",
        "qwerty", "123456", "letmein", "sample", "insecure",
    ];

    let lower = secret.to_lowercase();
    for pattern in WEAK_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::SecretWeakPattern {
                pattern: (*pattern).to_string(),
            });
        }
    }

    Ok(())
}

/// Builder for [`SecurityConfig`].
#[derive(Debug, Clone, Default)]
pub struct SecurityConfigBuilder {
    signing_secret: Option<String>,
    store_url: Option<String>,
    store_timeout: Option<Duration>,
    session_lifetime: Option<Duration>,
    remember_me_lifetime: Option<Duration>,
    cookie_secure: Option<bool>,
}

impl SecurityConfigBuilder {
    /// Set the token signing secret
    pub fn signing_secret(mut self, secret: impl Into<String>) -> Self {
        self.signing_secret = Some(secret.into());
        self
    }

    /// Set the distributed store connection string
    pub fn store_url(mut self, url: impl Into<String>) -> Self {
        self.store_url = Some(url.into());
        self
    }

    /// Set the per-operation store timeout
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = Some(timeout);
        self
    }

    /// Set the default session lifetime
    pub fn session_lifetime(mut self, lifetime: Duration) -> Self {
        self.session_lifetime = Some(lifetime);
        self
    }

    /// Set the "remember me" session lifetime
    pub fn remember_me_lifetime(mut self, lifetime: Duration) -> Self {
        self.remember_me_lifetime = Some(lifetime);
        self
    }

    /// Toggle the `Secure` attribute on the session cookie
    pub fn cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = Some(secure);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<SecurityConfig, ConfigError> {
        let signing_secret = self
            .signing_secret
            .ok_or(ConfigError::Missing { name: "SESSION_SIGNING_SECRET" })?;
        validate_signing_secret(&signing_secret)?;

        Ok(SecurityConfig {
            signing_secret,
            store_url: self.store_url,
            store_timeout: self.store_timeout.unwrap_or(DEFAULT_STORE_TIMEOUT),
            session_lifetime: self.session_lifetime.unwrap_or(SESSION_LIFETIME),
            remember_me_lifetime: self.remember_me_lifetime.unwrap_or(REMEMBER_ME_LIFETIME),
            cookie_secure: self.cookie_secure.unwrap_or(true),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD_SECRET: &str = "kX9!mQ2@vR7#bN4$wL8%hT3^jD6&fG1*";

    #[test]
    fn test_secret_minimum_length() {
        assert!(matches!(
            validate_signing_secret("too-short"),
            Err(ConfigError::SecretTooShort { actual: 9, minimum: 32 })
        ));
        assert!(validate_signing_secret(GOOD_SECRET).is_ok());
    }

    #[test]
    fn test_secret_weak_patterns() {
        // Long enough but contains a well-known weak substring
        let weak = "this-password-is-long-enough-but-weak!";
        assert!(matches!(
            validate_signing_secret(weak),
            Err(ConfigError::SecretWeakPattern { .. })
        ));

        // Pattern detection is case-insensitive
        let weak_upper = "THIS-SECRET-IS-LONG-ENOUGH-BUT-WEAK!!!";
        assert!(matches!(
            validate_signing_secret(weak_upper),
            Err(ConfigError::SecretWeakPattern { .. })
        ));
    }

    #[test]
    fn test_builder_requires_secret() {
        let result = SecurityConfig::builder().build();
        assert!(matches!(result, Err(ConfigError::Missing { .. })));
    }

    #[test]
    fn test_builder_defaults() {
        let config = SecurityConfig::builder()
            .signing_secret(GOOD_SECRET)
            .build()
            .unwrap();

        assert!(config.store_url.is_none());
        assert_eq!(config.session_lifetime, SESSION_LIFETIME);
        assert_eq!(config.remember_me_lifetime, REMEMBER_ME_LIFETIME);
        assert!(config.cookie_secure);
    }

    #[test]
    fn test_builder_overrides() {
        let config = SecurityConfig::builder()
            .signing_secret(GOOD_SECRET)
            .store_url("redis://cache:6379")
            .store_timeout(Duration::from_millis(250))
            .cookie_secure(false)
            .build()
            .unwrap();

        assert_eq!(config.store_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.store_timeout, Duration::from_millis(250));
        assert!(!config.cookie_secure);
    }

    #[test]
    fn test_lifetimes() {
        assert_eq!(SESSION_LIFETIME, Duration::from_secs(604_800));
        assert_eq!(REMEMBER_ME_LIFETIME, Duration::from_secs(2_592_000));
    }
}
