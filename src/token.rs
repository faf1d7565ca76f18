//! Session Token Codec
//!
//! Signs and verifies the compact, stateless session tokens that prove
//! member identity between requests. A token embeds the member id, email,
//! role, issuance time, and expiry; validity is purely cryptographic here -
//! the live account re-check belongs to the session verifier, which is why
//! this module's `decode` is deliberately not the whole verification story.
//!
//! The signing secret is validated in the constructor (length, weak
//! patterns). A bad secret is a deployment defect, so it fails the process
//! at startup rather than failing requests one at a time.

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use std::time::Duration;
use uuid::Uuid;

use crate::config::{self, SecurityConfig};
use crate::credentials::{AuthenticatedUser, Role};
use crate::error::ConfigError;

// ============================================================================
// Claims
// ============================================================================

/// Claims embedded in a session token.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SessionClaims {
    /// Member id
    pub sub: Uuid,
    /// Member email at issuance
    pub email: String,
    /// Member role at issuance
    pub role: Role,
    /// Issued-at (Unix seconds)
    pub iat: i64,
    /// Expiry (Unix seconds)
    pub exp: i64,
    /// Token id, for log correlation
    pub jti: String,
}

/// Why a token was rejected. Logged; callers fail closed either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    /// Not a structurally valid token
    Malformed,
    /// Structure fine, signature wrong
    BadSignature,
    /// Signature fine, expiry passed
    Expired,
}

impl std::fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed"),
            Self::BadSignature => write!(f, "bad_signature"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

// ============================================================================
// Codec
// ============================================================================

/// Signs and verifies session tokens with a server-held secret.
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    session_lifetime: Duration,
    remember_me_lifetime: Duration,
}

impl TokenCodec {
    /// Build a codec from a signing secret with the default lifetimes
    /// (7 days, 30 days with "remember me").
    ///
    /// Fails if the secret is missing teeth - shorter than 32 characters or
    /// containing a well-known weak pattern.
    pub fn new(secret: &str) -> Result<Self, ConfigError> {
        config::validate_signing_secret(secret)?;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            session_lifetime: config::SESSION_LIFETIME,
            remember_me_lifetime: config::REMEMBER_ME_LIFETIME,
        })
    }

    /// Build a codec from the full configuration.
    pub fn from_config(config: &SecurityConfig) -> Result<Self, ConfigError> {
        let mut codec = Self::new(&config.signing_secret)?;
        codec.session_lifetime = config.session_lifetime;
        codec.remember_me_lifetime = config.remember_me_lifetime;
        Ok(codec)
    }

    /// Lifetime applied to tokens issued with the given remember flag.
    pub fn lifetime(&self, remember: bool) -> Duration {
        if remember {
            self.remember_me_lifetime
        } else {
            self.session_lifetime
        }
    }

    /// Issue a signed token for an authenticated member.
    pub fn issue(&self, user: &AuthenticatedUser, remember: bool) -> Result<String, ConfigError> {
        let now = Utc::now();
        let lifetime = self.lifetime(remember);

        let claims = SessionClaims {
            sub: user.id,
            email: user.email.clone(),
            role: user.role,
            iat: now.timestamp(),
            exp: now.timestamp() + lifetime.as_secs() as i64,
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            // Encoding only fails on key/serialization defects, which are
            // configuration problems, not request problems.
            ConfigError::Invalid {
                name: "SESSION_SIGNING_SECRET",
                reason: e.to_string(),
            }
        })
    }

    /// Verify signature and expiry, returning the embedded claims.
    ///
    /// This is the cryptographic half of session verification. Callers that
    /// need a live member (everything request-facing) go through
    /// `SessionVerifier::verify`, which re-checks the account after this.
    pub fn decode(&self, token: &str) -> Result<SessionClaims, TokenRejection> {
        let mut validation = Validation::default();
        validation.leeway = 0; // no clock-skew tolerance

        decode::<SessionClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenRejection::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => TokenRejection::BadSignature,
                _ => TokenRejection::Malformed,
            })
    }
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Keys are secret material; show only the lifetimes
        f.debug_struct("TokenCodec")
            .field("session_lifetime_secs", &self.session_lifetime.as_secs())
            .field("remember_me_lifetime_secs", &self.remember_me_lifetime.as_secs())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

    const SECRET: &str = "kX9!mQ2@vR7#bN4$wL8%hT3^jD6&fG1*";

    fn member() -> AuthenticatedUser {
        AuthenticatedUser {
            id: Uuid::new_v4(),
            email: "admin@example.org".to_string(),
            role: Role::Admin,
        }
    }

    #[test]
    fn test_rejects_weak_secret_at_construction() {
        assert!(matches!(
            TokenCodec::new("short"),
            Err(ConfigError::SecretTooShort { .. })
        ));
        assert!(matches!(
            TokenCodec::new("this-secret-is-long-enough-but-weak!!!!"),
            Err(ConfigError::SecretWeakPattern { .. })
        ));
        assert!(TokenCodec::new(SECRET).is_ok());
    }

    #[test]
    fn test_roundtrip_preserves_identity() {
        let codec = TokenCodec::new(SECRET).unwrap();
        let user = member();

        let token = codec.issue(&user, false).unwrap();
        let claims = codec.decode(&token).unwrap();

        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.email, user.email);
        assert_eq!(claims.role, Role::Admin);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_remember_me_extends_lifetime() {
        let codec = TokenCodec::new(SECRET).unwrap();
        let user = member();

        let short = codec.decode(&codec.issue(&user, false).unwrap()).unwrap();
        let long = codec.decode(&codec.issue(&user, true).unwrap()).unwrap();

        assert_eq!(short.exp - short.iat, 7 * 24 * 60 * 60);
        assert_eq!(long.exp - long.iat, 30 * 24 * 60 * 60);
    }

    #[test]
    fn test_rejects_wrong_signature() {
        let codec = TokenCodec::new(SECRET).unwrap();
        let other = TokenCodec::new("a9C#e2Fg8!hJ4@kL6$mN1%pQ3^rS5&tU").unwrap();

        let token = codec.issue(&member(), false).unwrap();
        assert_eq!(other.decode(&token), Err(TokenRejection::BadSignature));
    }

    #[test]
    fn test_rejects_malformed_token() {
        let codec = TokenCodec::new(SECRET).unwrap();
        assert_eq!(codec.decode("not-a-token"), Err(TokenRejection::Malformed));
        assert_eq!(codec.decode(""), Err(TokenRejection::Malformed));
    }

    #[test]
    fn test_rejects_expired_token_with_valid_signature() {
        let codec = TokenCodec::new(SECRET).unwrap();
        let user = member();

        // Hand-build an already-expired token signed with the right key
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            sub: user.id,
            email: user.email.clone(),
            role: user.role,
            iat: now - 7200,
            exp: now - 3600,
            jti: Uuid::new_v4().to_string(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert_eq!(codec.decode(&token), Err(TokenRejection::Expired));
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let codec = TokenCodec::new(SECRET).unwrap();
        let token = codec.issue(&member(), false).unwrap();

        // Rewrite the email claim inside the payload segment; the signature
        // no longer matches the payload.
        let mut parts: Vec<String> = token.split('.').map(String::from).collect();
        let payload = URL_SAFE_NO_PAD.decode(&parts[1]).unwrap();
        let tampered = String::from_utf8(payload)
            .unwrap()
            .replace("admin@example.org", "intruder@example.org");
        parts[1] = URL_SAFE_NO_PAD.encode(tampered.as_bytes());
        let forged = parts.join(".");

        assert!(codec.decode(&forged).is_err());
    }
}
