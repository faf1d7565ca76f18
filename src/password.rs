//! Password hashing and strength evaluation
//!
//! One-way salted hashing with Argon2id plus the strength scoring used
//! during registration and password changes.
//!
//! # Security Rationale
//!
//! - Argon2id is memory-hard; offline cracking of a leaked hash is costly.
//! - Each hash carries its own random salt, so equal passwords produce
//!   different hashes and rainbow tables are useless.
//! - Verification runs the full hash regardless of where the candidate
//!   diverges, so it leaks no timing signal. The [`constant_time_eq`] helper
//!   covers the remaining cases where two secret strings must be compared
//!   directly.
//!
//! # Usage
//!
//! ```ignore
//! use portcullis::password::{hash_password, verify_password, evaluate_strength};
//!
//! let report = evaluate_strength("correct-Horse7-battery");
//! if !report.is_valid() {
//!     return Err(report.feedback.join("; "));
//! }
//! let hash = hash_password("correct-Horse7-battery")?;
//! assert!(verify_password("correct-Horse7-battery", &hash));
//! ```

use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;

use crate::error::AppError;

// ============================================================================
// Hashing
// ============================================================================

/// Hash a password with Argon2id and a fresh random salt.
///
/// The returned string is the self-describing PHC format (algorithm,
/// parameters, salt, digest) and is what the credential store persists.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::internal_msg(format!("Password hashing failed: {}", e)))
}

/// Verify a candidate password against a stored hash.
///
/// Returns `false` for a mismatch **and** for an unparseable hash - a
/// corrupt record must fail closed, not error differently than a wrong
/// password.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash)
        .ok()
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Constant-time comparison of two byte slices.
///
/// `==` exits on the first mismatching byte, which leaks where secrets
/// diverge through response timing. Use this for any comparison involving a
/// secret value that did not go through Argon2.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

// ============================================================================
// Strength Evaluation
// ============================================================================

/// Outcome of scoring a candidate password.
#[derive(Debug, Clone)]
pub struct StrengthReport {
    /// 0-5; length and character-class variety add, common patterns subtract
    pub score: u8,
    /// Human-readable problems; empty when none were found
    pub feedback: Vec<String>,
}

impl StrengthReport {
    /// A password is acceptable only with no feedback and a score of 4+.
    pub fn is_valid(&self) -> bool {
        self.feedback.is_empty() && self.score >= 4
    }
}

/// Patterns that immediately mark a password as guessable.
///
/// Matched as case-insensitive substrings; "Password2024!" is as guessable
/// as "password".
const COMMON_PATTERNS: &[&str] = &[
    "password", "123456", "qwerty", "letmein", "welcome",
    "abc123", "iloveyou", "admin", "monkey", "dragon",
];

/// Score a candidate password from 0 to 5.
///
/// Scoring: length >= 12 gives +2 (>= 8 gives +1); each present character
/// class (lowercase, uppercase, digit, special) gives +1; any common-pattern
/// match subtracts 2 and always produces feedback. The raw total is clamped
/// to the 0-5 range.
pub fn evaluate_strength(password: &str) -> StrengthReport {
    let mut score: i32 = 0;
    let mut feedback = Vec::new();

    let len = password.chars().count();
    if len >= 12 {
        score += 2;
    } else if len >= 8 {
        score += 1;
    } else {
        feedback.push("Password must be at least 8 characters".to_string());
    }

    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_special = password.chars().any(|c| !c.is_alphanumeric());

    if has_lower {
        score += 1;
    } else {
        feedback.push("Add a lowercase letter".to_string());
    }
    if has_upper {
        score += 1;
    } else {
        feedback.push("Add an uppercase letter".to_string());
    }
    if has_digit {
        score += 1;
    } else {
        feedback.push("Add a digit".to_string());
    }
    if has_special {
        score += 1;
    } else {
        feedback.push("Add a special character".to_string());
    }

    let lower = password.to_lowercase();
    if COMMON_PATTERNS.iter().any(|p| lower.contains(p)) {
        score -= 2;
        feedback.push("Avoid common words and patterns".to_string());
    }

    StrengthReport {
        score: score.clamp(0, 5) as u8,
        feedback,
    }
}

// ============================================================================
// Tests
// ============================================================================
