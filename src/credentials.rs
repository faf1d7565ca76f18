//! Credential Store
//!
//! Owns the user records this subsystem authenticates against: identity,
//! email, password hash, role, account flags, and the lockout bookkeeping
//! the authenticator mutates. Records are created at registration and
//! mutated here only through the lockout-counter operations; nothing in this
//! crate deletes them.
//!
//! Two implementations: [`MemoryCredentialStore`] for tests and small
//! single-instance deployments, and a Postgres-backed store behind the
//! `postgres` feature for production.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use uuid::Uuid;

use crate::error::AppError;

// ============================================================================
// User Records
// ============================================================================

/// Member role; gates the admin surface of the portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Ordinary member
    Regular,
    /// Administrative member
    Admin,
}

impl Role {
    /// Stable string form, used in tokens and the database
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Admin => "admin",
        }
    }

    /// Parse the stable string form
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "regular" => Some(Self::Regular),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A member's authentication record.
#[derive(Debug, Clone)]
pub struct UserRecord {
    /// Opaque identity
    pub id: Uuid,
    /// Unique, stored lowercase
    pub email: String,
    /// Argon2id PHC string; never leaves this subsystem
    pub password_hash: String,
    /// Member role
    pub role: Role,
    /// Deactivated accounts cannot authenticate or hold sessions
    pub active: bool,
    /// Unverified accounts cannot authenticate or hold sessions
    pub verified: bool,
    /// Consecutive failed logins since the last success
    pub failed_logins: u32,
    /// When set, logins are refused until this instant passes
    pub lockout_until: Option<DateTime<Utc>>,
}

impl UserRecord {
    /// Build a fresh active-but-unverified record.
    pub fn new(email: impl Into<String>, password_hash: impl Into<String>, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into().trim().to_lowercase(),
            password_hash: password_hash.into(),
            role,
            active: true,
            verified: false,
            failed_logins: 0,
            lockout_until: None,
        }
    }

    /// Whether the account is locked at `now`.
    ///
    /// An expiry in the past means "not locked" - the authenticator treats
    /// an elapsed lockout as cleared without a separate write.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.lockout_until.is_some_and(|until| until > now)
    }
}

/// Normalize an email for lookup: trimmed, lowercase.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// The hash-free view of a member handed to the rest of the application.
///
/// This is what the authenticator and session verifier return; the password
/// hash never crosses that boundary.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AuthenticatedUser {
    /// Member identity
    pub id: Uuid,
    /// Normalized email
    pub email: String,
    /// Member role
    pub role: Role,
}

impl From<&UserRecord> for AuthenticatedUser {
    fn from(record: &UserRecord) -> Self {
        Self {
            id: record.id,
            email: record.email.clone(),
            role: record.role,
        }
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Credential-store backend failure.
#[derive(Debug)]
pub enum CredentialError {
    /// The backend could not complete the operation
    Backend(String),
    /// The email is already registered
    DuplicateEmail,
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(msg) => write!(f, "credential store failure: {}", msg),
            Self::DuplicateEmail => write!(f, "email is already registered"),
        }
    }
}

impl std::error::Error for CredentialError {}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::DuplicateEmail => AppError::validation("Email is already registered"),
            other => AppError::internal("Credential store error", other),
        }
    }
}

/// Storage backend for user records.
///
/// Every call is an I/O suspension point; callers must not hold locks
/// across them.
#[async_trait]
pub trait CredentialStore: Send + Sync + fmt::Debug {
    /// Look up by normalized email
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, CredentialError>;

    /// Look up by id
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, CredentialError>;

    /// Insert a new record (registration flows)
    async fn create(&self, record: UserRecord) -> Result<(), CredentialError>;

    /// Persist updated lockout bookkeeping after a failed login
    async fn record_login_failure(
        &self,
        id: Uuid,
        failed_logins: u32,
        lockout_until: Option<DateTime<Utc>>,
    ) -> Result<(), CredentialError>;

    /// Clear lockout bookkeeping after a successful login
    async fn record_login_success(&self, id: Uuid) -> Result<(), CredentialError>;
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// In-process credential store for tests and single-instance use.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    users: RwLock<HashMap<Uuid, UserRecord>>,
}

impl MemoryCredentialStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the account flags for a member.
    ///
    /// Account-management flows own these flags; the authenticator and
    /// session verifier only ever read them.
    pub fn set_account_flags(&self, id: Uuid, active: bool, verified: bool) {
        let mut users = self.users.write().expect("user lock poisoned");
        if let Some(user) = users.get_mut(&id) {
            user.active = active;
            user.verified = verified;
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, CredentialError> {
        let needle = normalize_email(email);
        let users = self.users.read().expect("user lock poisoned");
        Ok(users.values().find(|u| u.email == needle).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, CredentialError> {
        let users = self.users.read().expect("user lock poisoned");
        Ok(users.get(&id).cloned())
    }

    async fn create(&self, record: UserRecord) -> Result<(), CredentialError> {
        let mut users = self.users.write().expect("user lock poisoned");
        if users.values().any(|u| u.email == record.email) {
            return Err(CredentialError::DuplicateEmail);
        }
        users.insert(record.id, record);
        Ok(())
    }

    async fn record_login_failure(
        &self,
        id: Uuid,
        failed_logins: u32,
        lockout_until: Option<DateTime<Utc>>,
    ) -> Result<(), CredentialError> {
        let mut users = self.users.write().expect("user lock poisoned");
        if let Some(user) = users.get_mut(&id) {
            user.failed_logins = failed_logins;
            user.lockout_until = lockout_until;
        }
        Ok(())
    }

    async fn record_login_success(&self, id: Uuid) -> Result<(), CredentialError> {
        let mut users = self.users.write().expect("user lock poisoned");
        if let Some(user) = users.get_mut(&id) {
            user.failed_logins = 0;
            user.lockout_until = None;
        }
        Ok(())
    }
}

// ============================================================================
// Postgres Store (feature: postgres)
// ============================================================================

#[cfg(feature = "postgres")]
pub use pg::PgCredentialStore;

#[cfg(feature = "postgres")]
mod pg {
    use super::*;
    use sqlx::PgPool;

    #[derive(sqlx::FromRow)]
    struct UserRow {
        id: Uuid,
        email: String,
        password_hash: String,
        role: String,
        active: bool,
        verified: bool,
        failed_logins: i32,
        lockout_until: Option<DateTime<Utc>>,
    }

    impl UserRow {
        fn into_record(self) -> Result<UserRecord, CredentialError> {
            let role = Role::parse(&self.role).ok_or_else(|| {
                CredentialError::Backend(format!("unknown role '{}' in user row", self.role))
            })?;
            Ok(UserRecord {
                id: self.id,
                email: self.email,
                password_hash: self.password_hash,
                role,
                active: self.active,
                verified: self.verified,
                failed_logins: self.failed_logins.max(0) as u32,
                lockout_until: self.lockout_until,
            })
        }
    }

    /// Postgres-backed credential store.
    #[derive(Debug, Clone)]
    pub struct PgCredentialStore {
        pool: PgPool,
    }

    impl PgCredentialStore {
        /// Wrap an existing connection pool.
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    fn backend(err: sqlx::Error) -> CredentialError {
        CredentialError::Backend(err.to_string())
    }

    const SELECT_COLUMNS: &str =
        "id, email, password_hash, role, active, verified, failed_logins, lockout_until";

    #[async_trait]
    impl CredentialStore for PgCredentialStore {
        async fn find_by_email(
            &self,
            email: &str,
        ) -> Result<Option<UserRecord>, CredentialError> {
            let row = sqlx::query_as::<_, UserRow>(&format!(
                "SELECT {} FROM portal_users WHERE email = $1",
                SELECT_COLUMNS
            ))
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

            row.map(UserRow::into_record).transpose()
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, CredentialError> {
            let row = sqlx::query_as::<_, UserRow>(&format!(
                "SELECT {} FROM portal_users WHERE id = $1",
                SELECT_COLUMNS
            ))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

            row.map(UserRow::into_record).transpose()
        }

        async fn create(&self, record: UserRecord) -> Result<(), CredentialError> {
            let result = sqlx::query(
                "INSERT INTO portal_users \
                 (id, email, password_hash, role, active, verified, failed_logins, lockout_until) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(record.id)
            .bind(&record.email)
            .bind(&record.password_hash)
            .bind(record.role.as_str())
            .bind(record.active)
            .bind(record.verified)
            .bind(record.failed_logins as i32)
            .bind(record.lockout_until)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(()),
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    Err(CredentialError::DuplicateEmail)
                }
                Err(err) => Err(backend(err)),
            }
        }

        async fn record_login_failure(
            &self,
            id: Uuid,
            failed_logins: u32,
            lockout_until: Option<DateTime<Utc>>,
        ) -> Result<(), CredentialError> {
            sqlx::query(
                "UPDATE portal_users SET failed_logins = $2, lockout_until = $3 WHERE id = $1",
            )
            .bind(id)
            .bind(failed_logins as i32)
            .bind(lockout_until)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
            Ok(())
        }

        async fn record_login_success(&self, id: Uuid) -> Result<(), CredentialError> {
            sqlx::query(
                "UPDATE portal_users SET failed_logins = 0, lockout_until = NULL WHERE id = $1",
            )
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
            Ok(())
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(email: &str) -> UserRecord {
        UserRecord::new(email, "$argon2id$stub", Role::Regular)
    }

    #[test]
    fn test_role_roundtrip() {
        assert_eq!(Role::parse("regular"), Some(Role::Regular));
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("root"), None);
        assert_eq!(Role::Admin.as_str(), "admin");
    }

    #[test]
    fn test_email_normalized_on_creation() {
        let user = record("  Member@Example.ORG ");
        assert_eq!(user.email, "member@example.org");
    }

    #[test]
    fn test_lockout_expiry_in_past_means_unlocked() {
        let mut user = record("a@example.org");
        let now = Utc::now();

        user.lockout_until = Some(now + chrono::Duration::minutes(15));
        assert!(user.is_locked(now));

        user.lockout_until = Some(now - chrono::Duration::seconds(1));
        assert!(!user.is_locked(now));

        user.lockout_until = None;
        assert!(!user.is_locked(now));
    }

    #[tokio::test]
    async fn test_memory_store_lookup_is_case_insensitive() {
        let store = MemoryCredentialStore::new();
        store.create(record("member@example.org")).await.unwrap();

        let found = store.find_by_email("MEMBER@example.ORG").await.unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().email, "member@example.org");
    }

    #[tokio::test]
    async fn test_memory_store_rejects_duplicate_email() {
        let store = MemoryCredentialStore::new();
        store.create(record("member@example.org")).await.unwrap();

        let result = store.create(record("Member@Example.org")).await;
        assert!(matches!(result, Err(CredentialError::DuplicateEmail)));
    }

    #[tokio::test]
    async fn test_lockout_bookkeeping_persists() {
        let store = MemoryCredentialStore::new();
        let user = record("member@example.org");
        let id = user.id;
        store.create(user).await.unwrap();

        let until = Utc::now() + chrono::Duration::minutes(15);
        store.record_login_failure(id, 5, Some(until)).await.unwrap();

        let user = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(user.failed_logins, 5);
        assert_eq!(user.lockout_until, Some(until));

        store.record_login_success(id).await.unwrap();
        let user = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(user.failed_logins, 0);
        assert!(user.lockout_until.is_none());
    }
}
