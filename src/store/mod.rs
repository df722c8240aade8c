/// Durable state behind the session subsystem
///
/// Principals and refresh records live behind two repository traits so the
/// authentication components never touch storage directly. Two backends are
/// provided: PostgreSQL for deployments and an in-memory one for development
/// and tests. Both make bounded creation and rotation atomic.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;

pub use memory::{InMemoryPrincipalStore, InMemoryRefreshTokenStore};
pub use postgres::{PgPrincipalStore, PgRefreshTokenStore};

/// A registered account. The username is the principal id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
    pub password_hash: String,
    pub email: String,
    pub full_name: String,
    pub created_at: DateTime<Utc>,
}

/// Fields required to create or overwrite a principal
#[derive(Debug, Clone)]
pub struct NewPrincipal {
    pub username: String,
    pub password_hash: String,
    pub email: String,
    pub full_name: String,
}

/// A stored refresh token. Only the SHA-256 digest of the token is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRecord {
    pub token_hash: String,
    /// Owning principal
    pub username: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RefreshRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

#[async_trait]
pub trait PrincipalRepository: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>, DatabaseError>;

    async fn exists_by_username(&self, username: &str) -> Result<bool, DatabaseError>;

    async fn exists_by_email(&self, email: &str) -> Result<bool, DatabaseError>;

    /// Fails with `UniqueConstraintViolation` naming the clashing field.
    async fn insert(&self, principal: NewPrincipal) -> Result<Principal, DatabaseError>;

    /// Create, or overwrite hash/email/name of an existing principal.
    async fn upsert(&self, principal: NewPrincipal) -> Result<Principal, DatabaseError>;

    async fn count(&self) -> Result<u64, DatabaseError>;
}

#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    /// Insert `record`. If its owner already holds `max_active` non-revoked
    /// records, all of them are revoked first, in the same atomic unit.
    async fn insert_bounded(
        &self,
        record: RefreshRecord,
        max_active: usize,
    ) -> Result<RefreshRecord, DatabaseError>;

    /// Non-revoked record with this digest, if any.
    async fn find_active(&self, token_hash: &str) -> Result<Option<RefreshRecord>, DatabaseError>;

    /// Returns `true` when this call flipped the record to revoked.
    async fn revoke(&self, token_hash: &str) -> Result<bool, DatabaseError>;

    async fn revoke_all(&self, username: &str) -> Result<u64, DatabaseError>;

    /// Revoke `old_token_hash` and insert `replacement` as one unit. Returns
    /// `None` without writing anything when the old record is missing or
    /// already revoked.
    async fn rotate(
        &self,
        old_token_hash: &str,
        replacement: RefreshRecord,
        max_active: usize,
    ) -> Result<Option<RefreshRecord>, DatabaseError>;

    async fn count_active(&self, username: &str) -> Result<u64, DatabaseError>;

    /// Delete every record that expired before `now`.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError>;
}
