/// Refresh Token Management
///
/// Refresh tokens are:
/// - 64 random alphanumeric characters handed to the client
/// - Stored only as their SHA-256 digest
/// - Single-use: every refresh revokes the presented token and issues a new one
/// - Bounded per principal; at capacity every active token is revoked first
///
/// All atomicity lives in the repository; this type owns token generation,
/// hashing, expiry policy and the mapping of store outcomes to auth errors.

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::audit::{self, AuthEvent};
use crate::error::{AppError, AuthError};
use crate::store::{RefreshRecord, RefreshTokenRepository};

const TOKEN_LENGTH: usize = 64;

/// Generate a new cryptographically secure refresh token
pub fn generate_refresh_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// SHA-256 hex digest of a refresh token
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A freshly stored refresh record together with the plaintext token.
/// The plaintext exists only here and in the response carrier.
#[derive(Debug, Clone)]
pub struct RefreshGrant {
    pub token: String,
    pub record: RefreshRecord,
}

/// Client details stamped onto each new record
#[derive(Debug, Clone, Copy, Default)]
pub struct Issuance<'a> {
    pub user_agent: Option<&'a str>,
    pub address: Option<&'a str>,
}

pub struct RefreshTokenStore {
    repo: Arc<dyn RefreshTokenRepository>,
    ttl: Duration,
    max_active: usize,
}

impl RefreshTokenStore {
    pub fn new(repo: Arc<dyn RefreshTokenRepository>, ttl_seconds: i64, max_active: usize) -> Self {
        Self {
            repo,
            ttl: Duration::seconds(ttl_seconds),
            max_active: max_active.max(1),
        }
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl.num_seconds()
    }

    fn new_record(&self, username: &str, issuance: Issuance<'_>) -> (String, RefreshRecord) {
        let token = generate_refresh_token();
        let now = Utc::now();
        let record = RefreshRecord {
            token_hash: hash_token(&token),
            username: username.to_string(),
            expires_at: now + self.ttl,
            revoked: false,
            user_agent: issuance.user_agent.map(str::to_string),
            ip_address: issuance.address.map(str::to_string),
            created_at: now,
        };
        (token, record)
    }

    /// Persist a new refresh token for `username`, revoking all of its active
    /// tokens first when it is already at capacity.
    pub async fn create(
        &self,
        username: &str,
        issuance: Issuance<'_>,
    ) -> Result<RefreshGrant, AppError> {
        let (token, record) = self.new_record(username, issuance);
        let record = self.repo.insert_bounded(record, self.max_active).await?;

        Ok(RefreshGrant { token, record })
    }

    /// Non-revoked record for a presented token
    pub async fn find(&self, token: &str) -> Result<Option<RefreshRecord>, AppError> {
        Ok(self.repo.find_active(&hash_token(token)).await?)
    }

    /// `false` for revoked or expired records, judged by the stored row
    /// rather than the caller's copy. An expired record is revoked on the spot.
    pub async fn validate(&self, record: &RefreshRecord) -> Result<bool, AppError> {
        let record = match self.repo.find_active(&record.token_hash).await? {
            Some(stored) => stored,
            None => return Ok(false),
        };
        if record.is_expired_at(Utc::now()) {
            self.repo.revoke(&record.token_hash).await?;
            tracing::info!(username = %record.username, "Expired refresh token revoked");
            return Ok(false);
        }
        Ok(true)
    }

    /// Idempotent
    pub async fn revoke(&self, record: &RefreshRecord) -> Result<(), AppError> {
        self.repo.revoke(&record.token_hash).await?;
        Ok(())
    }

    pub async fn revoke_all(&self, username: &str) -> Result<u64, AppError> {
        Ok(self.repo.revoke_all(username).await?)
    }

    /// Retire `old` and issue its replacement as one unit.
    ///
    /// # Errors
    /// `TokenInvalid` when `old` was already revoked, including by a
    /// concurrent rotation that won the race.
    pub async fn rotate(
        &self,
        old: &RefreshRecord,
        issuance: Issuance<'_>,
    ) -> Result<RefreshGrant, AppError> {
        let (token, replacement) = self.new_record(&old.username, issuance);

        match self
            .repo
            .rotate(&old.token_hash, replacement, self.max_active)
            .await?
        {
            Some(record) => Ok(RefreshGrant { token, record }),
            None => {
                audit::record(AuthEvent::RefreshReuse {
                    username: &old.username,
                });
                Err(AuthError::TokenInvalid.into())
            }
        }
    }

    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        Ok(self.repo.delete_expired(now).await?)
    }

    pub async fn count_active(&self, username: &str) -> Result<u64, AppError> {
        Ok(self.repo.count_active(username).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRefreshTokenStore;

    fn store_with(max_active: usize, ttl_seconds: i64) -> RefreshTokenStore {
        RefreshTokenStore::new(
            Arc::new(InMemoryRefreshTokenStore::new()),
            ttl_seconds,
            max_active,
        )
    }

    fn issuance() -> Issuance<'static> {
        Issuance {
            user_agent: Some("test-agent"),
            address: Some("10.0.0.1"),
        }
    }

    #[test]
    fn test_generate_refresh_token() {
        let token = generate_refresh_token();

        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_token_hashing() {
        let token = generate_refresh_token();
        let hash1 = hash_token(&token);
        let hash2 = hash_token(&token);

        assert_eq!(hash1, hash2);
        assert_ne!(token, hash1);
        assert_eq!(hash1.len(), 64);
        assert_ne!(hash1, hash_token(&generate_refresh_token()));
    }

    #[tokio::test]
    async fn test_create_stores_only_the_digest() {
        let store = store_with(5, 604800);

        let grant = store.create("alice", issuance()).await.unwrap();

        assert_ne!(grant.record.token_hash, grant.token);
        assert_eq!(grant.record.token_hash, hash_token(&grant.token));
        assert_eq!(grant.record.user_agent.as_deref(), Some("test-agent"));
        assert_eq!(grant.record.ip_address.as_deref(), Some("10.0.0.1"));
        assert!(grant.record.expires_at > Utc::now() + Duration::days(6));

        let found = store.find(&grant.token).await.unwrap().unwrap();
        assert_eq!(found, grant.record);
    }

    #[tokio::test]
    async fn test_find_skips_revoked_records() {
        let store = store_with(5, 604800);
        let grant = store.create("alice", issuance()).await.unwrap();

        store.revoke(&grant.record).await.unwrap();
        store.revoke(&grant.record).await.unwrap();

        assert!(store.find(&grant.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_validate_revokes_expired_record() {
        let store = store_with(5, -10);
        let grant = store.create("alice", issuance()).await.unwrap();

        assert!(!store.validate(&grant.record).await.unwrap());
        assert!(store.find(&grant.token).await.unwrap().is_none());
        assert_eq!(store.count_active("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_validate_accepts_live_record() {
        let store = store_with(5, 604800);
        let grant = store.create("alice", issuance()).await.unwrap();

        assert!(store.validate(&grant.record).await.unwrap());
    }

    #[tokio::test]
    async fn test_rotation_invalidates_old_token() {
        let store = store_with(5, 604800);
        let original = store.create("alice", issuance()).await.unwrap();

        let rotated = store.rotate(&original.record, issuance()).await.unwrap();

        assert!(store.find(&original.token).await.unwrap().is_none());
        assert!(store.find(&rotated.token).await.unwrap().is_some());

        let reuse = store.rotate(&original.record, issuance()).await.unwrap_err();
        assert!(matches!(reuse, AppError::Auth(AuthError::TokenInvalid)));
        assert_eq!(store.count_active("alice").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_validate_rejects_stale_copy_after_rotation() {
        let store = store_with(5, 604800);
        let original = store.create("alice", issuance()).await.unwrap();

        let rotated = store.rotate(&original.record, issuance()).await.unwrap();

        assert!(!original.record.revoked);
        assert!(!store.validate(&original.record).await.unwrap());
        assert!(store.validate(&rotated.record).await.unwrap());
    }

    #[tokio::test]
    async fn test_validate_rejects_stale_copy_after_revoke() {
        let store = store_with(5, 604800);
        let grant = store.create("alice", issuance()).await.unwrap();
        let held = grant.record.clone();

        store.revoke(&grant.record).await.unwrap();

        assert!(!store.validate(&held).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_rotations_have_one_winner() {
        let store = Arc::new(store_with(5, 604800));
        let original = store.create("alice", issuance()).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let record = original.record.clone();
                tokio::spawn(async move { store.rotate(&record, Issuance::default()).await })
            })
            .collect();

        let mut winners = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(AppError::Auth(AuthError::TokenInvalid)) => rejected += 1,
                Err(other) => panic!("unexpected error: {}", other),
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(rejected, 7);
        assert_eq!(store.count_active("alice").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_capacity_revokes_everything_before_issuing() {
        let store = store_with(5, 604800);

        let mut grants = Vec::new();
        for _ in 0..5 {
            grants.push(store.create("alice", issuance()).await.unwrap());
        }
        assert_eq!(store.count_active("alice").await.unwrap(), 5);

        let sixth = store.create("alice", issuance()).await.unwrap();

        assert_eq!(store.count_active("alice").await.unwrap(), 1);
        for grant in &grants {
            assert!(store.find(&grant.token).await.unwrap().is_none());
        }
        assert!(store.find(&sixth.token).await.unwrap().is_some());

        store.create("alice", issuance()).await.unwrap();
        assert_eq!(store.count_active("alice").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_capacity_is_per_principal() {
        let store = store_with(2, 604800);

        let bob = store.create("bob", issuance()).await.unwrap();
        for _ in 0..3 {
            store.create("alice", issuance()).await.unwrap();
        }

        assert!(store.find(&bob.token).await.unwrap().is_some());
        assert_eq!(store.count_active("bob").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_revoke_all_and_purge() {
        let store = store_with(5, 604800);
        store.create("alice", issuance()).await.unwrap();
        store.create("alice", issuance()).await.unwrap();

        assert_eq!(store.revoke_all("alice").await.unwrap(), 2);
        assert_eq!(store.count_active("alice").await.unwrap(), 0);

        let purged = store
            .purge_expired(Utc::now() + Duration::days(8))
            .await
            .unwrap();
        assert_eq!(purged, 2);
    }
}
