/// Secret Hashing and Credential Verification
///
/// Secrets are hashed with bcrypt; comparison happens inside bcrypt, never on
/// plaintext. bcrypt is CPU-bound, so hashing runs on the blocking pool.

use bcrypt::{hash, verify};
use std::sync::Arc;

use crate::error::{AppError, AuthError};
use crate::store::{Principal, PrincipalRepository};

const DUMMY_SECRET: &str = "timing-equalisation-secret";

/// Hash a secret with bcrypt at the given cost
///
/// # Errors
/// Returns error if bcrypt hashing fails or the blocking task is lost
pub async fn hash_password(password: &str, cost: u32) -> Result<String, AppError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash(password, cost))
        .await?
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

/// Verify a secret against a bcrypt hash
///
/// # Errors
/// Returns error if the stored hash is malformed
pub async fn verify_password(password: &str, password_hash: &str) -> Result<bool, AppError> {
    let password = password.to_string();
    let password_hash = password_hash.to_string();
    tokio::task::spawn_blocking(move || verify(password, &password_hash))
        .await?
        .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))
}

/// Checks submitted credentials against the principal store.
///
/// Unknown usernames and wrong secrets fail identically, and an unknown
/// username still pays for one bcrypt verification against a dummy hash.
pub struct CredentialVerifier {
    principals: Arc<dyn PrincipalRepository>,
    dummy_hash: String,
}

impl CredentialVerifier {
    pub async fn new(principals: Arc<dyn PrincipalRepository>, cost: u32) -> Result<Self, AppError> {
        let dummy_hash = hash_password(DUMMY_SECRET, cost).await?;
        Ok(Self {
            principals,
            dummy_hash,
        })
    }

    /// # Errors
    /// `InvalidCredentials` for an unknown username or a wrong secret; storage
    /// and hashing faults propagate as they are.
    pub async fn verify(&self, username: &str, secret: &str) -> Result<Principal, AppError> {
        let principal = self.principals.find_by_username(username).await?;

        let (hash_to_check, principal) = match principal {
            Some(p) => (p.password_hash.clone(), Some(p)),
            None => (self.dummy_hash.clone(), None),
        };

        let matches = verify_password(secret, &hash_to_check).await?;

        match principal {
            Some(p) if matches => Ok(p),
            _ => Err(AuthError::InvalidCredentials {
                remaining_attempts: None,
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryPrincipalStore, NewPrincipal};

    const TEST_COST: u32 = 4;

    async fn verifier_with_alice() -> CredentialVerifier {
        let store = Arc::new(InMemoryPrincipalStore::new());
        store
            .insert(NewPrincipal {
                username: "alice".to_string(),
                password_hash: hash_password("CorrectHorse1", TEST_COST).await.unwrap(),
                email: "alice@example.com".to_string(),
                full_name: "Alice Liddell".to_string(),
            })
            .await
            .unwrap();

        CredentialVerifier::new(store, TEST_COST).await.unwrap()
    }

    #[tokio::test]
    async fn test_hash_password() {
        let password = "ValidPassword123";
        let hashed = hash_password(password, TEST_COST).await.expect("Failed to hash password");

        assert_ne!(password, hashed);
        assert!(hashed.starts_with("$2"));
    }

    #[tokio::test]
    async fn test_verify_password() {
        let hashed = hash_password("ValidPassword123", TEST_COST).await.unwrap();

        assert!(verify_password("ValidPassword123", &hashed).await.unwrap());
        assert!(!verify_password("WrongPassword123", &hashed).await.unwrap());
    }

    #[tokio::test]
    async fn test_verifier_accepts_correct_secret() {
        let verifier = verifier_with_alice().await;

        let principal = verifier.verify("alice", "CorrectHorse1").await.unwrap();

        assert_eq!(principal.username, "alice");
        assert_eq!(principal.email, "alice@example.com");
    }

    #[tokio::test]
    async fn test_unknown_user_and_wrong_secret_are_indistinguishable() {
        let verifier = verifier_with_alice().await;

        let wrong_secret = verifier.verify("alice", "nope").await.unwrap_err();
        let unknown_user = verifier.verify("mallory", "CorrectHorse1").await.unwrap_err();

        assert_eq!(wrong_secret.to_string(), unknown_user.to_string());
        assert!(matches!(
            wrong_secret,
            AppError::Auth(AuthError::InvalidCredentials { .. })
        ));
        assert!(matches!(
            unknown_user,
            AppError::Auth(AuthError::InvalidCredentials { .. })
        ));
    }
}
