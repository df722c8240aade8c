use crate::auth::password::hash_password;
use crate::configuration::AdminSettings;
use crate::error::AppError;
use crate::store::{NewPrincipal, Principal, PrincipalRepository};

/// Create the configured administrator, or reset the secret hash, email and
/// display name of an existing one.
pub async fn ensure_admin(
    principals: &dyn PrincipalRepository,
    admin: &AdminSettings,
    hash_cost: u32,
) -> Result<Principal, AppError> {
    let existed = principals.exists_by_username(&admin.username).await?;
    let password_hash = hash_password(&admin.password, hash_cost).await?;

    let principal = principals
        .upsert(NewPrincipal {
            username: admin.username.clone(),
            password_hash,
            email: admin.email.clone(),
            full_name: admin.full_name.clone(),
        })
        .await?;

    if existed {
        tracing::debug!(username = %principal.username, "Updated admin principal");
    } else {
        tracing::info!(username = %principal.username, "Created admin principal");
    }
    Ok(principal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::verify_password;
    use crate::store::InMemoryPrincipalStore;

    fn admin(password: &str, email: &str) -> AdminSettings {
        AdminSettings {
            username: "admin".to_string(),
            password: password.to_string(),
            email: email.to_string(),
            full_name: "Site Admin".to_string(),
        }
    }

    #[tokio::test]
    async fn test_creates_then_resets_admin() {
        let store = InMemoryPrincipalStore::new();

        ensure_admin(&store, &admin("first", "admin@example.com"), 4)
            .await
            .unwrap();
        let updated = ensure_admin(&store, &admin("second", "root@example.com"), 4)
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(updated.email, "root@example.com");
        assert!(verify_password("second", &updated.password_hash).await.unwrap());
        assert!(!verify_password("first", &updated.password_hash).await.unwrap());
    }
}
