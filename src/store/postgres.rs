use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use super::{NewPrincipal, Principal, PrincipalRepository, RefreshRecord, RefreshTokenRepository};
use crate::error::DatabaseError;

type PrincipalRow = (String, String, String, String, DateTime<Utc>);
type RefreshRow = (
    String,
    String,
    DateTime<Utc>,
    bool,
    Option<String>,
    Option<String>,
    DateTime<Utc>,
);

fn principal_from_row(row: PrincipalRow) -> Principal {
    let (username, password_hash, email, full_name, created_at) = row;
    Principal {
        username,
        password_hash,
        email,
        full_name,
        created_at,
    }
}

fn record_from_row(row: RefreshRow) -> RefreshRecord {
    let (token_hash, username, expires_at, revoked, user_agent, ip_address, created_at) = row;
    RefreshRecord {
        token_hash,
        username,
        expires_at,
        revoked,
        user_agent,
        ip_address,
        created_at,
    }
}

/// Principals table in PostgreSQL
#[derive(Clone)]
pub struct PgPrincipalStore {
    pool: PgPool,
}

impl PgPrincipalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PrincipalRepository for PgPrincipalStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>, DatabaseError> {
        let row = sqlx::query_as::<_, PrincipalRow>(
            r#"
            SELECT username, password_hash, email, full_name, created_at
            FROM principals
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(principal_from_row))
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool, DatabaseError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM principals WHERE username = $1)",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, DatabaseError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM principals WHERE email = $1)",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn insert(&self, principal: NewPrincipal) -> Result<Principal, DatabaseError> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, PrincipalRow>(
            r#"
            INSERT INTO principals (username, password_hash, email, full_name, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING username, password_hash, email, full_name, created_at
            "#,
        )
        .bind(&principal.username)
        .bind(&principal.password_hash)
        .bind(&principal.email)
        .bind(&principal.full_name)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(principal_from_row(row))
    }

    async fn upsert(&self, principal: NewPrincipal) -> Result<Principal, DatabaseError> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, PrincipalRow>(
            r#"
            INSERT INTO principals (username, password_hash, email, full_name, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (username) DO UPDATE
            SET password_hash = EXCLUDED.password_hash,
                email = EXCLUDED.email,
                full_name = EXCLUDED.full_name,
                updated_at = EXCLUDED.updated_at
            RETURNING username, password_hash, email, full_name, created_at
            "#,
        )
        .bind(&principal.username)
        .bind(&principal.password_hash)
        .bind(&principal.email)
        .bind(&principal.full_name)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(principal_from_row(row))
    }

    async fn count(&self) -> Result<u64, DatabaseError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM principals")
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u64)
    }
}

/// Refresh records table in PostgreSQL.
///
/// Bounded inserts and rotations lock the owning principal row first, which
/// serialises every capacity check for that principal. Rotation revokes the
/// old row with a conditional update; a concurrent second rotation blocks on
/// the row lock, then re-reads `revoked = TRUE` and updates nothing.
#[derive(Clone)]
pub struct PgRefreshTokenStore {
    pool: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn lock_principal(conn: &mut PgConnection, username: &str) -> Result<(), DatabaseError> {
    sqlx::query("SELECT username FROM principals WHERE username = $1 FOR UPDATE")
        .bind(username)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("principal {}", username)))?;
    Ok(())
}

async fn insert_bounded_in(
    conn: &mut PgConnection,
    record: &RefreshRecord,
    max_active: usize,
) -> Result<(), DatabaseError> {
    let active = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM refresh_tokens WHERE username = $1 AND revoked = FALSE",
    )
    .bind(&record.username)
    .fetch_one(&mut *conn)
    .await?;

    if active as usize >= max_active {
        sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = TRUE, revoked_at = $1
            WHERE username = $2 AND revoked = FALSE
            "#,
        )
        .bind(Utc::now())
        .bind(&record.username)
        .execute(&mut *conn)
        .await?;
    }

    sqlx::query(
        r#"
        INSERT INTO refresh_tokens
            (token_hash, username, expires_at, revoked, user_agent, ip_address, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(&record.token_hash)
    .bind(&record.username)
    .bind(record.expires_at)
    .bind(record.revoked)
    .bind(&record.user_agent)
    .bind(&record.ip_address)
    .bind(record.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[async_trait]
impl RefreshTokenRepository for PgRefreshTokenStore {
    async fn insert_bounded(
        &self,
        record: RefreshRecord,
        max_active: usize,
    ) -> Result<RefreshRecord, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        lock_principal(&mut tx, &record.username).await?;
        insert_bounded_in(&mut tx, &record, max_active).await?;
        tx.commit().await?;

        Ok(record)
    }

    async fn find_active(&self, token_hash: &str) -> Result<Option<RefreshRecord>, DatabaseError> {
        let row = sqlx::query_as::<_, RefreshRow>(
            r#"
            SELECT token_hash, username, expires_at, revoked, user_agent, ip_address, created_at
            FROM refresh_tokens
            WHERE token_hash = $1 AND revoked = FALSE
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(record_from_row))
    }

    async fn revoke(&self, token_hash: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = TRUE, revoked_at = $1
            WHERE token_hash = $2 AND revoked = FALSE
            "#,
        )
        .bind(Utc::now())
        .bind(token_hash)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all(&self, username: &str) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = TRUE, revoked_at = $1
            WHERE username = $2 AND revoked = FALSE
            "#,
        )
        .bind(Utc::now())
        .bind(username)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn rotate(
        &self,
        old_token_hash: &str,
        replacement: RefreshRecord,
        max_active: usize,
    ) -> Result<Option<RefreshRecord>, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        lock_principal(&mut tx, &replacement.username).await?;

        let revoked = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = TRUE, revoked_at = $1
            WHERE token_hash = $2 AND username = $3 AND revoked = FALSE
            "#,
        )
        .bind(Utc::now())
        .bind(old_token_hash)
        .bind(&replacement.username)
        .execute(&mut *tx)
        .await?;

        if revoked.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        insert_bounded_in(&mut tx, &replacement, max_active).await?;
        tx.commit().await?;

        Ok(Some(replacement))
    }

    async fn count_active(&self, username: &str) -> Result<u64, DatabaseError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM refresh_tokens WHERE username = $1 AND revoked = FALSE",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u64)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
