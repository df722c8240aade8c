use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{NewPrincipal, Principal, PrincipalRepository, RefreshRecord, RefreshTokenRepository};
use crate::error::DatabaseError;

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, DatabaseError> {
    mutex
        .lock()
        .map_err(|_| DatabaseError::UnexpectedError("in-memory store lock poisoned".to_string()))
}

/// Process-local principal table
#[derive(Default)]
pub struct InMemoryPrincipalStore {
    principals: Mutex<HashMap<String, Principal>>,
}

impl InMemoryPrincipalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PrincipalRepository for InMemoryPrincipalStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>, DatabaseError> {
        Ok(lock(&self.principals)?.get(username).cloned())
    }

    async fn exists_by_username(&self, username: &str) -> Result<bool, DatabaseError> {
        Ok(lock(&self.principals)?.contains_key(username))
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, DatabaseError> {
        Ok(lock(&self.principals)?.values().any(|p| p.email == email))
    }

    async fn insert(&self, principal: NewPrincipal) -> Result<Principal, DatabaseError> {
        let mut principals = lock(&self.principals)?;

        if principals.contains_key(&principal.username) {
            return Err(DatabaseError::UniqueConstraintViolation("username".to_string()));
        }
        if principals.values().any(|p| p.email == principal.email) {
            return Err(DatabaseError::UniqueConstraintViolation("email".to_string()));
        }

        let stored = Principal {
            username: principal.username,
            password_hash: principal.password_hash,
            email: principal.email,
            full_name: principal.full_name,
            created_at: Utc::now(),
        };
        principals.insert(stored.username.clone(), stored.clone());
        Ok(stored)
    }

    async fn upsert(&self, principal: NewPrincipal) -> Result<Principal, DatabaseError> {
        let mut principals = lock(&self.principals)?;

        if principals
            .values()
            .any(|p| p.email == principal.email && p.username != principal.username)
        {
            return Err(DatabaseError::UniqueConstraintViolation("email".to_string()));
        }

        let created_at = principals
            .get(&principal.username)
            .map(|p| p.created_at)
            .unwrap_or_else(Utc::now);
        let stored = Principal {
            username: principal.username,
            password_hash: principal.password_hash,
            email: principal.email,
            full_name: principal.full_name,
            created_at,
        };
        principals.insert(stored.username.clone(), stored.clone());
        Ok(stored)
    }

    async fn count(&self) -> Result<u64, DatabaseError> {
        Ok(lock(&self.principals)?.len() as u64)
    }
}

/// Process-local refresh record table keyed by token digest.
///
/// One lock covers the whole table, so every read-check-write below is a
/// single critical section.
#[derive(Default)]
pub struct InMemoryRefreshTokenStore {
    records: Mutex<HashMap<String, RefreshRecord>>,
}

impl InMemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn revoke_all_locked(records: &mut HashMap<String, RefreshRecord>, username: &str) -> u64 {
    let mut revoked = 0;
    for record in records.values_mut() {
        if record.username == username && !record.revoked {
            record.revoked = true;
            revoked += 1;
        }
    }
    revoked
}

fn insert_bounded_locked(
    records: &mut HashMap<String, RefreshRecord>,
    record: RefreshRecord,
    max_active: usize,
) -> Result<RefreshRecord, DatabaseError> {
    if records.contains_key(&record.token_hash) {
        return Err(DatabaseError::UniqueConstraintViolation("token".to_string()));
    }

    let active = records
        .values()
        .filter(|r| r.username == record.username && !r.revoked)
        .count();
    if active >= max_active {
        revoke_all_locked(records, &record.username);
    }

    records.insert(record.token_hash.clone(), record.clone());
    Ok(record)
}

#[async_trait]
impl RefreshTokenRepository for InMemoryRefreshTokenStore {
    async fn insert_bounded(
        &self,
        record: RefreshRecord,
        max_active: usize,
    ) -> Result<RefreshRecord, DatabaseError> {
        let mut records = lock(&self.records)?;
        insert_bounded_locked(&mut records, record, max_active)
    }

    async fn find_active(&self, token_hash: &str) -> Result<Option<RefreshRecord>, DatabaseError> {
        Ok(lock(&self.records)?
            .get(token_hash)
            .filter(|r| !r.revoked)
            .cloned())
    }

    async fn revoke(&self, token_hash: &str) -> Result<bool, DatabaseError> {
        let mut records = lock(&self.records)?;
        match records.get_mut(token_hash) {
            Some(record) if !record.revoked => {
                record.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all(&self, username: &str) -> Result<u64, DatabaseError> {
        let mut records = lock(&self.records)?;
        Ok(revoke_all_locked(&mut records, username))
    }

    async fn rotate(
        &self,
        old_token_hash: &str,
        replacement: RefreshRecord,
        max_active: usize,
    ) -> Result<Option<RefreshRecord>, DatabaseError> {
        let mut records = lock(&self.records)?;

        if records.contains_key(&replacement.token_hash) {
            return Err(DatabaseError::UniqueConstraintViolation("token".to_string()));
        }
        match records.get_mut(old_token_hash) {
            Some(old) if !old.revoked => old.revoked = true,
            _ => return Ok(None),
        }

        insert_bounded_locked(&mut records, replacement, max_active).map(Some)
    }

    async fn count_active(&self, username: &str) -> Result<u64, DatabaseError> {
        Ok(lock(&self.records)?
            .values()
            .filter(|r| r.username == username && !r.revoked)
            .count() as u64)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let mut records = lock(&self.records)?;
        let before = records.len();
        records.retain(|_, r| !r.is_expired_at(now));
        Ok((before - records.len()) as u64)
    }
}
