/// Session flows
///
/// `AuthService` composes the limiter, credential check, token issuer,
/// refresh store and cookie transport into the login, refresh, logout,
/// logout-all, registration and current-session flows. Every flow returns a
/// typed result; the HTTP layer only picks status codes and attaches cookies.

use actix_web::cookie::Cookie;
use actix_web::HttpRequest;
use serde::Serialize;
use std::sync::Arc;

use crate::audit::{self, AuthEvent};
use crate::auth::claims::TokenKind;
use crate::auth::cookies::SessionTransport;
use crate::auth::jwt::TokenIssuer;
use crate::auth::password::{hash_password, CredentialVerifier};
use crate::auth::rate_limit::{RateLimitPolicy, RateLimiter};
use crate::auth::refresh_token::{Issuance, RefreshTokenStore};
use crate::configuration::Settings;
use crate::error::{AppError, AuthError, DatabaseError, ValidationError};
use crate::request_context::ClientContext;
use crate::store::{NewPrincipal, Principal, PrincipalRepository, RefreshTokenRepository};
use crate::validators::{validate_login, validate_registration};

/// Public profile fields; never carries the secret hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalProfile {
    pub username: String,
    pub email: String,
    pub full_name: String,
}

impl From<&Principal> for PrincipalProfile {
    fn from(principal: &Principal) -> Self {
        Self {
            username: principal.username.clone(),
            email: principal.email.clone(),
            full_name: principal.full_name.clone(),
        }
    }
}

/// Identity proven by a verified access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPrincipal {
    pub username: String,
}

/// Outcome of a successful login
#[derive(Debug)]
pub struct SessionIssued {
    pub profile: PrincipalProfile,
    pub cookies: Vec<Cookie<'static>>,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub password: String,
    pub email: String,
    pub full_name: String,
}

pub struct AuthService {
    principals: Arc<dyn PrincipalRepository>,
    limiter: Arc<RateLimiter>,
    tokens: TokenIssuer,
    credentials: CredentialVerifier,
    refresh_tokens: Arc<RefreshTokenStore>,
    transport: SessionTransport,
    hash_cost: u32,
}

impl AuthService {
    /// # Errors
    /// Config errors for an unusable signing secret; hashing errors while
    /// preparing the dummy hash.
    pub async fn new(
        settings: &Settings,
        principals: Arc<dyn PrincipalRepository>,
        refresh_repo: Arc<dyn RefreshTokenRepository>,
    ) -> Result<Self, AppError> {
        let tokens = TokenIssuer::new(&settings.jwt)?;
        let credentials =
            CredentialVerifier::new(Arc::clone(&principals), settings.password.hash_cost).await?;
        let refresh_tokens = RefreshTokenStore::new(
            refresh_repo,
            settings.jwt.refresh_token_expiry,
            settings.jwt.max_refresh_tokens_per_user,
        );
        let transport = SessionTransport::new(
            &settings.cookie,
            settings.jwt.access_token_expiry,
            settings.jwt.refresh_token_expiry,
        );

        Ok(Self {
            principals,
            limiter: Arc::new(RateLimiter::new(RateLimitPolicy::from(&settings.rate_limit))),
            tokens,
            credentials,
            refresh_tokens: Arc::new(refresh_tokens),
            transport,
            hash_cost: settings.password.hash_cost,
        })
    }

    pub fn limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.limiter)
    }

    pub fn refresh_tokens(&self) -> Arc<RefreshTokenStore> {
        Arc::clone(&self.refresh_tokens)
    }

    pub fn token_issuer(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn clear_cookies(&self) -> Vec<Cookie<'static>> {
        self.transport.clear()
    }

    fn rate_limited(&self, key: &str) -> Option<i64> {
        if self.limiter.is_limited(key) {
            Some(self.limiter.seconds_until_unlock(key).max(1))
        } else {
            None
        }
    }

    /// Locked keys are refused before the secret is looked at, even when
    /// it is correct.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        client: &ClientContext,
    ) -> Result<SessionIssued, AppError> {
        let username = validate_login(username, password)?;
        let key = format!("{}:{}", client.address, username);

        if let Some(retry_after_seconds) = self.rate_limited(&key) {
            audit::record(AuthEvent::LoginLocked {
                username: &username,
                address: &client.address,
                retry_after_seconds,
            });
            return Err(AuthError::RateLimited {
                retry_after_seconds,
            }
            .into());
        }

        let principal = match self.credentials.verify(&username, password).await {
            Ok(principal) => principal,
            Err(AppError::Auth(AuthError::InvalidCredentials { .. })) => {
                self.limiter.record_failure(&key);
                let remaining_attempts = self.limiter.remaining_attempts(&key);
                audit::record(AuthEvent::LoginFailed {
                    username: &username,
                    address: &client.address,
                    remaining_attempts,
                });
                return Err(AuthError::InvalidCredentials {
                    remaining_attempts: Some(remaining_attempts),
                }
                .into());
            }
            Err(e) => return Err(e),
        };

        self.limiter.record_success(&key);

        let access_token = self.tokens.issue_access_token(&principal.username)?;
        let grant = self
            .refresh_tokens
            .create(&principal.username, issuance(client))
            .await?;

        audit::record(AuthEvent::LoginSucceeded {
            username: &principal.username,
            address: &client.address,
        });

        Ok(SessionIssued {
            profile: PrincipalProfile::from(&principal),
            cookies: self.transport.encode(&access_token, &grant.token),
        })
    }

    /// Rotate the presented refresh token and mint a new access token.
    ///
    /// # Errors
    /// `Unauthenticated` without a refresh cookie; `TokenInvalid` for an
    /// unknown, revoked, expired or concurrently rotated token. Callers should
    /// clear the client's cookies on `TokenInvalid`.
    pub async fn refresh(
        &self,
        req: &HttpRequest,
        client: &ClientContext,
    ) -> Result<Vec<Cookie<'static>>, AppError> {
        let token = self
            .transport
            .decode(req)
            .refresh
            .ok_or(AuthError::Unauthenticated)?;

        let record = match self.refresh_tokens.find(&token).await? {
            Some(record) => record,
            None => return Err(AuthError::TokenInvalid.into()),
        };
        if !self.refresh_tokens.validate(&record).await? {
            return Err(AuthError::TokenInvalid.into());
        }

        let access_token = self.tokens.issue_access_token(&record.username)?;
        let grant = self
            .refresh_tokens
            .rotate(&record, issuance(client))
            .await?;

        audit::record(AuthEvent::RefreshRotated {
            username: &record.username,
        });

        Ok(self.transport.encode(&access_token, &grant.token))
    }

    /// Revoke the presented refresh token, if any, and clear both cookies.
    /// Never fails: store errors are logged and the cookies are cleared anyway.
    pub async fn logout(&self, req: &HttpRequest) -> Vec<Cookie<'static>> {
        let mut username = None;

        if let Some(token) = self.transport.decode(req).refresh {
            match self.refresh_tokens.find(&token).await {
                Ok(Some(record)) => match self.refresh_tokens.revoke(&record).await {
                    Ok(()) => username = Some(record.username),
                    Err(e) => tracing::warn!(error = %e, "Failed to revoke refresh token on logout"),
                },
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Failed to look up refresh token on logout"),
            }
        }

        audit::record(AuthEvent::LoggedOut {
            username: username.as_deref(),
        });
        self.transport.clear()
    }

    pub async fn logout_all(
        &self,
        principal: &AuthenticatedPrincipal,
    ) -> Result<Vec<Cookie<'static>>, AppError> {
        let revoked = self.refresh_tokens.revoke_all(&principal.username).await?;

        audit::record(AuthEvent::LoggedOutEverywhere {
            username: &principal.username,
            revoked,
        });
        Ok(self.transport.clear())
    }

    /// Create a principal. Username and email uniqueness are checked, in that
    /// order, before anything is written. Rejections count against
    /// `register:<address>`.
    pub async fn register(
        &self,
        registration: Registration,
        client: &ClientContext,
    ) -> Result<PrincipalProfile, AppError> {
        let key = format!("register:{}", client.address);

        if let Some(retry_after_seconds) = self.rate_limited(&key) {
            audit::record(AuthEvent::RegistrationLocked {
                address: &client.address,
                retry_after_seconds,
            });
            return Err(AuthError::RateLimited {
                retry_after_seconds,
            }
            .into());
        }

        let valid = match validate_registration(
            &registration.username,
            &registration.password,
            &registration.email,
            &registration.full_name,
        ) {
            Ok(valid) => valid,
            Err(e) => return Err(self.reject_registration(&key, client, "invalid_input", e)),
        };

        if self.principals.exists_by_username(&valid.username).await? {
            let error = duplicate("username");
            return Err(self.reject_registration(&key, client, "duplicate_username", error));
        }
        if self.principals.exists_by_email(&valid.email).await? {
            let error = duplicate("email");
            return Err(self.reject_registration(&key, client, "duplicate_email", error));
        }

        let password_hash = hash_password(&registration.password, self.hash_cost).await?;
        let principal = match self
            .principals
            .insert(NewPrincipal {
                username: valid.username,
                password_hash,
                email: valid.email,
                full_name: valid.full_name,
            })
            .await
        {
            Ok(principal) => principal,
            // Lost a race with a concurrent registration
            Err(DatabaseError::UniqueConstraintViolation(field)) => {
                let error = duplicate(&field);
                return Err(self.reject_registration(&key, client, "duplicate", error));
            }
            Err(e) => return Err(e.into()),
        };

        audit::record(AuthEvent::Registered {
            username: &principal.username,
            address: &client.address,
        });
        Ok(PrincipalProfile::from(&principal))
    }

    fn reject_registration(
        &self,
        key: &str,
        client: &ClientContext,
        reason: &str,
        error: ValidationError,
    ) -> AppError {
        self.limiter.record_failure(key);
        audit::record(AuthEvent::RegistrationRejected {
            address: &client.address,
            reason,
        });
        error.into()
    }

    /// Profile of an already authenticated principal
    pub async fn current_session(
        &self,
        principal: &AuthenticatedPrincipal,
    ) -> Result<PrincipalProfile, AppError> {
        let stored = self
            .principals
            .find_by_username(&principal.username)
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        Ok(PrincipalProfile::from(&stored))
    }

    /// Verify the request's access token.
    ///
    /// # Errors
    /// `Unauthenticated` when no token is present, `TokenExpired` or
    /// `TokenInvalid` from verification, `TokenInvalid` for a refresh marker.
    pub fn authenticate(&self, req: &HttpRequest) -> Result<AuthenticatedPrincipal, AuthError> {
        let token = self
            .transport
            .decode(req)
            .access
            .ok_or(AuthError::Unauthenticated)?;

        let verified = self.tokens.verify(&token)?;
        match verified.kind {
            TokenKind::Access => Ok(AuthenticatedPrincipal {
                username: verified.principal,
            }),
            TokenKind::RefreshMarker => Err(AuthError::TokenInvalid),
        }
    }
}

fn issuance(client: &ClientContext) -> Issuance<'_> {
    Issuance {
        user_agent: client.user_agent.as_deref(),
        address: Some(client.address.as_str()),
    }
}

fn duplicate(field: &str) -> ValidationError {
    ValidationError::DuplicateResource {
        field: field.to_string(),
    }
}
