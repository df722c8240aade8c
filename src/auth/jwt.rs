/// Token Issuing and Verification
///
/// Stateless HMAC-SHA256 signed tokens. Access tokens are short-lived and
/// prove identity without a store lookup; refresh markers carry the refresh
/// lifetime and are never accepted where an access token is required.

use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::auth::claims::{Claims, TokenKind};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError, ConfigError};

const MIN_SECRET_LENGTH: usize = 32;

/// A token whose signature, issuer and expiry have been checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub principal: String,
    pub kind: TokenKind,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    access_ttl: i64,
    refresh_ttl: i64,
}

impl TokenIssuer {
    /// # Errors
    /// Returns a config error when the secret is shorter than 32 bytes
    pub fn new(config: &JwtSettings) -> Result<Self, AppError> {
        if config.secret.len() < MIN_SECRET_LENGTH {
            return Err(ConfigError::InvalidValue(format!(
                "jwt.secret must be at least {} bytes",
                MIN_SECRET_LENGTH
            ))
            .into());
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            access_ttl: config.access_token_expiry,
            refresh_ttl: config.refresh_token_expiry,
        })
    }

    pub fn access_ttl(&self) -> i64 {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> i64 {
        self.refresh_ttl
    }

    pub fn issue_access_token(&self, principal: &str) -> Result<String, AppError> {
        self.sign(principal, TokenKind::Access, self.access_ttl)
    }

    pub fn issue_refresh_marker(&self, principal: &str) -> Result<String, AppError> {
        self.sign(principal, TokenKind::RefreshMarker, self.refresh_ttl)
    }

    /// Full check: signature, structure, issuer and expiry.
    ///
    /// # Errors
    /// `TokenExpired` when past `exp`, `TokenInvalid` for anything else.
    pub fn verify(&self, token: &str) -> Result<VerifiedToken, AuthError> {
        let claims = self.decode_claims(token, true)?;
        Ok(VerifiedToken {
            principal: claims.sub.clone(),
            kind: claims.kind,
            expires_at: claims.expires_at(),
        })
    }

    /// Signature and structure only; expiry is not checked, so callers that
    /// need a usable token must go through [`TokenIssuer::verify`].
    pub fn extract_principal(&self, token: &str) -> Result<String, AuthError> {
        self.decode_claims(token, false).map(|claims| claims.sub)
    }

    fn sign(&self, principal: &str, kind: TokenKind, ttl: i64) -> Result<String, AppError> {
        let claims = Claims::new(principal, kind, ttl, &self.issuer);

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))
    }

    fn decode_claims(&self, token: &str, check_expiry: bool) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        validation.leeway = 0;
        validation.validate_exp = check_expiry;

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => {
                    tracing::debug!("Token rejected: {}", e);
                    AuthError::TokenInvalid
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_test_config() -> JwtSettings {
        JwtSettings {
            secret: "test-secret-key-at-least-32-characters-long".to_string(),
            issuer: "test".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: 604800,
            max_refresh_tokens_per_user: 5,
        }
    }

    #[test]
    fn test_issue_and_verify_access_token() {
        let issuer = TokenIssuer::new(&get_test_config()).unwrap();

        let token = issuer.issue_access_token("alice").expect("Failed to issue token");
        let verified = issuer.verify(&token).expect("Failed to verify token");

        assert_eq!(verified.principal, "alice");
        assert_eq!(verified.kind, TokenKind::Access);
    }

    #[test]
    fn test_refresh_marker_has_its_own_kind() {
        let issuer = TokenIssuer::new(&get_test_config()).unwrap();

        let token = issuer.issue_refresh_marker("alice").unwrap();
        let verified = issuer.verify(&token).unwrap();

        assert_eq!(verified.kind, TokenKind::RefreshMarker);
        assert!(verified.expires_at > Utc::now() + chrono::Duration::days(6));
    }

    #[test]
    fn test_short_secret_is_rejected() {
        let mut config = get_test_config();
        config.secret = "too-short".to_string();

        assert!(matches!(
            TokenIssuer::new(&config),
            Err(AppError::Config(ConfigError::InvalidValue(_)))
        ));
    }

    #[test]
    fn test_expired_token_reports_expiry() {
        let mut config = get_test_config();
        config.access_token_expiry = -10;
        let issuer = TokenIssuer::new(&config).unwrap();

        let token = issuer.issue_access_token("alice").unwrap();

        assert_eq!(issuer.verify(&token), Err(AuthError::TokenExpired));
    }

    #[test]
    fn test_extract_principal_ignores_expiry() {
        let mut config = get_test_config();
        config.access_token_expiry = -10;
        let issuer = TokenIssuer::new(&config).unwrap();

        let token = issuer.issue_access_token("alice").unwrap();

        assert_eq!(issuer.extract_principal(&token).unwrap(), "alice");
    }

    #[test]
    fn test_malformed_token_is_invalid() {
        let issuer = TokenIssuer::new(&get_test_config()).unwrap();

        assert_eq!(issuer.verify("invalid.token.here"), Err(AuthError::TokenInvalid));
        assert_eq!(
            issuer.extract_principal("invalid.token.here"),
            Err(AuthError::TokenInvalid)
        );
    }

    #[test]
    fn test_tampered_token_is_invalid() {
        let issuer = TokenIssuer::new(&get_test_config()).unwrap();
        let token = issuer.issue_access_token("alice").unwrap();

        let tampered = format!("{}X", token);

        assert_eq!(issuer.verify(&tampered), Err(AuthError::TokenInvalid));
    }

    #[test]
    fn test_expired_and_tampered_are_told_apart() {
        let mut config = get_test_config();
        config.access_token_expiry = -10;
        let issuer = TokenIssuer::new(&config).unwrap();
        let token = issuer.issue_access_token("alice").unwrap();

        assert_eq!(issuer.verify(&token), Err(AuthError::TokenExpired));
        assert_eq!(
            issuer.verify(&format!("{}X", token)),
            Err(AuthError::TokenInvalid)
        );
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let issuer = TokenIssuer::new(&get_test_config()).unwrap();
        let mut other = get_test_config();
        other.secret = "a-completely-different-secret-of-enough-length".to_string();
        let other_issuer = TokenIssuer::new(&other).unwrap();

        let token = other_issuer.issue_access_token("alice").unwrap();

        assert_eq!(issuer.verify(&token), Err(AuthError::TokenInvalid));
    }

    #[test]
    fn test_wrong_issuer() {
        let issuer = TokenIssuer::new(&get_test_config()).unwrap();
        let mut config = get_test_config();
        config.issuer = "wrong-issuer".to_string();
        let foreign = TokenIssuer::new(&config).unwrap();

        let token = foreign.issue_access_token("alice").unwrap();

        assert_eq!(issuer.verify(&token), Err(AuthError::TokenInvalid));
    }
}
