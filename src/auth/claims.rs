/// Token Claims
///
/// The signed payload carried by access and refresh-marker tokens. The kind
/// is a closed enum, so every verification path matches all kinds.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// What a signed token may be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    #[serde(rename = "access")]
    Access,
    #[serde(rename = "refresh")]
    RefreshMarker,
}

/// JWT claims (RFC 7519 registered claims plus the token kind)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (principal username)
    pub sub: String,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    pub iss: String,
}

impl Claims {
    /// # Arguments
    /// * `subject` - Principal username
    /// * `kind` - Token kind
    /// * `ttl_seconds` - Lifetime from now
    /// * `issuer` - Issuer identifier
    pub fn new(subject: &str, kind: TokenKind, ttl_seconds: i64, issuer: &str) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: subject.to_string(),
            kind,
            iat: now,
            exp: now + ttl_seconds,
            iss: issuer.to_string(),
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    pub fn is_expired(&self) -> bool {
        self.exp < Utc::now().timestamp()
    }
}
