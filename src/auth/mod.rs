/// Authentication module
///
/// Rate limiting, token signing, credential checks, refresh token storage,
/// session cookies and the flows that combine them.

mod claims;
mod cookies;
mod jwt;
mod password;
mod rate_limit;
mod refresh_token;
mod seed;
mod service;
mod sweeper;

pub use claims::{Claims, TokenKind};
pub use cookies::{InboundTokens, SessionTransport, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE};
pub use jwt::{TokenIssuer, VerifiedToken};
pub use password::{hash_password, verify_password, CredentialVerifier};
pub use rate_limit::{RateLimitPolicy, RateLimiter};
pub use refresh_token::{generate_refresh_token, hash_token, Issuance, RefreshGrant, RefreshTokenStore};
pub use seed::ensure_admin;
pub use service::{
    AuthService, AuthenticatedPrincipal, PrincipalProfile, Registration, SessionIssued,
};
pub use sweeper::{run_once, spawn_sweeper, SweepReport, SweeperHandle};
