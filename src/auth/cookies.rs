/// Session cookies
///
/// Both tokens travel as `HttpOnly`, `SameSite=Strict` cookies scoped to `/`.
/// The access cookie lives as long as the access token, the refresh cookie as
/// long as the refresh token. Clearing sends both back with `Max-Age=0`.

use actix_web::cookie::{time::Duration, Cookie, SameSite};
use actix_web::http::header;
use actix_web::HttpRequest;

use crate::configuration::CookieSettings;

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

/// Tokens found on an inbound request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundTokens {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionTransport {
    secure: bool,
    domain: Option<String>,
    access_ttl: i64,
    refresh_ttl: i64,
}

impl SessionTransport {
    pub fn new(settings: &CookieSettings, access_ttl: i64, refresh_ttl: i64) -> Self {
        Self {
            secure: settings.secure,
            domain: settings.domain.clone().filter(|d| !d.is_empty()),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn encode(&self, access_token: &str, refresh_token: &str) -> Vec<Cookie<'static>> {
        vec![
            self.cookie(ACCESS_TOKEN_COOKIE, access_token.to_string(), self.access_ttl),
            self.cookie(REFRESH_TOKEN_COOKIE, refresh_token.to_string(), self.refresh_ttl),
        ]
    }

    /// Cookies first; the access token falls back to `Authorization: Bearer`.
    pub fn decode(&self, req: &HttpRequest) -> InboundTokens {
        let access = cookie_value(req, ACCESS_TOKEN_COOKIE).or_else(|| bearer_token(req));
        let refresh = cookie_value(req, REFRESH_TOKEN_COOKIE);

        InboundTokens { access, refresh }
    }

    pub fn clear(&self) -> Vec<Cookie<'static>> {
        vec![
            self.cookie(ACCESS_TOKEN_COOKIE, String::new(), 0),
            self.cookie(REFRESH_TOKEN_COOKIE, String::new(), 0),
        ]
    }

    fn cookie(&self, name: &'static str, value: String, max_age: i64) -> Cookie<'static> {
        let mut builder = Cookie::build(name, value)
            .http_only(true)
            .secure(self.secure)
            .path("/")
            .same_site(SameSite::Strict)
            .max_age(Duration::seconds(max_age.max(0)));

        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }
        builder.finish()
    }
}

fn cookie_value(req: &HttpRequest, name: &str) -> Option<String> {
    req.cookie(name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

fn bearer_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
