/// Client identity of an inbound request
///
/// Address precedence: first hop of `X-Forwarded-For`, then `X-Real-IP`, then
/// the socket peer. The address keys rate limiting and is stamped onto
/// refresh records along with the user agent.

use actix_web::dev::Payload;
use actix_web::http::header;
use actix_web::{FromRequest, HttpRequest};
use std::future::{ready, Ready};

use crate::error::AppError;

const UNKNOWN_ADDRESS: &str = "unknown";
const MAX_USER_AGENT_LENGTH: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    pub address: String,
    pub user_agent: Option<String>,
}

impl ClientContext {
    pub fn resolve(req: &HttpRequest) -> Self {
        Self {
            address: client_address(req),
            user_agent: user_agent(req),
        }
    }
}

impl FromRequest for ClientContext {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Ok(ClientContext::resolve(req)))
    }
}

fn header_value<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub fn client_address(req: &HttpRequest) -> String {
    if let Some(first_hop) = header_value(req, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first_hop.to_string();
    }

    if let Some(real_ip) = header_value(req, "x-real-ip") {
        return real_ip.to_string();
    }

    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string())
}

fn user_agent(req: &HttpRequest) -> Option<String> {
    header_value(req, header::USER_AGENT.as_str())
        .map(|ua| ua.chars().take(MAX_USER_AGENT_LENGTH).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_forwarded_for_first_hop_wins() {
        let req = TestRequest::default()
            .insert_header(("X-Forwarded-For", "203.0.113.7, 10.0.0.2"))
            .insert_header(("X-Real-IP", "198.51.100.1"))
            .peer_addr("127.0.0.1:5000".parse().unwrap())
            .to_http_request();

        assert_eq!(client_address(&req), "203.0.113.7");
    }

    #[test]
    fn test_real_ip_before_peer() {
        let req = TestRequest::default()
            .insert_header(("X-Real-IP", "198.51.100.1"))
            .peer_addr("127.0.0.1:5000".parse().unwrap())
            .to_http_request();

        assert_eq!(client_address(&req), "198.51.100.1");
    }

    #[test]
    fn test_peer_address_fallback() {
        let req = TestRequest::default()
            .peer_addr("192.0.2.10:443".parse().unwrap())
            .to_http_request();

        assert_eq!(client_address(&req), "192.0.2.10");
    }

    #[test]
    fn test_no_address_at_all() {
        let req = TestRequest::default().to_http_request();
        assert_eq!(client_address(&req), "unknown");
    }

    #[test]
    fn test_user_agent_is_captured() {
        let req = TestRequest::default()
            .insert_header((header::USER_AGENT, "curl/8.0"))
            .to_http_request();

        let context = ClientContext::resolve(&req);

        assert_eq!(context.user_agent.as_deref(), Some("curl/8.0"));
    }
}
