/// Security response headers
///
/// Applied to every response:
/// - Clickjacking protection (X-Frame-Options)
/// - MIME sniffing protection (X-Content-Type-Options)
/// - Referrer leakage (Referrer-Policy)
/// - Transport downgrade (Strict-Transport-Security)
/// - Content-Security-Policy locked down to nothing, since the API serves no documents

use actix_web::middleware::DefaultHeaders;

pub struct SecurityHeaders;

impl SecurityHeaders {
    pub fn get_headers() -> Vec<(&'static str, &'static str)> {
        vec![
            ("X-Content-Type-Options", "nosniff"),
            ("X-Frame-Options", "DENY"),
            ("Referrer-Policy", "strict-origin-when-cross-origin"),
            (
                "Strict-Transport-Security",
                "max-age=31536000; includeSubDomains",
            ),
            (
                "Content-Security-Policy",
                "default-src 'none'; frame-ancestors 'none'",
            ),
        ]
    }

    /// Middleware that adds every header from [`SecurityHeaders::get_headers`]
    pub fn middleware() -> DefaultHeaders {
        Self::get_headers()
            .into_iter()
            .fold(DefaultHeaders::new(), |headers, header| headers.add(header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::{call_service, init_service, TestRequest};
    use actix_web::{web, App, HttpResponse};

    #[test]
    fn test_security_headers_present() {
        let headers = SecurityHeaders::get_headers();

        assert!(headers.iter().any(|(k, _)| *k == "X-Content-Type-Options"));
        assert!(headers.iter().any(|(k, v)| *k == "X-Frame-Options" && *v == "DENY"));
        assert!(headers.iter().any(|(k, _)| *k == "Content-Security-Policy"));
    }

    #[actix_web::test]
    async fn test_middleware_sets_headers() {
        let app = init_service(
            App::new()
                .wrap(SecurityHeaders::middleware())
                .route("/", web::get().to(HttpResponse::Ok)),
        )
        .await;

        let res = call_service(&app, TestRequest::get().uri("/").to_request()).await;

        assert_eq!(res.headers().get("x-frame-options").unwrap(), "DENY");
        assert_eq!(res.headers().get("x-content-type-options").unwrap(), "nosniff");
    }
}
