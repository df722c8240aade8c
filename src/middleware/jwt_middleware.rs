/// Access Token Middleware
///
/// Verifies the access token (cookie, or `Authorization: Bearer` header) and
/// injects the `AuthenticatedPrincipal` into request extensions for route
/// handlers. Refresh markers are refused.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::rc::Rc;

use crate::auth::AuthService;
use crate::error::AppError;

/// Guards routes that require a logged-in principal.
///
/// Expects `web::Data<AuthService>` in app data.
pub struct RequireAccessToken;

impl<S, B> Transform<S, ServiceRequest> for RequireAccessToken
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequireAccessTokenService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(RequireAccessTokenService {
            service: Rc::new(service),
        }))
    }
}

pub struct RequireAccessTokenService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for RequireAccessTokenService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let auth = match req.app_data::<web::Data<AuthService>>() {
            Some(auth) => auth.clone(),
            None => {
                let err = AppError::Internal("AuthService missing from app data".to_string());
                return Box::pin(async move { Err(err.into()) });
            }
        };

        match auth.authenticate(req.request()) {
            Ok(principal) => {
                tracing::debug!(username = %principal.username, "Access token verified");
                req.extensions_mut().insert(principal);

                let service = self.service.clone();
                Box::pin(async move { service.call(req).await })
            }
            Err(e) => {
                tracing::debug!(error = %e, path = %req.path(), "Access token rejected");
                let err = AppError::from(e);
                Box::pin(async move { Err(err.into()) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthenticatedPrincipal, ACCESS_TOKEN_COOKIE};
    use crate::configuration::{
        ApplicationSettings, CookieSettings, JwtSettings, PasswordSettings, RateLimitSettings,
        Settings,
    };
    use crate::store::{InMemoryPrincipalStore, InMemoryRefreshTokenStore};
    use actix_web::cookie::Cookie;
    use actix_web::http::StatusCode;
    use actix_web::{test, App, HttpResponse};
    use std::sync::Arc;

    async fn auth_service() -> web::Data<AuthService> {
        let settings = Settings {
            application: ApplicationSettings {
                host: "127.0.0.1".to_string(),
                port: 0,
                purge_interval_seconds: 86_400,
            },
            database: None,
            jwt: JwtSettings {
                secret: "test-secret-key-at-least-32-characters-long".to_string(),
                issuer: "test".to_string(),
                access_token_expiry: 900,
                refresh_token_expiry: 604_800,
                max_refresh_tokens_per_user: 5,
            },
            cookie: CookieSettings {
                secure: false,
                domain: None,
            },
            rate_limit: RateLimitSettings {
                max_attempts: 5,
                window_seconds: 900,
                lockout_seconds: 1800,
            },
            password: PasswordSettings { hash_cost: 4 },
            admin: None,
        };
        let service = AuthService::new(
            &settings,
            Arc::new(InMemoryPrincipalStore::new()),
            Arc::new(InMemoryRefreshTokenStore::new()),
        )
        .await
        .unwrap();
        web::Data::new(service)
    }

    async fn whoami(principal: web::ReqData<AuthenticatedPrincipal>) -> HttpResponse {
        HttpResponse::Ok().body(principal.username.clone())
    }

    #[actix_web::test]
    async fn test_valid_access_token_reaches_handler() {
        let auth = auth_service().await;
        let token = auth.token_issuer().issue_access_token("alice").unwrap();
        let app = test::init_service(
            App::new()
                .app_data(auth.clone())
                .service(
                    web::resource("/me")
                        .route(web::get().to(whoami))
                        .wrap(RequireAccessToken),
                ),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/me")
            .cookie(Cookie::new(ACCESS_TOKEN_COOKIE, token))
            .to_request();
        let body = test::call_and_read_body(&app, req).await;

        assert_eq!(body, "alice");
    }

    #[actix_web::test]
    async fn test_missing_token_is_unauthorized() {
        let auth = auth_service().await;
        let app = test::init_service(
            App::new()
                .app_data(auth.clone())
                .service(
                    web::resource("/me")
                        .route(web::get().to(whoami))
                        .wrap(RequireAccessToken),
                ),
        )
        .await;

        let req = test::TestRequest::get().uri("/me").to_request();
        let err = test::try_call_service(&app, req).await.unwrap_err();

        assert_eq!(err.as_response_error().status_code(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_refresh_marker_is_refused() {
        let auth = auth_service().await;
        let marker = auth.token_issuer().issue_refresh_marker("alice").unwrap();
        let app = test::init_service(
            App::new()
                .app_data(auth.clone())
                .service(
                    web::resource("/me")
                        .route(web::get().to(whoami))
                        .wrap(RequireAccessToken),
                ),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/me")
            .insert_header(("Authorization", format!("Bearer {}", marker)))
            .to_request();
        let err = test::try_call_service(&app, req).await.unwrap_err();

        assert_eq!(err.as_response_error().status_code(), StatusCode::UNAUTHORIZED);
    }
}
