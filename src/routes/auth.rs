/// Authentication Routes
///
/// The `/api/auth` surface. Tokens only ever travel in cookies; response
/// bodies carry profile fields or a short message.

use actix_web::cookie::Cookie;
use actix_web::{web, HttpRequest, HttpResponse, HttpResponseBuilder, ResponseError};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthService, AuthenticatedPrincipal, Registration};
use crate::error::{AppError, AuthError};
use crate::request_context::ClientContext;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub email: String,
    pub full_name: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

fn with_cookies(mut builder: HttpResponseBuilder, cookies: Vec<Cookie<'static>>) -> HttpResponseBuilder {
    for cookie in cookies {
        builder.cookie(cookie);
    }
    builder
}

/// POST /api/auth/login
///
/// # Errors
/// - 400: Missing username or password
/// - 401: Invalid credentials, with `remainingAttempts`
/// - 429: Locked out, with `retryAfterSeconds`
pub async fn login(
    form: web::Json<LoginRequest>,
    client: ClientContext,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let form = form.into_inner();
    let session = auth.login(&form.username, &form.password, &client).await?;

    Ok(with_cookies(HttpResponse::Ok(), session.cookies).json(session.profile))
}

/// POST /api/auth/refresh
///
/// Rotates the refresh cookie and replaces the access cookie. An invalid
/// refresh token also clears both cookies.
pub async fn refresh(
    req: HttpRequest,
    client: ClientContext,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    match auth.refresh(&req, &client).await {
        Ok(cookies) => Ok(with_cookies(HttpResponse::Ok(), cookies).json(MessageResponse {
            message: "Token refreshed successfully",
        })),
        Err(err @ AppError::Auth(AuthError::TokenInvalid)) => {
            let mut response = err.error_response();
            for cookie in auth.clear_cookies() {
                response
                    .add_cookie(&cookie)
                    .map_err(|e| AppError::Internal(format!("Failed to clear cookie: {}", e)))?;
            }
            Ok(response)
        }
        Err(err) => Err(err),
    }
}

/// POST /api/auth/logout
///
/// Always succeeds, with or without a session.
pub async fn logout(req: HttpRequest, auth: web::Data<AuthService>) -> HttpResponse {
    let cookies = auth.logout(&req).await;

    with_cookies(HttpResponse::Ok(), cookies).json(MessageResponse {
        message: "Logged out successfully",
    })
}

/// POST /api/auth/logout-all
///
/// **Requires a valid access token.** Revokes every refresh token of the
/// principal.
pub async fn logout_all(
    principal: web::ReqData<AuthenticatedPrincipal>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let cookies = auth.logout_all(&principal).await?;

    Ok(with_cookies(HttpResponse::Ok(), cookies).json(MessageResponse {
        message: "Logged out from all devices",
    }))
}

/// GET /api/auth/me
///
/// **Requires a valid access token.**
pub async fn me(
    principal: web::ReqData<AuthenticatedPrincipal>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let profile = auth.current_session(&principal).await?;
    Ok(HttpResponse::Ok().json(profile))
}

/// POST /api/auth/register
///
/// # Errors
/// - 400: Invalid fields (`fieldErrors`) or a taken username/email (`field`)
/// - 429: Too many rejected registrations from this address
pub async fn register(
    form: web::Json<RegisterRequest>,
    client: ClientContext,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let form = form.into_inner();
    let profile = auth
        .register(
            Registration {
                username: form.username,
                password: form.password,
                email: form.email,
                full_name: form.full_name,
            },
            &client,
        )
        .await?;

    Ok(HttpResponse::Ok().json(profile))
}
