/// Error Handling Module
///
/// A single error type for the whole service. Components return their own
/// domain error enums, which fold into `AppError` through `From` so that `?`
/// carries them up to the HTTP layer. The HTTP layer maps every variant to a
/// stable status code and a structured JSON body; internal detail is logged,
/// never echoed to the client.

use actix_web::{error::ResponseError, http::header, http::StatusCode, HttpResponse};
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;

/// ============================================================================
/// 1. DOMAIN-SPECIFIC ERROR TYPES
/// ============================================================================

/// Input validation failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// One or more request fields failed validation, keyed by field name.
    FieldErrors(BTreeMap<String, String>),
    /// A unique field (username, email) is already taken.
    DuplicateResource { field: String },
    /// The request body could not be parsed.
    MalformedBody,
}

impl ValidationError {
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(field.to_string(), message.into());
        ValidationError::FieldErrors(errors)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::FieldErrors(errors) => {
                let fields: Vec<&str> = errors.keys().map(String::as_str).collect();
                write!(f, "validation failed for: {}", fields.join(", "))
            }
            ValidationError::DuplicateResource { field } => {
                write!(f, "{} is already in use", field)
            }
            ValidationError::MalformedBody => {
                write!(f, "request body is malformed or missing required fields")
            }
        }
    }
}

impl StdError for ValidationError {}

/// Storage errors
#[derive(Debug)]
pub enum DatabaseError {
    /// Carries the name of the violated field.
    UniqueConstraintViolation(String),
    NotFound(String),
    QueryExecution(String),
    ConnectionPool(String),
    UnexpectedError(String),
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseError::UniqueConstraintViolation(field) => {
                write!(f, "Duplicate entry: {}", field)
            }
            DatabaseError::NotFound(msg) => write!(f, "Not found: {}", msg),
            DatabaseError::QueryExecution(msg) => write!(f, "Query error: {}", msg),
            DatabaseError::ConnectionPool(msg) => write!(f, "Database connection error: {}", msg),
            DatabaseError::UnexpectedError(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl StdError for DatabaseError {}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                let field = match db.constraint() {
                    Some(c) if c.contains("email") => "email",
                    Some(c) if c.contains("token") => "token",
                    _ => "username",
                };
                DatabaseError::UniqueConstraintViolation(field.to_string())
            }
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::ConnectionPool(err.to_string())
            }
            sqlx::Error::Database(_) => DatabaseError::QueryExecution(err.to_string()),
            _ => DatabaseError::UnexpectedError(err.to_string()),
        }
    }
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    MissingRequired(String),
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingRequired(msg) => write!(f, "Missing required config: {}", msg),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config value: {}", msg),
        }
    }
}

impl StdError for ConfigError {}

/// Authentication failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Unknown principal or wrong secret. The two are never told apart.
    InvalidCredentials { remaining_attempts: Option<u32> },
    RateLimited { retry_after_seconds: i64 },
    TokenExpired,
    TokenInvalid,
    Unauthenticated,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::InvalidCredentials { .. } => write!(f, "Invalid credentials"),
            AuthError::RateLimited { retry_after_seconds } => {
                write!(f, "Too many failed attempts, retry in {}s", retry_after_seconds)
            }
            AuthError::TokenExpired => write!(f, "Token has expired"),
            AuthError::TokenInvalid => write!(f, "Invalid token"),
            AuthError::Unauthenticated => write!(f, "Not authenticated"),
        }
    }
}

impl StdError for AuthError {}

/// ============================================================================
/// 2. UNIFIED APPLICATION ERROR TYPE
/// ============================================================================

#[derive(Debug)]
pub enum AppError {
    Validation(ValidationError),
    Database(DatabaseError),
    Auth(AuthError),
    Config(ConfigError),
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(e) => write!(f, "{}", e),
            AppError::Database(e) => write!(f, "{}", e),
            AppError::Auth(e) => write!(f, "{}", e),
            AppError::Config(e) => write!(f, "{}", e),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StdError for AppError {}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err)
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        AppError::Database(err)
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.into())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("Blocking task failed: {}", err))
    }
}

// ============================================================================
// 3. HTTP RESPONSE MAPPING
// ============================================================================

/// Error body returned to clients
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Correlates the response with the server-side log line
    pub error_id: String,
    pub code: String,
    pub message: String,
    pub status: u16,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_errors: Option<BTreeMap<String, String>>,
}

impl ErrorResponse {
    pub fn new(error_id: String, message: String, code: String, status: u16) -> Self {
        Self {
            error_id,
            code,
            message,
            status,
            timestamp: chrono::Utc::now().to_rfc3339(),
            remaining_attempts: None,
            retry_after_seconds: None,
            field: None,
            field_errors: None,
        }
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Validation(e) => match e {
                ValidationError::DuplicateResource { .. } => {
                    (StatusCode::BAD_REQUEST, "DUPLICATE_RESOURCE", e.to_string())
                }
                _ => (StatusCode::BAD_REQUEST, "VALIDATION_FAILED", e.to_string()),
            },
            AppError::Database(e) => match e {
                DatabaseError::ConnectionPool(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Service temporarily unavailable".to_string(),
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An unexpected error occurred. Please try again later.".to_string(),
                ),
            },
            AppError::Auth(e) => match e {
                AuthError::InvalidCredentials { .. } => {
                    (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS", e.to_string())
                }
                AuthError::RateLimited { retry_after_seconds } => (
                    StatusCode::TOO_MANY_REQUESTS,
                    "RATE_LIMITED",
                    format!(
                        "Too many failed attempts. Try again in {} minutes.",
                        (retry_after_seconds + 59) / 60
                    ),
                ),
                AuthError::TokenExpired => {
                    (StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED", e.to_string())
                }
                AuthError::TokenInvalid => (
                    StatusCode::UNAUTHORIZED,
                    "TOKEN_INVALID",
                    "Invalid or expired token".to_string(),
                ),
                AuthError::Unauthenticated => {
                    (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", e.to_string())
                }
            },
            AppError::Config(_) | AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An unexpected error occurred. Please try again later.".to_string(),
            ),
        }
    }

    /// Build the structured body for this error
    pub fn to_error_response(&self, error_id: &str) -> ErrorResponse {
        let (status, code, message) = self.parts();
        let mut body = ErrorResponse::new(
            error_id.to_string(),
            message,
            code.to_string(),
            status.as_u16(),
        );

        match self {
            AppError::Auth(AuthError::InvalidCredentials { remaining_attempts }) => {
                body.remaining_attempts = *remaining_attempts;
            }
            AppError::Auth(AuthError::RateLimited { retry_after_seconds }) => {
                body.retry_after_seconds = Some(*retry_after_seconds);
            }
            AppError::Validation(ValidationError::DuplicateResource { field }) => {
                body.field = Some(field.clone());
            }
            AppError::Validation(ValidationError::FieldErrors(errors)) => {
                body.field_errors = Some(errors.clone());
            }
            _ => {}
        }

        body
    }

    fn log_error(&self, error_id: &str) {
        match self {
            AppError::Validation(e) => {
                tracing::debug!(error_id = error_id, error = %e, "Validation error");
            }
            AppError::Auth(e) => {
                tracing::debug!(error_id = error_id, error = %e, "Authentication error");
            }
            AppError::Database(e) => {
                tracing::error!(error_id = error_id, error = %e, "Database error");
            }
            AppError::Config(e) => {
                tracing::error!(error_id = error_id, error = %e, "Configuration error");
            }
            AppError::Internal(msg) => {
                tracing::error!(error_id = error_id, error = %msg, "Internal error");
            }
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let error_id = uuid::Uuid::new_v4().to_string();
        self.log_error(&error_id);

        let body = self.to_error_response(&error_id);
        let mut response = HttpResponse::build(self.status_code());
        if let Some(retry_after) = body.retry_after_seconds {
            response.insert_header((header::RETRY_AFTER, retry_after.to_string()));
        }
        response.json(body)
    }

    fn status_code(&self) -> StatusCode {
        self.parts().0
    }
}
