// src/core/errors.rs

//! Defines the primary error type for the entire application.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error enum, representing all request-terminating failures within
/// the server. Element-level ingest failures are not represented here; they
/// are recorded to the processing-failure ledger instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignalsdError {
    #[error("{0}")]
    MalformedBody(String),

    #[error("{0}")]
    Authentication(String),

    #[error("access token has expired")]
    AccessTokenExpired,

    #[error("refresh token has expired")]
    RefreshTokenExpired,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    ResourceInUse(String),

    #[error("{0}")]
    ResourceExpired(String),

    #[error("correlation target not found: {0}")]
    InvalidCorrelationId(String),

    #[error("password must be at least {0} characters")]
    PasswordTooShort(usize),

    #[error("request body exceeds the size limit for this endpoint")]
    RequestTooLarge,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("database error: {0}")]
    Database(String),

    #[error("internal server error: {0}")]
    Internal(String),

    #[error("not implemented")]
    NotImplemented,
}

/// Stable machine-readable error codes carried on every error payload.
/// Clients are expected to branch on these, never on the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    MalformedBody,
    AuthenticationError,
    AccessTokenExpired,
    RefreshTokenExpired,
    Forbidden,
    ResourceNotFound,
    ResourceAlreadyExists,
    ResourceInUse,
    ResourceExpired,
    InvalidCorrelationId,
    PasswordTooShort,
    RequestTooLarge,
    RateLimited,
    DatabaseError,
    InternalError,
    NotImplemented,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MalformedBody => "malformed_body",
            ErrorCode::AuthenticationError => "authentication_error",
            ErrorCode::AccessTokenExpired => "access_token_expired",
            ErrorCode::RefreshTokenExpired => "refresh_token_expired",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::ResourceNotFound => "resource_not_found",
            ErrorCode::ResourceAlreadyExists => "resource_already_exists",
            ErrorCode::ResourceInUse => "resource_in_use",
            ErrorCode::ResourceExpired => "resource_expired",
            ErrorCode::InvalidCorrelationId => "invalid_correlation_id",
            ErrorCode::PasswordTooShort => "password_too_short",
            ErrorCode::RequestTooLarge => "request_too_large",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::DatabaseError => "database_error",
            ErrorCode::InternalError => "internal_error",
            ErrorCode::NotImplemented => "not_implemented",
        }
    }
}

/// The single wire shape for every request-level error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error_code: ErrorCode,
    pub error_message: String,
}

impl SignalsdError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            SignalsdError::MalformedBody(_) => ErrorCode::MalformedBody,
            SignalsdError::Authentication(_) => ErrorCode::AuthenticationError,
            SignalsdError::AccessTokenExpired => ErrorCode::AccessTokenExpired,
            SignalsdError::RefreshTokenExpired => ErrorCode::RefreshTokenExpired,
            SignalsdError::Forbidden(_) => ErrorCode::Forbidden,
            SignalsdError::NotFound(_) => ErrorCode::ResourceNotFound,
            SignalsdError::AlreadyExists(_) => ErrorCode::ResourceAlreadyExists,
            SignalsdError::ResourceInUse(_) => ErrorCode::ResourceInUse,
            SignalsdError::ResourceExpired(_) => ErrorCode::ResourceExpired,
            SignalsdError::InvalidCorrelationId(_) => ErrorCode::InvalidCorrelationId,
            SignalsdError::PasswordTooShort(_) => ErrorCode::PasswordTooShort,
            SignalsdError::RequestTooLarge => ErrorCode::RequestTooLarge,
            SignalsdError::RateLimited => ErrorCode::RateLimited,
            SignalsdError::Database(_) => ErrorCode::DatabaseError,
            SignalsdError::Internal(_) => ErrorCode::InternalError,
            SignalsdError::NotImplemented => ErrorCode::NotImplemented,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            SignalsdError::MalformedBody(_) | SignalsdError::PasswordTooShort(_) => {
                StatusCode::BAD_REQUEST
            }
            SignalsdError::Authentication(_)
            | SignalsdError::AccessTokenExpired
            | SignalsdError::RefreshTokenExpired => StatusCode::UNAUTHORIZED,
            SignalsdError::Forbidden(_) => StatusCode::FORBIDDEN,
            SignalsdError::NotFound(_) => StatusCode::NOT_FOUND,
            SignalsdError::AlreadyExists(_) | SignalsdError::ResourceInUse(_) => {
                StatusCode::CONFLICT
            }
            SignalsdError::ResourceExpired(_) => StatusCode::GONE,
            SignalsdError::InvalidCorrelationId(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SignalsdError::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            SignalsdError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            SignalsdError::Database(_) | SignalsdError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            SignalsdError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        }
    }
}

impl IntoResponse for SignalsdError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error_code: self.error_code(),
            error_message: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

// --- From trait implementations for easy error conversion ---

impl From<sqlx::Error> for SignalsdError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => SignalsdError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                SignalsdError::AlreadyExists(db.message().to_string())
            }
            _ => SignalsdError::Database(e.to_string()),
        }
    }
}

impl From<reqwest::Error> for SignalsdError {
    fn from(e: reqwest::Error) -> Self {
        SignalsdError::Internal(format!("http client error: {e}"))
    }
}

impl From<serde_json::Error> for SignalsdError {
    fn from(e: serde_json::Error) -> Self {
        SignalsdError::MalformedBody(e.to_string())
    }
}

impl From<uuid::Error> for SignalsdError {
    fn from(e: uuid::Error) -> Self {
        SignalsdError::MalformedBody(format!("invalid identifier: {e}"))
    }
}

impl From<argon2::password_hash::Error> for SignalsdError {
    fn from(e: argon2::password_hash::Error) -> Self {
        SignalsdError::Internal(format!("password hashing error: {e}"))
    }
}

impl From<jsonwebtoken::errors::Error> for SignalsdError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match e.kind() {
            ErrorKind::ExpiredSignature => SignalsdError::AccessTokenExpired,
            _ => SignalsdError::Authentication(format!("invalid token: {e}")),
        }
    }
}
