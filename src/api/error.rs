//! Shared error handling for API endpoints.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::auth::AuthError;
use crate::authz::AuthorizationError;
use crate::validation::FieldError;

/// Extension trait for concise error mapping on Results.
pub trait ResultExt<T> {
    fn store_err(self, msg: &str) -> Result<T, ApiError>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn store_err(self, msg: &str) -> Result<T, ApiError> {
        self.map_err(|e| ApiError::internal(msg, e))
    }
}

/// API error type with automatic response conversion.
#[derive(Debug)]
pub enum ApiError {
    Authentication(AuthError),
    NotAuthorized(String),
    Validation(Vec<FieldError>),
    InvalidCredentials,
    NotFound(String),
    Conflict(String),
    TooManyRequests,
    Internal,
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(context: &str, e: impl std::fmt::Display) -> Self {
        error!("{}: {}", context, e);
        Self::Internal
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Authentication(e) => e.code(),
            ApiError::NotAuthorized(_) => "notAuthorized",
            ApiError::Validation(_) => "validationFailed",
            ApiError::InvalidCredentials => "invalidCredentials",
            ApiError::NotFound(_) => "notFound",
            ApiError::Conflict(_) => "conflict",
            ApiError::TooManyRequests => "tooManyRequests",
            ApiError::Internal => "internalError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Authentication(AuthError::LookupFailed) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotAuthorized(_) => StatusCode::FORBIDDEN,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self::Authentication(e)
    }
}

impl From<AuthorizationError> for ApiError {
    fn from(e: AuthorizationError) -> Self {
        Self::NotAuthorized(e.cause)
    }
}

impl From<Vec<FieldError>> for ApiError {
    fn from(errors: Vec<FieldError>) -> Self {
        Self::Validation(errors)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<Vec<FieldError>>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let (message, cause, fields) = match self {
            ApiError::Authentication(e) => (e.to_string(), None, None),
            ApiError::NotAuthorized(cause) => ("Not authorized".to_string(), Some(cause), None),
            ApiError::Validation(fields) => ("Validation failed".to_string(), None, Some(fields)),
            ApiError::InvalidCredentials => ("Invalid email or password".to_string(), None, None),
            ApiError::NotFound(msg) | ApiError::Conflict(msg) => (msg, None, None),
            ApiError::TooManyRequests => ("Too many requests".to_string(), None, None),
            ApiError::Internal => ("Internal error".to_string(), None, None),
        };
        (
            status,
            Json(ErrorResponse {
                error: ErrorBody {
                    code,
                    message,
                    cause,
                    fields,
                },
            }),
        )
            .into_response()
    }
}
