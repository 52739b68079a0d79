//! Authentication gate.

use std::sync::Arc;

use axum::{
    extract::Request,
    http::{HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::context::{AuthContext, AuthError};
use super::cookie::{clear_session_cookie, is_secure_request};
use crate::api::ApiError;

/// Access requirement of a group of routes, fixed when the routes are registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAccess {
    /// Handler only runs for authenticated requests.
    Authenticated,
    /// Handler runs regardless of authentication state (login, logout, introspection).
    Public,
}

impl RouteAccess {
    pub fn ignores_authentication_state(&self) -> bool {
        matches!(self, RouteAccess::Public)
    }
}

/// Decide whether a request (or a single operation) may proceed.
///
/// Order matters: a bypass wins over any failure, and a specific failure wins
/// over the generic "authentication required".
pub fn check_authentication(context: &AuthContext) -> Result<(), AuthError> {
    if context.is_authenticated() || context.ignore_authentication_state() {
        return Ok(());
    }
    Err(context.error().unwrap_or(AuthError::AuthenticationRequired))
}

/// Middleware rejecting requests the gate does not let through.
pub async fn require_authentication(request: Request, next: Next) -> Response {
    let context = request
        .extensions()
        .get::<Arc<AuthContext>>()
        .cloned()
        .expect("require_authentication must run after attach_auth_context");

    match check_authentication(&context) {
        Ok(()) => next.run(request).await,
        Err(error) => {
            let secure = is_secure_request(request.headers(), request.uri());
            let mut response = ApiError::Authentication(error).into_response();
            if error.invalidates_session() {
                if let Ok(value) = HeaderValue::from_str(&clear_session_cookie(secure)) {
                    response.headers_mut().append(header::SET_COOKIE, value);
                }
            }
            response
        }
    }
}
