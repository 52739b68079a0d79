//! Axum extractors for authentication.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{extract::FromRequestParts, http::request::Parts};

use super::context::AuthContext;
use super::cookie::is_secure_request;
use super::timing::cancellation_of;
use tokio_util::sync::CancellationToken;

/// The request's [`AuthContext`].
///
/// A route without the session middleware is a wiring bug, so a missing
/// context panics instead of being treated as anonymous.
pub struct Auth(pub Arc<AuthContext>);

impl<S> FromRequestParts<S> for Auth
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let context = parts
            .extensions
            .get::<Arc<AuthContext>>()
            .cloned()
            .expect("route is missing the auth context middleware");
        Ok(Auth(context))
    }
}

/// Facts about the transport a handler needs to set cookies and honour cancellation.
pub struct RequestMeta {
    pub secure: bool,
    pub cancel: CancellationToken,
}

impl<S> FromRequestParts<S> for RequestMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(RequestMeta {
            secure: is_secure_request(&parts.headers, &parts.uri),
            cancel: cancellation_of(&parts.extensions),
        })
    }
}
