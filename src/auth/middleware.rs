//! Builds the [`AuthContext`] for every request.
//!
//! 1. No session token: anonymous.
//! 2. Token present: read its subject, load that account, verify the token
//!    against the account's current secret. Failures keep their specific error.
//! 3. Unsafe methods arriving with the cookie must also carry a valid
//!    `X-CSRF-Token` signed by the same secret.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method, header},
    middleware::Next,
    response::Response,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::context::{AuthContext, AuthError, Session};
use super::cookie::{AUTH_COOKIE_NAME, get_cookie};
use super::gate::RouteAccess;
use super::state::HasAuthBackend;
use super::timing::cancellation_of;
use crate::db::{Account, Database, StoreError};
use crate::token::{self, TokenError};

/// Request header carrying the CSRF token.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// State for the session middleware stack of one group of routes.
#[derive(Clone)]
pub struct AuthLayer<S> {
    pub backend: S,
    pub access: RouteAccess,
}

/// Tokens presented by a request.
#[derive(Debug, Clone, Copy, Default)]
pub struct PresentedTokens<'a> {
    pub session_token: Option<&'a str>,
    /// Session token came from the `Authorization` header, not the cookie.
    pub via_bearer: bool,
    pub csrf_token: Option<&'a str>,
    pub safe_method: bool,
}

impl<'a> PresentedTokens<'a> {
    /// Bearer header wins over the cookie when both are present.
    pub fn from_request(method: &Method, headers: &'a HeaderMap) -> Self {
        let bearer = bearer_token(headers);
        let session_token = bearer.or_else(|| get_cookie(headers, AUTH_COOKIE_NAME));
        Self {
            session_token: session_token.filter(|t| !t.is_empty()),
            via_bearer: bearer.is_some(),
            csrf_token: headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok()),
            safe_method: is_safe_method(method),
        }
    }
}

/// GET, HEAD and OPTIONS do not change state and skip the CSRF check.
pub fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

enum LookupError {
    Store(StoreError),
    Cancelled,
}

async fn find_account(
    db: &Database,
    id: &str,
    cancel: &CancellationToken,
) -> Result<Option<Account>, LookupError> {
    let store = db.accounts();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LookupError::Cancelled),
        result = store.get_by_id(id) => result.map_err(LookupError::Store),
    }
}

/// Resolve the authentication state for a set of presented tokens.
pub async fn resolve_auth_context<S: HasAuthBackend>(
    backend: &S,
    tokens: PresentedTokens<'_>,
    access: RouteAccess,
    cancel: &CancellationToken,
) -> AuthContext {
    let ignore = access.ignores_authentication_state();
    let skip_csrf = tokens.safe_method || tokens.via_bearer;

    let Some(raw) = tokens.session_token else {
        return AuthContext::anonymous(ignore, skip_csrf);
    };
    let failed = |error| AuthContext::failed(error, ignore, skip_csrf);

    let subject = match token::parse_unverified(raw) {
        Ok(subject) => subject,
        Err(_) => {
            debug!("Malformed session token");
            return failed(AuthError::TokenInvalid);
        }
    };

    let account = match find_account(backend.db(), &subject.account_id, cancel).await {
        Ok(Some(account)) => account,
        Ok(None) => {
            debug!(account_id = %subject.account_id, "Session token for unknown account");
            return failed(AuthError::TokenInvalid);
        }
        Err(LookupError::Store(StoreError::UnknownRole { id, role })) => {
            warn!(account_id = %id, role = %role, "Account has unknown role, rejecting session");
            return failed(AuthError::TokenInvalid);
        }
        Err(LookupError::Store(e)) => {
            error!(error = %e, "Failed to load account for session");
            return failed(AuthError::LookupFailed);
        }
        Err(LookupError::Cancelled) => {
            debug!("Request cancelled during account lookup");
            return failed(AuthError::LookupFailed);
        }
    };

    let now = backend.clock().now();
    let claims = match token::verify_session_token(raw, &account.secret, now) {
        Ok(claims) => claims,
        Err(TokenError::Expired) => return failed(AuthError::TokenExpired),
        Err(_) => {
            debug!(account_id = %account.id, "Session token failed verification");
            return failed(AuthError::TokenInvalid);
        }
    };

    if !skip_csrf {
        let csrf = tokens.csrf_token.unwrap_or("");
        match token::verify_csrf_token(csrf, &account.secret, now) {
            Ok(_) => {}
            Err(TokenError::Missing) => return failed(AuthError::CsrfTokenMissing),
            Err(_) => {
                warn!(account_id = %account.id, "CSRF token rejected");
                return failed(AuthError::CsrfTokenInvalid);
            }
        }
    }

    AuthContext::authenticated(
        Session {
            account_id: account.id,
            organisation_id: account.organisation_id,
            role: account.role,
            secret: account.secret,
            issued_at: claims.iat,
            expiry: claims.exp,
        },
        ignore,
        skip_csrf,
    )
}

/// Middleware attaching an `Arc<AuthContext>` to the request.
pub async fn attach_auth_context<S>(
    State(layer): State<AuthLayer<S>>,
    mut request: Request,
    next: Next,
) -> Response
where
    S: HasAuthBackend + Clone + Send + Sync + 'static,
{
    let cancel = cancellation_of(request.extensions());
    let tokens = PresentedTokens::from_request(request.method(), request.headers());
    let context = resolve_auth_context(&layer.backend, tokens, layer.access, &cancel).await;

    request.extensions_mut().insert(Arc::new(context));
    next.run(request).await
}
