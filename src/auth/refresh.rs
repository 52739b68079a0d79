//! Silent session refresh.
//!
//! Once a session token is older than the refresh threshold, the response
//! carries a replacement session token and CSRF token. The current request is
//! never affected: refresh runs after the handler and any failure is only logged.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderValue, header},
    middleware::Next,
    response::Response,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::context::AuthContext;
use super::cookie::{is_secure_request, session_cookie, sets_session_cookie};
use super::middleware::AuthLayer;
use super::state::HasAuthBackend;
use super::timing::cancellation_of;
use crate::db::StoreError;
use crate::token::{self, SessionTokens, TokenError};

/// Response header carrying a refreshed session token.
pub const REFRESH_AUTH_HEADER: &str = "x-refresh-auth-token";

/// Response header carrying a refreshed CSRF token.
pub const REFRESH_CSRF_HEADER: &str = "x-refresh-csrf-token";

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("account lookup failed: {0}")]
    Store(#[from] StoreError),
    #[error("account no longer exists")]
    AccountGone,
    #[error("request cancelled")]
    Cancelled,
    #[error("failed to issue tokens: {0}")]
    Token(#[from] TokenError),
}

/// Mint replacement tokens for an authenticated context.
///
/// The account is loaded again so the new tokens are signed with its current
/// secret. If that secret no longer matches the one the request was verified
/// with, the session was revoked in the meantime and nothing is issued.
pub async fn refresh_tokens<S: HasAuthBackend>(
    backend: &S,
    context: &AuthContext,
    now: u64,
    cancel: &CancellationToken,
) -> Result<Option<SessionTokens>, RefreshError> {
    let (Some(account_id), Some(cached_secret), Some(lifetime)) = (
        context.account_id(),
        context.secret(),
        context.session_lifetime(),
    ) else {
        return Ok(None);
    };

    let store = backend.db().accounts();
    let account = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(RefreshError::Cancelled),
        result = store.get_by_id(account_id) => result?,
    };
    let account = account.ok_or(RefreshError::AccountGone)?;

    if account.secret != cached_secret {
        info!(account_id = %account.id, "Secret rotated during request, not refreshing session");
        return Ok(None);
    }

    let tokens = token::issue_session_tokens(&account, now, lifetime)?;
    debug!(account_id = %account.id, issued_at = now, "Session refreshed");
    Ok(Some(tokens))
}

fn attach_tokens(response: &mut Response, tokens: &SessionTokens, secure: bool) {
    let headers = response.headers_mut();
    let values = [
        (REFRESH_AUTH_HEADER, tokens.session.token.clone()),
        (REFRESH_CSRF_HEADER, tokens.csrf.token.clone()),
    ];
    for (name, value) in values {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
    let cookie = session_cookie(&tokens.session.token, tokens.lifetime, secure);
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        headers.append(header::SET_COOKIE, value);
    }
}

/// Middleware emitting refreshed tokens on responses to stale sessions.
pub async fn refresh_session<S>(
    State(layer): State<AuthLayer<S>>,
    request: Request,
    next: Next,
) -> Response
where
    S: HasAuthBackend + Clone + Send + Sync + 'static,
{
    let context = request
        .extensions()
        .get::<Arc<AuthContext>>()
        .cloned()
        .expect("refresh_session must run after attach_auth_context");
    let cancel = cancellation_of(request.extensions());
    let secure = is_secure_request(request.headers(), request.uri());

    let mut response = next.run(request).await;

    let now = layer.backend.clock().now();
    if !context.needs_refresh(now, layer.backend.settings().refresh_threshold) {
        return response;
    }
    // Login and logout set the cookie themselves.
    if sets_session_cookie(response.headers()) {
        return response;
    }

    match refresh_tokens(&layer.backend, &context, now, &cancel).await {
        Ok(Some(tokens)) => attach_tokens(&mut response, &tokens, secure),
        Ok(None) => {}
        Err(e) => warn!(
            account_id = context.account_id().unwrap_or_default(),
            error = %e,
            "Session refresh failed"
        ),
    }

    response
}
