//! Session endpoints: login, logout, introspection and revocation.

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::error::{ApiError, ResultExt};
use crate::auth::{
    self, Auth, AuthSettings, Passwords, RequestMeta, RouteAccess, clear_session_cookie,
    session_cookie, with_floor,
};
use crate::clock::Clock;
use crate::db::{Account, AccountRole, Database, StoreError};
use crate::impl_has_auth_backend;
use crate::rate_limit::{LoginRateLimit, rate_limit_login};
use crate::token;
use crate::validation::Validator;

#[derive(Clone)]
pub struct SessionState {
    pub db: Database,
    pub clock: Arc<dyn Clock>,
    pub settings: Arc<AuthSettings>,
    pub passwords: Arc<Passwords>,
}

impl_has_auth_backend!(SessionState);

pub fn router(state: SessionState, rate_limit: LoginRateLimit) -> Router {
    let login_router = Router::new()
        .route("/", post(login))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(rate_limit, rate_limit_login));

    let public = Router::new()
        .route("/", get(session_info).delete(logout))
        .with_state(state.clone())
        .merge(login_router);

    let protected = Router::new()
        .route("/revoke", post(revoke_own_sessions))
        .with_state(state.clone());

    Router::new()
        .merge(auth::with_session(public, state.clone(), RouteAccess::Public))
        .merge(auth::with_session(
            protected,
            state,
            RouteAccess::Authenticated,
        ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest {
    email: Option<String>,
    password: Option<String>,
    #[serde(default)]
    keep_signed_in: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    auth_token: String,
    csrf_token: String,
    account_id: String,
    role: AccountRole,
    organisation_id: Option<String>,
    expires_at: u64,
}

async fn login(
    State(state): State<SessionState>,
    meta: RequestMeta,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let floor = state.settings.login_floor;
    with_floor(floor, &meta.cancel, login_inner(&state, &meta, payload)).await
}

async fn login_inner(
    state: &SessionState,
    meta: &RequestMeta,
    payload: LoginRequest,
) -> Result<Response, ApiError> {
    let mut v = Validator::new();
    let email = v.required("email", payload.email.as_deref());
    let password = v.required_verbatim("password", payload.password.as_deref());
    v.finish()?;
    let (Some(email), Some(password)) = (email, password) else {
        return Err(ApiError::InvalidCredentials);
    };

    let account = authenticate(state, email, password, &meta.cancel).await?;

    let extended = payload.keep_signed_in || account.role.is_non_interactive();
    let lifetime = state.settings.lifetime_for(extended);
    let now = state.clock.now();
    let tokens = token::issue_session_tokens(&account, now, lifetime)
        .store_err("Failed to issue session tokens")?;

    state
        .db
        .accounts()
        .set_last_login(&account.id, now)
        .await
        .store_err("Failed to record login")?;

    info!(account_id = %account.id, role = %account.role, extended, "Login succeeded");

    let cookie = session_cookie(&tokens.session.token, lifetime, meta.secure);
    let body = LoginResponse {
        auth_token: tokens.session.token,
        csrf_token: tokens.csrf.token,
        account_id: account.id,
        role: account.role,
        organisation_id: account.organisation_id,
        expires_at: tokens.session.expires_at,
    };
    Ok(([(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

/// Check credentials. Every failure looks the same to the client.
async fn authenticate(
    state: &SessionState,
    email: &str,
    password: &str,
    cancel: &CancellationToken,
) -> Result<Account, ApiError> {
    let store = state.db.accounts();
    let lookup = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ApiError::InvalidCredentials),
        result = store.get_by_email(email) => result,
    };

    let account = match lookup {
        Ok(Some(account)) => account,
        Ok(None) => {
            state.passwords.verify_dummy_blocking(password).await;
            info!(email = %email, "Login failed: unknown account");
            return Err(ApiError::InvalidCredentials);
        }
        Err(StoreError::UnknownRole { id, role }) => {
            state.passwords.verify_dummy_blocking(password).await;
            warn!(account_id = %id, role = %role, "Login failed: account has unknown role");
            return Err(ApiError::InvalidCredentials);
        }
        Err(e) => return Err(ApiError::internal("Failed to look up account", e)),
    };

    if !state
        .passwords
        .verify_blocking(&account.password_hash, password)
        .await
    {
        warn!(account_id = %account.id, "Login failed: wrong password");
        return Err(ApiError::InvalidCredentials);
    }

    Ok(account)
}

async fn logout(Auth(ctx): Auth, meta: RequestMeta) -> impl IntoResponse {
    if let Some(account_id) = ctx.account_id() {
        info!(account_id = %account_id, "Logout");
    }
    (
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, clear_session_cookie(meta.secure))],
    )
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionInfo {
    authenticated: bool,
    error: Option<&'static str>,
    account_id: Option<String>,
    organisation_id: Option<String>,
    role: Option<AccountRole>,
    issued_at: Option<u64>,
    expires_at: Option<u64>,
}

async fn session_info(Auth(ctx): Auth) -> Json<SessionInfo> {
    Json(SessionInfo {
        authenticated: ctx.is_authenticated(),
        error: ctx.error().map(|e| e.code()),
        account_id: ctx.account_id().map(str::to_string),
        organisation_id: ctx.organisation_id().map(str::to_string),
        role: ctx.role(),
        issued_at: ctx.issued_at(),
        expires_at: ctx.expiry(),
    })
}

/// Rotate the caller's secret, ending every session including this one.
async fn revoke_own_sessions(
    State(state): State<SessionState>,
    Auth(ctx): Auth,
    meta: RequestMeta,
) -> Result<impl IntoResponse, ApiError> {
    let account_id = ctx.account_id().ok_or(ApiError::Internal)?;

    let rotated = state
        .db
        .accounts()
        .rotate_secret(account_id)
        .await
        .store_err("Failed to rotate account secret")?;
    if !rotated {
        return Err(ApiError::not_found("Account not found"));
    }

    info!(account_id = %account_id, "All sessions revoked");
    Ok((
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, clear_session_cookie(meta.secure))],
    ))
}
