//! Account management.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::error::{ApiError, ResultExt};
use crate::auth::{self, Auth, AuthSettings, Passwords, RouteAccess};
use crate::authz::policy::{self, Target};
use crate::clock::Clock;
use crate::db::{
    Account, AccountQuery, AccountRole, AccountSummary, AccountUpdate, Database, NewAccount,
    generate_secret,
};
use crate::impl_has_auth_backend;
use crate::validation::Validator;

#[derive(Clone)]
pub struct AccountsState {
    pub db: Database,
    pub clock: Arc<dyn Clock>,
    pub settings: Arc<AuthSettings>,
    pub passwords: Arc<Passwords>,
}

impl_has_auth_backend!(AccountsState);

pub fn router(state: AccountsState) -> Router {
    let routes = Router::new()
        .route("/", get(list_accounts).post(create_account))
        .route(
            "/{id}",
            get(get_account).patch(update_account).delete(delete_account),
        )
        .route("/{id}/revoke", post(revoke_sessions))
        .with_state(state.clone());

    auth::with_session(routes, state, RouteAccess::Authenticated)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AccountView {
    id: String,
    email: String,
    name: String,
    role: AccountRole,
    organisation_id: Option<String>,
    last_login_at: Option<u64>,
}

impl From<Account> for AccountView {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            email: account.email,
            name: account.name,
            role: account.role,
            organisation_id: account.organisation_id,
            last_login_at: account.last_login_at,
        }
    }
}

/// Load an account for an authorization decision.
///
/// A missing account yields a target no organisation administrator can
/// match, so callers outside the global scope cannot probe for existence.
async fn load_target(state: &AccountsState, id: &str) -> Result<(Target, Option<Account>), ApiError> {
    let account = state
        .db
        .accounts()
        .get_by_id(id)
        .await
        .store_err("Failed to load account")?;
    let target = match &account {
        Some(account) => Target::from(account),
        None => Target::missing(id),
    };
    Ok((target, account))
}

fn validate_id(id: &str) -> Result<(), ApiError> {
    let mut v = Validator::new();
    v.uuid("id", id);
    v.finish().map_err(ApiError::from)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    organisation_id: Option<String>,
    role: Option<String>,
}

async fn list_accounts(
    State(state): State<AccountsState>,
    Auth(ctx): Auth,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<AccountSummary>>, ApiError> {
    let mut v = Validator::new();
    let role = params.role.as_deref().and_then(|r| v.role("role", r));
    v.finish()?;

    let mut query = AccountQuery {
        organisation_id: params.organisation_id,
        role,
    };
    policy::list_accounts(&ctx, &mut query)?;

    let accounts = state
        .db
        .accounts()
        .list(&query)
        .await
        .store_err("Failed to list accounts")?;
    Ok(Json(accounts))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateAccountRequest {
    email: Option<String>,
    name: Option<String>,
    password: Option<String>,
    role: Option<String>,
    organisation_id: Option<String>,
}

async fn create_account(
    State(state): State<AccountsState>,
    Auth(ctx): Auth,
    Json(payload): Json<CreateAccountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut v = Validator::new();
    let email = v.required("email", payload.email.as_deref());
    let name = v.required("name", payload.name.as_deref());
    let password = v.required_verbatim("password", payload.password.as_deref());
    let role = v
        .required("role", payload.role.as_deref())
        .and_then(|r| v.role("role", r));
    let organisation_id = payload
        .organisation_id
        .as_deref()
        .map(str::trim)
        .filter(|o| !o.is_empty());
    if let Some(email) = email {
        v.email("email", email);
    }
    if let Some(name) = name {
        v.name("name", name);
    }
    if let Some(password) = password {
        v.password("password", password);
    }
    if let Some(role) = role {
        v.check(
            role == AccountRole::SystemAdministrator || organisation_id.is_some(),
            "organisationId",
            "required",
        );
    }
    v.finish()?;
    let (Some(email), Some(name), Some(password), Some(role)) = (email, name, password, role)
    else {
        return Err(ApiError::Internal);
    };

    policy::create_account(&ctx, organisation_id, role)?;

    if let Some(organisation_id) = organisation_id {
        let exists = state
            .db
            .organisations()
            .get_by_id(organisation_id)
            .await
            .store_err("Failed to load organisation")?
            .is_some();
        if !exists {
            return Err(ApiError::not_found("Organisation not found"));
        }
    }

    let taken = state
        .db
        .accounts()
        .is_email_taken(email)
        .await
        .store_err("Failed to check email")?;
    if taken {
        return Err(ApiError::conflict("Email is already registered"));
    }

    let password_hash = state
        .passwords
        .hash_blocking(password)
        .await
        .store_err("Failed to hash password")?;

    let id = state
        .db
        .accounts()
        .create(&NewAccount {
            email,
            name,
            password_hash: &password_hash,
            role,
            organisation_id,
        })
        .await
        .store_err("Failed to create account")?;

    info!(
        account_id = %id,
        created_by = ctx.account_id().unwrap_or_default(),
        role = %role,
        "Account created"
    );

    let account = state
        .db
        .accounts()
        .get_by_id(&id)
        .await
        .store_err("Failed to load account")?
        .ok_or(ApiError::Internal)?;

    Ok((StatusCode::CREATED, Json(AccountView::from(account))))
}

async fn get_account(
    State(state): State<AccountsState>,
    Auth(ctx): Auth,
    Path(id): Path<String>,
) -> Result<Json<AccountView>, ApiError> {
    validate_id(&id)?;
    let (target, account) = load_target(&state, &id).await?;
    policy::view_account(&ctx, &target)?;
    let account = account.ok_or_else(|| ApiError::not_found("Account not found"))?;
    Ok(Json(AccountView::from(account)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateAccountRequest {
    name: Option<String>,
    role: Option<String>,
    password: Option<String>,
}

async fn update_account(
    State(state): State<AccountsState>,
    Auth(ctx): Auth,
    Path(id): Path<String>,
    Json(payload): Json<UpdateAccountRequest>,
) -> Result<Json<AccountView>, ApiError> {
    let mut v = Validator::new();
    v.uuid("id", &id);
    let name = payload.name.as_deref().map(str::trim);
    if let Some(name) = name {
        v.check(!name.is_empty(), "name", "required");
        v.name("name", name);
    }
    let role = payload.role.as_deref().and_then(|r| v.role("role", r));
    if let Some(password) = payload.password.as_deref() {
        v.password("password", password);
    }
    v.finish()?;

    let (target, account) = load_target(&state, &id).await?;
    policy::update_account(&ctx, &target, role)?;
    let account = account.ok_or_else(|| ApiError::not_found("Account not found"))?;

    if role.is_some_and(|r| r != AccountRole::SystemAdministrator)
        && account.organisation_id.is_none()
    {
        let mut v = Validator::new();
        v.check(false, "organisationId", "required");
        v.finish()?;
    }

    let mut update = AccountUpdate {
        name: name.map(str::to_string),
        role,
        ..Default::default()
    };
    if let Some(password) = payload.password.as_deref() {
        update.password_hash = Some(
            state
                .passwords
                .hash_blocking(password)
                .await
                .store_err("Failed to hash password")?,
        );
        // Outstanding sessions were granted by the old password.
        update.secret = Some(generate_secret());
    }

    state
        .db
        .accounts()
        .update(&account.id, &update)
        .await
        .store_err("Failed to update account")?;

    if update.secret.is_some() {
        info!(account_id = %account.id, "Password changed, sessions revoked");
    }

    let account = state
        .db
        .accounts()
        .get_by_id(&account.id)
        .await
        .store_err("Failed to load account")?
        .ok_or_else(|| ApiError::not_found("Account not found"))?;
    Ok(Json(AccountView::from(account)))
}

async fn delete_account(
    State(state): State<AccountsState>,
    Auth(ctx): Auth,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    validate_id(&id)?;
    let (target, account) = load_target(&state, &id).await?;
    policy::delete_account(&ctx, &target)?;
    if account.is_none() {
        return Err(ApiError::not_found("Account not found"));
    }

    state
        .db
        .accounts()
        .delete(&id)
        .await
        .store_err("Failed to delete account")?;

    info!(
        account_id = %id,
        deleted_by = ctx.account_id().unwrap_or_default(),
        "Account deleted"
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn revoke_sessions(
    State(state): State<AccountsState>,
    Auth(ctx): Auth,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    validate_id(&id)?;
    let (target, account) = load_target(&state, &id).await?;
    policy::revoke_account_sessions(&ctx, &target)?;
    if account.is_none() {
        return Err(ApiError::not_found("Account not found"));
    }

    state
        .db
        .accounts()
        .rotate_secret(&id)
        .await
        .store_err("Failed to rotate account secret")?;

    info!(
        account_id = %id,
        revoked_by = ctx.account_id().unwrap_or_default(),
        "Account sessions revoked"
    );
    Ok(StatusCode::NO_CONTENT)
}
