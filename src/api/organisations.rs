//! Organisation management.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use super::error::{ApiError, ResultExt};
use crate::auth::{self, Auth, AuthSettings, RouteAccess};
use crate::authz::policy;
use crate::clock::Clock;
use crate::db::{Database, Organisation, OrganisationQuery};
use crate::impl_has_auth_backend;
use crate::validation::Validator;

#[derive(Clone)]
pub struct OrganisationsState {
    pub db: Database,
    pub clock: Arc<dyn Clock>,
    pub settings: Arc<AuthSettings>,
}

impl_has_auth_backend!(OrganisationsState);

pub fn router(state: OrganisationsState) -> Router {
    let routes = Router::new()
        .route("/", get(list_organisations).post(create_organisation))
        .route(
            "/{id}",
            get(get_organisation)
                .patch(update_organisation)
                .delete(delete_organisation),
        )
        .with_state(state.clone());

    auth::with_session(routes, state, RouteAccess::Authenticated)
}

#[derive(Deserialize)]
struct OrganisationRequest {
    name: Option<String>,
}

fn validate_name(name: Option<&str>) -> Result<&str, ApiError> {
    let mut v = Validator::new();
    let name = v.required("name", name);
    if let Some(name) = name {
        v.name("name", name);
    }
    v.finish()?;
    name.ok_or(ApiError::Internal)
}

fn validate_id(id: &str) -> Result<(), ApiError> {
    let mut v = Validator::new();
    v.uuid("id", id);
    v.finish().map_err(ApiError::from)
}

async fn list_organisations(
    State(state): State<OrganisationsState>,
    Auth(ctx): Auth,
) -> Result<Json<Vec<Organisation>>, ApiError> {
    let mut query = OrganisationQuery::default();
    policy::list_organisations(&ctx, &mut query)?;

    let organisations = state
        .db
        .organisations()
        .list(&query)
        .await
        .store_err("Failed to list organisations")?;
    Ok(Json(organisations))
}

async fn create_organisation(
    State(state): State<OrganisationsState>,
    Auth(ctx): Auth,
    Json(payload): Json<OrganisationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = validate_name(payload.name.as_deref())?;
    policy::create_organisation(&ctx)?;

    let taken = state
        .db
        .organisations()
        .is_name_taken(name)
        .await
        .store_err("Failed to check organisation name")?;
    if taken {
        return Err(ApiError::conflict("Organisation name is already taken"));
    }

    let id = state
        .db
        .organisations()
        .create(name)
        .await
        .store_err("Failed to create organisation")?;
    info!(organisation_id = %id, name = %name, "Organisation created");

    let organisation = state
        .db
        .organisations()
        .get_by_id(&id)
        .await
        .store_err("Failed to load organisation")?
        .ok_or(ApiError::Internal)?;
    Ok((StatusCode::CREATED, Json(organisation)))
}

async fn get_organisation(
    State(state): State<OrganisationsState>,
    Auth(ctx): Auth,
    Path(id): Path<String>,
) -> Result<Json<Organisation>, ApiError> {
    validate_id(&id)?;
    policy::view_organisation(&ctx, &id)?;

    let organisation = state
        .db
        .organisations()
        .get_by_id(&id)
        .await
        .store_err("Failed to load organisation")?
        .ok_or_else(|| ApiError::not_found("Organisation not found"))?;
    Ok(Json(organisation))
}

async fn update_organisation(
    State(state): State<OrganisationsState>,
    Auth(ctx): Auth,
    Path(id): Path<String>,
    Json(payload): Json<OrganisationRequest>,
) -> Result<Json<Organisation>, ApiError> {
    validate_id(&id)?;
    let name = validate_name(payload.name.as_deref())?;
    policy::update_organisation(&ctx, &id)?;

    let current = state
        .db
        .organisations()
        .get_by_id(&id)
        .await
        .store_err("Failed to load organisation")?
        .ok_or_else(|| ApiError::not_found("Organisation not found"))?;

    if !current.name.eq_ignore_ascii_case(name) {
        let taken = state
            .db
            .organisations()
            .is_name_taken(name)
            .await
            .store_err("Failed to check organisation name")?;
        if taken {
            return Err(ApiError::conflict("Organisation name is already taken"));
        }
    }

    state
        .db
        .organisations()
        .rename(&id, name)
        .await
        .store_err("Failed to rename organisation")?;

    Ok(Json(Organisation {
        name: name.to_string(),
        ..current
    }))
}

async fn delete_organisation(
    State(state): State<OrganisationsState>,
    Auth(ctx): Auth,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    validate_id(&id)?;
    policy::delete_organisation(&ctx)?;

    let deleted = state
        .db
        .organisations()
        .delete(&id)
        .await
        .store_err("Failed to delete organisation")?;
    if !deleted {
        return Err(ApiError::not_found("Organisation not found"));
    }

    info!(
        organisation_id = %id,
        deleted_by = ctx.account_id().unwrap_or_default(),
        "Organisation deleted"
    );
    Ok(StatusCode::NO_CONTENT)
}
