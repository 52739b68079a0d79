mod accounts;
mod error;
mod organisations;
mod session;

use axum::Router;
use std::sync::Arc;

use crate::auth::{AuthSettings, Passwords};
use crate::clock::Clock;
use crate::db::Database;
use crate::rate_limit::LoginRateLimit;

pub use accounts::AccountsState;
pub use error::{ApiError, ResultExt};
pub use organisations::OrganisationsState;
pub use session::SessionState;

/// Create the API router.
pub fn create_api_router(
    db: Database,
    clock: Arc<dyn Clock>,
    settings: Arc<AuthSettings>,
    passwords: Arc<Passwords>,
    rate_limit: LoginRateLimit,
) -> Router {
    let session_state = SessionState {
        db: db.clone(),
        clock: clock.clone(),
        settings: settings.clone(),
        passwords: passwords.clone(),
    };

    let accounts_state = AccountsState {
        db: db.clone(),
        clock: clock.clone(),
        settings: settings.clone(),
        passwords,
    };

    let organisations_state = OrganisationsState {
        db,
        clock,
        settings,
    };

    Router::new()
        .nest("/session", session::router(session_state, rate_limit))
        .nest("/accounts", accounts::router(accounts_state))
        .nest(
            "/organisations",
            organisations::router(organisations_state),
        )
}
