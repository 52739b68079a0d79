//! Session authentication.
//!
//! Per-account signed session tokens carried in the `authToken` cookie or a
//! bearer header, double-submit CSRF tokens for cookie sessions, and silent
//! refresh of sessions older than the refresh threshold.
//!
//! Every route group gets the same stack, outermost first:
//! [`attach_auth_context`] → [`refresh_session`] → [`require_authentication`].

mod context;
mod cookie;
mod extractors;
mod gate;
mod middleware;
mod password;
mod refresh;
mod state;
mod timing;

use axum::{Router, middleware as axum_middleware};

pub use context::{AuthContext, AuthError, Session};
pub use cookie::{
    AUTH_COOKIE_NAME, clear_session_cookie, get_cookie, is_secure_request, session_cookie,
};
pub use extractors::{Auth, RequestMeta};
pub use gate::{RouteAccess, check_authentication, require_authentication};
pub use middleware::{
    AuthLayer, CSRF_HEADER, PresentedTokens, attach_auth_context, is_safe_method,
    resolve_auth_context,
};
pub use password::{PasswordError, Passwords};
pub use refresh::{
    REFRESH_AUTH_HEADER, REFRESH_CSRF_HEADER, RefreshError, refresh_session, refresh_tokens,
};
pub use state::{AuthSettings, HasAuthBackend, LOGIN_FLOOR, REFRESH_THRESHOLD};
pub use timing::{ConstantTimeWaiter, cancellation_of, track_cancellation, with_floor};

/// Wrap a router in the session middleware stack.
pub fn with_session<S>(router: Router, backend: S, access: RouteAccess) -> Router
where
    S: HasAuthBackend + Clone + Send + Sync + 'static,
{
    let layer = AuthLayer { backend, access };
    router
        .layer(axum_middleware::from_fn(require_authentication))
        .layer(axum_middleware::from_fn_with_state(
            layer.clone(),
            refresh_session::<S>,
        ))
        .layer(axum_middleware::from_fn_with_state(
            layer,
            attach_auth_context::<S>,
        ))
}
