//! Authentication state traits, settings and macro.

use std::time::Duration;

use crate::clock::Clock;
use crate::db::Database;
use crate::token::{EXTENDED_SESSION_LIFETIME, SESSION_LIFETIME};

/// Default age after which a session token is silently replaced.
pub const REFRESH_THRESHOLD: Duration = Duration::from_secs(15 * 60);

/// Default minimum duration of a login request.
pub const LOGIN_FLOOR: Duration = Duration::from_millis(700);

/// Tunables of the session pipeline.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub session_lifetime: Duration,
    pub extended_session_lifetime: Duration,
    pub refresh_threshold: Duration,
    /// Minimum wall time of a login attempt; `None` disables the floor.
    pub login_floor: Option<Duration>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            session_lifetime: SESSION_LIFETIME,
            extended_session_lifetime: EXTENDED_SESSION_LIFETIME,
            refresh_threshold: REFRESH_THRESHOLD,
            login_floor: Some(LOGIN_FLOOR),
        }
    }
}

impl AuthSettings {
    /// Lifetime for a new session.
    pub fn lifetime_for(&self, extended: bool) -> Duration {
        if extended {
            self.extended_session_lifetime
        } else {
            self.session_lifetime
        }
    }
}

/// Trait for state types that provide what the session pipeline needs.
pub trait HasAuthBackend {
    fn db(&self) -> &Database;
    fn clock(&self) -> &dyn Clock;
    fn settings(&self) -> &AuthSettings;
}

/// Macro to implement `HasAuthBackend` for state structs with the standard fields.
///
/// The struct must have these fields:
/// - `db: Database`
/// - `clock: Arc<dyn Clock>`
/// - `settings: Arc<AuthSettings>`
#[macro_export]
macro_rules! impl_has_auth_backend {
    ($state_type:ty) => {
        impl $crate::auth::HasAuthBackend for $state_type {
            fn db(&self) -> &$crate::db::Database {
                &self.db
            }
            fn clock(&self) -> &dyn $crate::clock::Clock {
                self.clock.as_ref()
            }
            fn settings(&self) -> &$crate::auth::AuthSettings {
                &self.settings
            }
        }
    };
}
