//! Per-request authentication state.

use std::time::Duration;

use crate::db::AccountRole;

/// Why a request is not authenticated. Codes are stable and clients branch on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("authentication token is invalid")]
    TokenInvalid,
    #[error("authentication token has expired")]
    TokenExpired,
    #[error("authentication required")]
    AuthenticationRequired,
    #[error("CSRF token is missing")]
    CsrfTokenMissing,
    #[error("CSRF token is invalid")]
    CsrfTokenInvalid,
    /// The account could not be resolved because the store failed.
    #[error("account lookup failed")]
    LookupFailed,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::TokenInvalid => "authTokenInvalid",
            AuthError::TokenExpired => "authTokenExpired",
            AuthError::AuthenticationRequired => "authenticationRequired",
            AuthError::CsrfTokenMissing => "csrfTokenMissing",
            AuthError::CsrfTokenInvalid => "csrfTokenInvalid",
            AuthError::LookupFailed => "internalError",
        }
    }

    /// Whether the client's session token itself is unusable.
    pub fn invalidates_session(&self) -> bool {
        matches!(self, AuthError::TokenInvalid | AuthError::TokenExpired)
    }
}

/// Identity resolved from a verified session token.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub account_id: String,
    pub organisation_id: Option<String>,
    pub role: AccountRole,
    /// The account secret the token verified against.
    pub secret: Vec<u8>,
    pub issued_at: u64,
    pub expiry: u64,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("account_id", &self.account_id)
            .field("organisation_id", &self.organisation_id)
            .field("role", &self.role)
            .field("secret", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Authentication state of one request.
///
/// Built once by the auth context middleware and never modified afterwards.
/// A request is authenticated exactly when it carries a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    ignore_authentication_state: bool,
    skip_csrf_check: bool,
    error: Option<AuthError>,
    session: Option<Session>,
}

impl AuthContext {
    /// No session token was presented.
    pub fn anonymous(ignore_authentication_state: bool, skip_csrf_check: bool) -> Self {
        Self {
            ignore_authentication_state,
            skip_csrf_check,
            error: None,
            session: None,
        }
    }

    /// A session token was presented but authentication failed.
    pub fn failed(error: AuthError, ignore_authentication_state: bool, skip_csrf_check: bool) -> Self {
        Self {
            ignore_authentication_state,
            skip_csrf_check,
            error: Some(error),
            session: None,
        }
    }

    pub fn authenticated(
        session: Session,
        ignore_authentication_state: bool,
        skip_csrf_check: bool,
    ) -> Self {
        Self {
            ignore_authentication_state,
            skip_csrf_check,
            error: None,
            session: Some(session),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    pub fn ignore_authentication_state(&self) -> bool {
        self.ignore_authentication_state
    }

    pub fn skip_csrf_check(&self) -> bool {
        self.skip_csrf_check
    }

    pub fn error(&self) -> Option<AuthError> {
        self.error
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn account_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.account_id.as_str())
    }

    pub fn organisation_id(&self) -> Option<&str> {
        self.session
            .as_ref()
            .and_then(|s| s.organisation_id.as_deref())
    }

    pub fn role(&self) -> Option<AccountRole> {
        self.session.as_ref().map(|s| s.role)
    }

    pub fn secret(&self) -> Option<&[u8]> {
        self.session.as_ref().map(|s| s.secret.as_slice())
    }

    pub fn issued_at(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.issued_at)
    }

    pub fn expiry(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.expiry)
    }

    /// Lifetime the session token was issued with.
    pub fn session_lifetime(&self) -> Option<Duration> {
        self.session
            .as_ref()
            .map(|s| Duration::from_secs(s.expiry.saturating_sub(s.issued_at)))
    }

    /// True when the session token is older than `threshold` at `now`.
    pub fn needs_refresh(&self, now: u64, threshold: Duration) -> bool {
        match &self.session {
            Some(session) => now.saturating_sub(session.issued_at) > threshold.as_secs(),
            None => false,
        }
    }
}
