//! CLI argument parsing, validation, and startup helpers.

use crate::ServerConfig;
use crate::auth::{AuthSettings, Passwords};
use crate::clock::SystemClock;
use crate::db::{AccountRole, Database, NewAccount};
use crate::rate_limit::DEFAULT_LOGIN_ATTEMPTS_PER_MINUTE;
use crate::validation::Validator;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Environment variable holding the password for `--create-admin`.
pub const ADMIN_PASSWORD_ENV: &str = "BACKOFFICE_ADMIN_PASSWORD";

const MAX_SESSION_HOURS: u64 = 366 * 24;
const MAX_EXTENDED_SESSION_DAYS: u64 = 100 * 366;
const MAX_REFRESH_MINUTES: u64 = 24 * 60;
const MAX_LOGIN_FLOOR_MS: u64 = 60_000;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "backoffice",
    about = "Multi-tenant back office with per-account session tokens"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "BACKOFFICE_PORT", default_value = "7291")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, env = "BACKOFFICE_DATABASE", default_value = "backoffice.db")]
    pub database: String,

    /// Lifetime of a regular session, in hours (at most one year)
    #[arg(long, env = "BACKOFFICE_SESSION_HOURS", default_value = "6", value_parser = clap::value_parser!(u64).range(1..=MAX_SESSION_HOURS))]
    pub session_hours: u64,

    /// Lifetime of an extended ("keep me signed in" or device) session, in days
    #[arg(long, env = "BACKOFFICE_EXTENDED_SESSION_DAYS", default_value = "10000", value_parser = clap::value_parser!(u64).range(1..=MAX_EXTENDED_SESSION_DAYS))]
    pub extended_session_days: u64,

    /// Age after which a session token is silently replaced, in minutes
    #[arg(long, env = "BACKOFFICE_REFRESH_MINUTES", default_value = "15", value_parser = clap::value_parser!(u64).range(0..=MAX_REFRESH_MINUTES))]
    pub refresh_minutes: u64,

    /// Minimum duration of a login request in milliseconds, 0 disables
    #[arg(long, env = "BACKOFFICE_LOGIN_FLOOR_MS", default_value = "700", value_parser = clap::value_parser!(u64).range(0..=MAX_LOGIN_FLOOR_MS))]
    pub login_floor_ms: u64,

    /// Login attempts allowed per client IP per minute
    #[arg(long, env = "BACKOFFICE_LOGIN_RATE", default_value_t = DEFAULT_LOGIN_ATTEMPTS_PER_MINUTE)]
    pub login_attempts_per_minute: u32,

    /// Create a system administrator with this email on startup.
    /// The password is read from BACKOFFICE_ADMIN_PASSWORD
    #[arg(long, value_name = "EMAIL")]
    pub create_admin: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

impl Args {
    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            session_lifetime: Duration::from_secs(self.session_hours * 60 * 60),
            extended_session_lifetime: Duration::from_secs(
                self.extended_session_days * 24 * 60 * 60,
            ),
            refresh_threshold: Duration::from_secs(self.refresh_minutes * 60),
            login_floor: (self.login_floor_ms > 0)
                .then(|| Duration::from_millis(self.login_floor_ms)),
        }
    }
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Read the bootstrap admin password from the environment.
/// Returns None and logs an error if it is missing.
pub fn load_admin_password() -> Option<String> {
    match std::env::var(ADMIN_PASSWORD_ENV) {
        Ok(password) => {
            // Clear the environment variable to prevent leaking
            // SAFETY: We're single-threaded at this point during startup,
            // and no other code is reading this environment variable.
            unsafe { std::env::remove_var(ADMIN_PASSWORD_ENV) };
            Some(password)
        }
        Err(_) => {
            error!("--create-admin requires the {} environment variable", ADMIN_PASSWORD_ENV);
            None
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("invalid admin account: {0}")]
    Invalid(String),
    #[error("failed to hash password: {0}")]
    Password(#[from] crate::auth::PasswordError),
    #[error("database error: {0}")]
    Store(#[from] crate::db::StoreError),
}

/// Handle the --create-admin flag. Existing accounts are left untouched.
/// Returns the account ID when a new administrator was created.
pub async fn handle_create_admin(
    db: &Database,
    passwords: &Passwords,
    email: &str,
    password: &str,
) -> Result<Option<String>, BootstrapError> {
    let email = email.trim();
    let mut v = Validator::new();
    v.email("email", email).password("password", password);
    if let Err(fields) = v.finish() {
        let summary = fields
            .iter()
            .map(|f| format!("{} {}", f.field, f.code))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(BootstrapError::Invalid(summary));
    }

    if db.accounts().is_email_taken(email).await? {
        info!(email = %email, "Admin account already exists");
        return Ok(None);
    }

    let name = email.split('@').next().unwrap_or(email);
    let password_hash = passwords.hash(password)?;
    let id = db
        .accounts()
        .create(&NewAccount {
            email,
            name,
            password_hash: &password_hash,
            role: AccountRole::SystemAdministrator,
            organisation_id: None,
        })
        .await?;

    info!(account_id = %id, email = %email, "System administrator created");
    Ok(Some(id))
}

/// Build ServerConfig from validated arguments.
pub fn build_config(args: &Args, db: Database, passwords: Arc<Passwords>) -> ServerConfig {
    ServerConfig {
        db,
        clock: Arc::new(SystemClock),
        settings: args.auth_settings(),
        passwords,
        login_attempts_per_minute: args.login_attempts_per_minute,
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_session_constants() {
        let args = Args::parse_from(["backoffice"]);
        let settings = args.auth_settings();
        let defaults = AuthSettings::default();
        assert_eq!(settings.session_lifetime, defaults.session_lifetime);
        assert_eq!(
            settings.extended_session_lifetime,
            defaults.extended_session_lifetime
        );
        assert_eq!(settings.refresh_threshold, defaults.refresh_threshold);
        assert_eq!(settings.login_floor, defaults.login_floor);
    }

    #[test]
    fn test_out_of_range_lifetimes_are_rejected() {
        for args in [
            ["backoffice", "--session-hours", "18446744073709551615"],
            ["backoffice", "--session-hours", "0"],
            ["backoffice", "--extended-session-days", "500000000000000"],
            ["backoffice", "--refresh-minutes", "1000000000000"],
            ["backoffice", "--login-floor-ms", "3600000"],
        ] {
            assert!(Args::try_parse_from(args).is_err(), "{args:?} was accepted");
        }
    }

    #[test]
    fn test_longest_accepted_lifetimes_fit_a_token() {
        let args = Args::parse_from([
            "backoffice",
            "--session-hours",
            "8784",
            "--extended-session-days",
            "36600",
        ]);
        let settings = args.auth_settings();
        assert_eq!(settings.session_lifetime, Duration::from_secs(8784 * 60 * 60));
        assert_eq!(
            settings.extended_session_lifetime,
            Duration::from_secs(36600 * 24 * 60 * 60)
        );
    }

    #[test]
    fn test_zero_floor_disables_it() {
        let args = Args::parse_from(["backoffice", "--login-floor-ms", "0"]);
        assert_eq!(args.auth_settings().login_floor, None);
    }

    #[tokio::test]
    async fn test_create_admin_is_idempotent() {
        let db = Database::open(":memory:").await.unwrap();
        let passwords = Passwords::insecure_fast().unwrap();

        let first = handle_create_admin(&db, &passwords, "root@example.com", "correct horse")
            .await
            .unwrap();
        assert!(first.is_some());

        let second = handle_create_admin(&db, &passwords, "ROOT@example.com", "correct horse")
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(db.accounts().count_system_administrators().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_create_admin_rejects_weak_password() {
        let db = Database::open(":memory:").await.unwrap();
        let passwords = Passwords::insecure_fast().unwrap();
        let result = handle_create_admin(&db, &passwords, "root@example.com", "short").await;
        assert!(matches!(result, Err(BootstrapError::Invalid(_))));
    }
}
