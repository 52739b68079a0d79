pub mod api;
pub mod auth;
pub mod authz;
pub mod cli;
pub mod clock;
pub mod db;
pub mod rate_limit;
pub mod token;
pub mod validation;

use auth::{AuthSettings, Passwords, track_cancellation};
use axum::{Router, middleware};
use clock::Clock;
use db::Database;
use rate_limit::LoginRateLimit;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use api::create_api_router;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// Time source for token issuance and verification
    pub clock: Arc<dyn Clock>,
    /// Session lifetimes, refresh threshold and login floor
    pub settings: AuthSettings,
    /// Password hasher shared by login and account management
    pub passwords: Arc<Passwords>,
    /// Login attempts allowed per client IP per minute
    pub login_attempts_per_minute: u32,
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    let api_router = create_api_router(
        config.db.clone(),
        config.clock.clone(),
        Arc::new(config.settings.clone()),
        config.passwords.clone(),
        LoginRateLimit::per_minute(config.login_attempts_per_minute),
    );

    Router::new()
        .nest("/api", api_router)
        .layer(middleware::from_fn(track_cancellation))
}

/// Run the server on the given listener. This function blocks until the server exits.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), std::io::Error> {
    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = run_server(config, listener).await {
            tracing::error!(error = %e, "Server exited with error");
        }
    });

    Ok((handle, local_addr))
}
