use std::net::SocketAddr;
use std::sync::Arc;

use backoffice::auth::Passwords;
use backoffice::cli::{
    Args, build_config, handle_create_admin, init_logging, load_admin_password, open_database,
};
use backoffice::create_app;
use clap::Parser;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let passwords = match Passwords::new() {
        Ok(passwords) => Arc::new(passwords),
        Err(e) => {
            error!(error = %e, "Failed to initialise password hashing");
            std::process::exit(1);
        }
    };

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    if let Some(email) = args.create_admin.as_deref() {
        let Some(password) = load_admin_password() else {
            std::process::exit(1);
        };
        if let Err(e) = handle_create_admin(&db, &passwords, email, &password).await {
            error!(error = %e, "Failed to create admin account");
            std::process::exit(1);
        }
    }

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    let config = build_config(&args, db, passwords);
    let app = create_app(&config);

    match listener.local_addr() {
        Ok(local_addr) => info!(address = %local_addr, "Listening"),
        Err(e) => error!(error = %e, "Failed to read local address"),
    }

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, make_service).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
