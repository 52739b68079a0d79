#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, Response, StatusCode, header},
};
use backoffice::{
    ServerConfig,
    auth::{AuthSettings, Passwords},
    clock::ManualClock,
    create_app,
    db::{AccountRole, Database, NewAccount},
};
use tower::ServiceExt;

/// Arbitrary fixed start time for the manual clock.
pub const START: u64 = 1_700_000_000;

pub const PASSWORD: &str = "correct horse battery";

pub struct TestApp {
    pub app: Router,
    pub db: Database,
    pub clock: ManualClock,
    pub passwords: Arc<Passwords>,
}

/// Tokens returned by a successful login.
#[derive(Debug, Clone)]
pub struct LoggedIn {
    pub account_id: String,
    pub auth_token: String,
    pub csrf_token: String,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_settings(AuthSettings {
            login_floor: None,
            ..AuthSettings::default()
        })
        .await
    }

    pub async fn with_settings(settings: AuthSettings) -> Self {
        let db = Database::open(":memory:")
            .await
            .expect("Failed to open test database");
        let clock = ManualClock::new(START);
        let passwords = Arc::new(Passwords::insecure_fast().expect("Failed to build hasher"));
        let config = ServerConfig {
            db: db.clone(),
            clock: Arc::new(clock.clone()),
            settings,
            passwords: passwords.clone(),
            login_attempts_per_minute: 1000,
        };
        Self {
            app: create_app(&config),
            db,
            clock,
            passwords,
        }
    }

    pub async fn organisation(&self, name: &str) -> String {
        self.db
            .organisations()
            .create(name)
            .await
            .expect("Failed to create organisation")
    }

    pub async fn account(
        &self,
        email: &str,
        role: AccountRole,
        organisation_id: Option<&str>,
    ) -> String {
        let hash = self.passwords.hash(PASSWORD).unwrap();
        self.db
            .accounts()
            .create(&NewAccount {
                email,
                name: email,
                password_hash: &hash,
                role,
                organisation_id,
            })
            .await
            .expect("Failed to create account")
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn login_with(&self, email: &str, password: &str, keep_signed_in: bool) -> Response<Body> {
        let body = serde_json::json!({
            "email": email,
            "password": password,
            "keepSignedIn": keep_signed_in,
        });
        self.send(
            Request::builder()
                .method("POST")
                .uri("/api/session")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn login(&self, email: &str) -> LoggedIn {
        let response = self.login_with(email, PASSWORD, false).await;
        assert_eq!(response.status(), StatusCode::OK, "login failed for {email}");
        let json = body_json(response).await;
        LoggedIn {
            account_id: json["accountId"].as_str().unwrap().to_string(),
            auth_token: json["authToken"].as_str().unwrap().to_string(),
            csrf_token: json["csrfToken"].as_str().unwrap().to_string(),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}

/// Request authenticated by cookie, with the CSRF header.
pub fn cookie_request(method: &str, uri: &str, session: &LoggedIn, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::COOKIE, format!("authToken={}", session.auth_token))
        .header("x-csrf-token", &session.csrf_token);
    with_body(builder, body)
}

/// Request authenticated by bearer header, without CSRF.
pub fn bearer_request(method: &str, uri: &str, session: &LoggedIn, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", session.auth_token));
    with_body(builder, body)
}

fn with_body(builder: axum::http::request::Builder, body: Option<serde_json::Value>) -> Request<Body> {
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

pub async fn error_code(response: Response<Body>) -> String {
    let json = body_json(response).await;
    json["error"]["code"].as_str().unwrap_or_default().to_string()
}

pub fn set_cookies(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect()
}
