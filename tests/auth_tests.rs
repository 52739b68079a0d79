mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    routing::get,
};
use backoffice::auth::{AuthSettings, RouteAccess, with_session};
use backoffice::clock::Clock;
use backoffice::db::{AccountRole, Database};
use backoffice::impl_has_auth_backend;
use backoffice::token::{
    EXTENDED_SESSION_LIFETIME, SESSION_LIFETIME, verify_csrf_token, verify_session_token,
};
use common::{
    LoggedIn, PASSWORD, START, TestApp, bearer_request, body_json, cookie_request, error_code,
    set_cookies,
};
use tower::ServiceExt;

async fn sysadmin_session(t: &TestApp) -> LoggedIn {
    t.account("root@example.test", AccountRole::SystemAdministrator, None)
        .await;
    t.login("root@example.test").await
}

fn create_organisation_body(name: &str) -> serde_json::Value {
    serde_json::json!({ "name": name })
}

#[tokio::test]
async fn test_unsafe_cookie_request_without_csrf_is_rejected() {
    let t = TestApp::new().await;
    let session = sysadmin_session(&t).await;

    let response = t
        .send(
            Request::builder()
                .method("POST")
                .uri("/api/organisations")
                .header(header::COOKIE, format!("authToken={}", session.auth_token))
                .header("content-type", "application/json")
                .body(Body::from(create_organisation_body("Acme").to_string()))
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    // CSRF failures leave the session cookie alone.
    assert!(set_cookies(response.headers()).is_empty());
    assert_eq!(error_code(response).await, "csrfTokenMissing");
}

#[tokio::test]
async fn test_unsafe_cookie_request_with_bad_csrf_is_rejected() {
    let t = TestApp::new().await;
    let session = sysadmin_session(&t).await;
    let forged = LoggedIn {
        csrf_token: "not.a.token".to_string(),
        ..session
    };

    let response = t
        .send(cookie_request(
            "POST",
            "/api/organisations",
            &forged,
            Some(create_organisation_body("Acme")),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(response).await, "csrfTokenInvalid");
}

#[tokio::test]
async fn test_unsafe_cookie_request_with_csrf_succeeds() {
    let t = TestApp::new().await;
    let session = sysadmin_session(&t).await;

    let response = t
        .send(cookie_request(
            "POST",
            "/api/organisations",
            &session,
            Some(create_organisation_body("Acme")),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["name"], "Acme");
}

#[tokio::test]
async fn test_safe_method_skips_csrf() {
    let t = TestApp::new().await;
    let session = sysadmin_session(&t).await;

    let response = t
        .send(
            Request::builder()
                .uri("/api/organisations")
                .header(header::COOKIE, format!("authToken={}", session.auth_token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_bearer_skips_csrf() {
    let t = TestApp::new().await;
    let session = sysadmin_session(&t).await;

    let response = t
        .send(bearer_request(
            "POST",
            "/api/organisations",
            &session,
            Some(create_organisation_body("Acme")),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_csrf_token_is_bound_to_account() {
    let t = TestApp::new().await;
    let root = sysadmin_session(&t).await;
    t.account("other@example.test", AccountRole::SystemAdministrator, None)
        .await;
    let other = t.login("other@example.test").await;

    let mixed = LoggedIn {
        csrf_token: other.csrf_token.clone(),
        ..root
    };
    let response = t
        .send(cookie_request(
            "POST",
            "/api/organisations",
            &mixed,
            Some(create_organisation_body("Acme")),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(response).await, "csrfTokenInvalid");
}

#[tokio::test]
async fn test_missing_session_requires_authentication() {
    let t = TestApp::new().await;

    let response = t
        .send(
            Request::builder()
                .uri("/api/accounts")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(response).await, "authenticationRequired");
}

#[tokio::test]
async fn test_garbage_token_is_invalid_and_cleared() {
    let t = TestApp::new().await;

    let response = t
        .send(
            Request::builder()
                .uri("/api/accounts")
                .header(header::COOKIE, "authToken=eyJhbGciOiJIUzI1NiJ9.e30.c2ln")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let cookies = set_cookies(response.headers());
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].contains("Max-Age=0"));
    assert_eq!(error_code(response).await, "authTokenInvalid");
}

#[tokio::test]
async fn test_expired_token_is_distinguished() {
    let t = TestApp::new().await;
    let session = sysadmin_session(&t).await;
    t.advance(SESSION_LIFETIME + Duration::from_secs(1));

    let response = t
        .send(cookie_request("GET", "/api/accounts", &session, None))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(response).await, "authTokenExpired");
}

#[tokio::test]
async fn test_token_is_valid_until_expiry_inclusive() {
    let t = TestApp::new().await;
    let session = sysadmin_session(&t).await;
    t.advance(SESSION_LIFETIME);

    let response = t
        .send(bearer_request("GET", "/api/accounts", &session, None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_token_for_deleted_account_is_invalid() {
    let t = TestApp::new().await;
    t.account("gone@example.test", AccountRole::SystemAdministrator, None)
        .await;
    let session = t.login("gone@example.test").await;
    t.db.accounts().delete(&session.account_id).await.unwrap();

    let response = t
        .send(bearer_request("GET", "/api/accounts", &session, None))
        .await;
    assert_eq!(error_code(response).await, "authTokenInvalid");
}

#[tokio::test]
async fn test_unknown_stored_role_fails_closed() {
    let t = TestApp::new().await;
    let session = sysadmin_session(&t).await;

    sqlx::query("UPDATE accounts SET role = 'superuser' WHERE id = ?")
        .bind(&session.account_id)
        .execute(t.db.pool())
        .await
        .unwrap();

    let response = t
        .send(bearer_request("GET", "/api/accounts", &session, None))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(response).await, "authTokenInvalid");
}

#[tokio::test]
async fn test_role_change_applies_to_next_request() {
    let t = TestApp::new().await;
    let session = sysadmin_session(&t).await;
    let org = t.organisation("Acme").await;

    sqlx::query("UPDATE accounts SET role = 'organisationAdministrator', organisation_id = ? WHERE id = ?")
        .bind(&org)
        .bind(&session.account_id)
        .execute(t.db.pool())
        .await
        .unwrap();

    let response = t
        .send(bearer_request(
            "POST",
            "/api/organisations",
            &session,
            Some(create_organisation_body("Globex")),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(error_code(response).await, "notAuthorized");
}

#[tokio::test]
async fn test_no_refresh_before_threshold() {
    let t = TestApp::new().await;
    let session = sysadmin_session(&t).await;
    t.advance(Duration::from_secs(14 * 60));

    let response = t
        .send(cookie_request("GET", "/api/accounts", &session, None))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-refresh-auth-token").is_none());
    assert!(response.headers().get("x-refresh-csrf-token").is_none());
    assert!(set_cookies(response.headers()).is_empty());
}

#[tokio::test]
async fn test_refresh_after_threshold() {
    let t = TestApp::new().await;
    let session = sysadmin_session(&t).await;
    t.advance(Duration::from_secs(16 * 60));
    let now = START + 16 * 60;

    let response = t
        .send(cookie_request("GET", "/api/accounts", &session, None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let refreshed_auth = response
        .headers()
        .get("x-refresh-auth-token")
        .expect("refreshed session token")
        .to_str()
        .unwrap()
        .to_string();
    let refreshed_csrf = response
        .headers()
        .get("x-refresh-csrf-token")
        .expect("refreshed CSRF token")
        .to_str()
        .unwrap()
        .to_string();

    let cookies = set_cookies(response.headers());
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].starts_with(&format!("authToken={};", refreshed_auth)));

    let account = t
        .db
        .accounts()
        .get_by_id(&session.account_id)
        .await
        .unwrap()
        .unwrap();
    let claims = verify_session_token(&refreshed_auth, &account.secret, now).unwrap();
    assert_eq!(claims.iat, now);
    assert_eq!(claims.exp, now + SESSION_LIFETIME.as_secs());
    assert_eq!(claims.sub, session.account_id);
    verify_csrf_token(&refreshed_csrf, &account.secret, now).unwrap();

    let renewed = LoggedIn {
        account_id: session.account_id.clone(),
        auth_token: refreshed_auth,
        csrf_token: refreshed_csrf,
    };
    let response = t
        .send(cookie_request(
            "POST",
            "/api/organisations",
            &renewed,
            Some(create_organisation_body("Acme")),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(response.headers().get("x-refresh-auth-token").is_none());
}

#[tokio::test]
async fn test_refresh_keeps_extended_lifetime() {
    let t = TestApp::new().await;
    t.account("root@example.test", AccountRole::SystemAdministrator, None)
        .await;
    let response = t.login_with("root@example.test", PASSWORD, true).await;
    let session = body_json(response).await;
    let account_id = session["accountId"].as_str().unwrap().to_string();
    let auth_token = session["authToken"].as_str().unwrap().to_string();

    t.advance(Duration::from_secs(16 * 60));
    let now = START + 16 * 60;

    let response = t
        .send(
            Request::builder()
                .uri("/api/accounts")
                .header(header::AUTHORIZATION, format!("Bearer {auth_token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let refreshed = response
        .headers()
        .get("x-refresh-auth-token")
        .expect("refreshed session token")
        .to_str()
        .unwrap()
        .to_string();
    let cookie = set_cookies(response.headers()).remove(0);
    assert!(cookie.contains(&format!("Max-Age={}", EXTENDED_SESSION_LIFETIME.as_secs())));

    let account = t.db.accounts().get_by_id(&account_id).await.unwrap().unwrap();
    let claims = verify_session_token(&refreshed, &account.secret, now).unwrap();
    assert_eq!(claims.iat, now);
    assert_eq!(claims.exp - claims.iat, EXTENDED_SESSION_LIFETIME.as_secs());
}

#[derive(Clone)]
struct PipelineState {
    db: Database,
    clock: Arc<dyn Clock>,
    settings: Arc<AuthSettings>,
}

impl_has_auth_backend!(PipelineState);

#[tokio::test]
async fn test_refresh_failure_keeps_original_response() {
    let t = TestApp::new().await;
    let session = sysadmin_session(&t).await;
    t.advance(Duration::from_secs(16 * 60));

    // The handler takes the store down, so the post-handler account lookup fails.
    let db = t.db.clone();
    let router = Router::new().route(
        "/",
        get(move || {
            let db = db.clone();
            async move {
                db.pool().close().await;
                StatusCode::ACCEPTED
            }
        }),
    );
    let state = PipelineState {
        db: t.db.clone(),
        clock: Arc::new(t.clock.clone()),
        settings: Arc::new(AuthSettings {
            login_floor: None,
            ..AuthSettings::default()
        }),
    };
    let app = with_session(router, state, RouteAccess::Authenticated);

    let response = app
        .oneshot(bearer_request("GET", "/", &session, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(response.headers().get("x-refresh-auth-token").is_none());
    assert!(response.headers().get("x-refresh-csrf-token").is_none());
    assert!(set_cookies(response.headers()).is_empty());
}

#[tokio::test]
async fn test_session_token_cannot_stand_in_for_csrf_token() {
    let t = TestApp::new().await;
    let session = sysadmin_session(&t).await;
    let replayed = LoggedIn {
        csrf_token: session.auth_token.clone(),
        ..session
    };

    let response = t
        .send(cookie_request(
            "POST",
            "/api/organisations",
            &replayed,
            Some(create_organisation_body("Acme")),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(response).await, "csrfTokenInvalid");
}

#[tokio::test]
async fn test_refresh_does_not_touch_failed_requests() {
    let t = TestApp::new().await;
    let session = sysadmin_session(&t).await;
    t.advance(Duration::from_secs(16 * 60));

    let forged = LoggedIn {
        csrf_token: String::new(),
        ..session
    };
    let response = t
        .send(cookie_request("DELETE", "/api/organisations/x", &forged, None))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get("x-refresh-auth-token").is_none());
}

#[tokio::test]
async fn test_no_refresh_after_revocation_in_request() {
    let t = TestApp::new().await;
    let session = sysadmin_session(&t).await;
    t.advance(Duration::from_secs(16 * 60));

    let response = t
        .send(bearer_request("POST", "/api/session/revoke", &session, None))
        .await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(response.headers().get("x-refresh-auth-token").is_none());
}

#[tokio::test]
async fn test_secure_cookie_behind_tls_proxy() {
    let t = TestApp::new().await;
    t.account("root@example.test", AccountRole::SystemAdministrator, None)
        .await;

    let response = t
        .send(
            Request::builder()
                .method("POST")
                .uri("/api/session")
                .header("content-type", "application/json")
                .header("x-forwarded-proto", "https")
                .body(Body::from(
                    serde_json::json!({
                        "email": "root@example.test",
                        "password": common::PASSWORD,
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await;

    let cookies = set_cookies(response.headers());
    assert!(cookies[0].ends_with("; Secure"));
}

#[tokio::test]
async fn test_bearer_wins_over_cookie() {
    let t = TestApp::new().await;
    let session = sysadmin_session(&t).await;

    let response = t
        .send(
            Request::builder()
                .method("POST")
                .uri("/api/organisations")
                .header(header::COOKIE, "authToken=garbage")
                .header(
                    header::AUTHORIZATION,
                    format!("Bearer {}", session.auth_token),
                )
                .header("content-type", "application/json")
                .body(Body::from(create_organisation_body("Acme").to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
}
