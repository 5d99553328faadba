//! Router-level tests for requests rejected before the database is touched.

#![allow(clippy::unwrap_used)]

mod common;

use authgate::api::handlers::auth::TokenTtls;
use axum::{
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use common::{FRONTEND, app, auth_state, send, unreachable_pool};
use serde_json::{Value, json};
use tower::ServiceExt;

#[tokio::test]
async fn malformed_json_is_bad_request() {
    let app = app(unreachable_pool());
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"emailOrUsername\": "))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn login_without_fields_is_unprocessable() {
    let app = app(unreachable_pool());
    let reply = send(&app, Method::POST, "/api/auth/login", Some(json!({})), "").await;

    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(reply.body["success"], false);
    assert!(reply.body["errors"]["emailOrUsername"].is_array());
    assert!(reply.body["errors"]["password"].is_array());
}

#[tokio::test]
async fn register_rejects_weak_password_before_lookup() {
    let app = app(unreachable_pool());
    let reply = send(
        &app,
        Method::POST,
        "/api/auth/register",
        Some(json!({
            "username": "alice",
            "email": "alice@example.com",
            "password": "weak",
            "confirmPassword": "weak",
        })),
        "",
    )
    .await;

    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(reply.body["errors"]["password"].is_array());
}

#[tokio::test]
async fn protected_routes_require_authentication() {
    let app = app(unreachable_pool());
    for (method, uri) in [
        (Method::GET, "/api/auth/me"),
        (Method::GET, "/api/users/me"),
        (Method::POST, "/api/users/me/2fa/setup"),
        (Method::GET, "/api/admin/users"),
        (Method::GET, "/api/admin/stats"),
        (Method::GET, "/api/admin/settings"),
    ] {
        let reply = send(&app, method.clone(), uri, None, "").await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED, "{method} {uri}");
        assert_eq!(reply.body["success"], false);
    }
}

#[tokio::test]
async fn forged_access_token_is_rejected() {
    let app = app(unreachable_pool());
    let reply = send(
        &app,
        Method::GET,
        "/api/users/me",
        None,
        "access_token=not.a.jwt",
    )
    .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["error"], "Invalid access token");
}

#[tokio::test]
async fn expired_access_token_is_rejected() {
    let state = auth_state(TokenTtls {
        access: -120,
        ..TokenTtls::default()
    });
    let token = state
        .tokens()
        .issue_access(uuid::Uuid::new_v4(), authgate::api::handlers::auth::Role::Admin)
        .unwrap();
    let app = authgate::api::app(unreachable_pool(), state).unwrap();

    let reply = send(
        &app,
        Method::GET,
        "/api/admin/users",
        None,
        &format!("access_token={}", token.token),
    )
    .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["error"], "Access token expired");
}

#[tokio::test]
async fn expired_two_factor_challenge_is_rejected() {
    let state = auth_state(TokenTtls {
        two_factor: -120,
        ..TokenTtls::default()
    });
    let token = state
        .tokens()
        .issue_two_factor(uuid::Uuid::new_v4(), authgate::api::handlers::auth::Role::User)
        .unwrap();
    let app = authgate::api::app(unreachable_pool(), state).unwrap();

    let reply = send(
        &app,
        Method::POST,
        "/api/auth/verify-2fa",
        Some(json!({ "code": "123456" })),
        &format!("two_factor_token={}", token.token),
    )
    .await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refresh_without_cookie_is_unauthorized() {
    let app = app(unreachable_pool());
    let reply = send(&app, Method::POST, "/api/auth/refresh", None, "").await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn short_two_factor_code_is_unprocessable() {
    let app = app(unreachable_pool());
    let reply = send(
        &app,
        Method::POST,
        "/api/auth/verify-2fa",
        Some(json!({ "code": "12" })),
        "",
    )
    .await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn request_id_is_generated_and_propagated() {
    let app = app(unreachable_pool());
    let reply = send(&app, Method::GET, "/api/users/me", None, "").await;
    let request_id = reply
        .headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok());
    assert!(request_id.is_some_and(|id| id.len() == 26));
}

#[tokio::test]
async fn cors_preflight_allows_frontend_with_credentials() {
    let app = app(unreachable_pool());
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/auth/login")
        .header(header::ORIGIN, FRONTEND)
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert!(response.status().is_success());
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok()),
        Some(FRONTEND)
    );
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
            .and_then(|v| v.to_str().ok()),
        Some("true")
    );
}
