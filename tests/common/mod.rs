#![allow(dead_code, clippy::unwrap_used)]

use authgate::api::{
    self,
    handlers::auth::{AuthConfig, AuthState, TokenIssuer, TokenTtls},
};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use secrecy::SecretString;
use serde_json::{Value, json};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

pub const ACCESS_SECRET: &str = "integration-access-secret-0123456789abcdef";
pub const REFRESH_SECRET: &str = "integration-refresh-secret-0123456789abcdef";
pub const FRONTEND: &str = "http://localhost:3000";
pub const PASSWORD: &str = "Passw0rd!";

pub fn auth_state(ttls: TokenTtls) -> Arc<AuthState> {
    let tokens = TokenIssuer::new(
        &SecretString::from(ACCESS_SECRET),
        &SecretString::from(REFRESH_SECRET),
        ttls,
    )
    .unwrap();
    Arc::new(AuthState::new(
        AuthConfig::new(FRONTEND.to_string()).with_app_name("Authgate Test".to_string()),
        tokens,
    ))
}

/// Pool that never connects; for requests rejected before any query runs.
pub fn unreachable_pool() -> PgPool {
    PgPoolOptions::new()
        .connect_lazy("postgres://authgate@127.0.0.1:1/authgate")
        .unwrap()
}

pub fn app(pool: PgPool) -> Router {
    api::app(pool, auth_state(TokenTtls::default())).unwrap()
}

/// Connect to `AUTHGATE_TEST_DSN` and apply the schema, or `None` when unset.
pub async fn test_pool() -> Option<PgPool> {
    let Ok(dsn) = std::env::var("AUTHGATE_TEST_DSN") else {
        eprintln!("AUTHGATE_TEST_DSN not set; skipping database test");
        return None;
    };
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&dsn)
        .await
        .unwrap();
    api::apply_schema(&pool).await.unwrap();
    Some(pool)
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl Reply {
    /// `name=value` pairs from `Set-Cookie`, skipping cleared cookies.
    pub fn cookies(&self) -> String {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .filter(|pair| pair.split_once('=').is_some_and(|(_, v)| !v.is_empty()))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_string())
    }
}

pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    cookies: &str,
) -> Reply {
    let mut builder = Request::builder().method(method).uri(uri);
    if !cookies.is_empty() {
        builder = builder.header(header::COOKIE, cookies);
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    Reply {
        status,
        headers,
        body,
    }
}

/// Short unique suffix so parallel tests never collide on usernames or emails.
pub fn unique(prefix: &str) -> String {
    let id = ulid::Ulid::new().to_string().to_lowercase();
    format!("{prefix}_{}", &id[id.len() - 10..])
}

pub async fn register(app: &Router, username: &str) -> Reply {
    send(
        app,
        Method::POST,
        "/api/auth/register",
        Some(json!({
            "username": username,
            "email": format!("{username}@example.com"),
            "password": PASSWORD,
            "confirmPassword": PASSWORD,
        })),
        "",
    )
    .await
}

pub async fn login(app: &Router, identifier: &str, password: &str) -> Reply {
    send(
        app,
        Method::POST,
        "/api/auth/login",
        Some(json!({ "emailOrUsername": identifier, "password": password })),
        "",
    )
    .await
}

pub fn user_id(reply: &Reply) -> Uuid {
    reply.body["data"]["user"]["id"]
        .as_str()
        .and_then(|id| Uuid::parse_str(id).ok())
        .unwrap()
}

pub async fn set_role(pool: &PgPool, id: Uuid, role: &str) {
    sqlx::query("UPDATE users SET role = $2::user_role WHERE id = $1")
        .bind(id)
        .bind(role)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn register_invited(app: &Router, username: &str, email: &str, token: &str) -> Reply {
    send(
        app,
        Method::POST,
        "/api/auth/register",
        Some(json!({
            "username": username,
            "email": email,
            "password": PASSWORD,
            "confirmPassword": PASSWORD,
            "inviteToken": token,
        })),
        "",
    )
    .await
}

/// Token at the end of an invite link.
pub fn invite_token(reply: &Reply) -> String {
    reply.body["data"]["inviteLink"]
        .as_str()
        .and_then(|link| link.rsplit('/').next())
        .unwrap()
        .to_string()
}
