//! System-wide authentication settings.
//!
//! Stored as one JSON document under `system_settings.key = 'auth_settings'`.
//! Missing keys fall back to defaults, so older documents keep working as new
//! flags are added.

use anyhow::{Context, Result};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::Response,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::{PgExecutor, PgPool, Row};
use std::sync::Arc;
use tracing::{Instrument, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::{
    error::{ApiResult, success},
    extract::Payload,
    handlers::auth::{AuthState, principal::require_role, role::ADMIN_ROLES},
};

const AUTH_SETTINGS_KEY: &str = "auth_settings";

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
#[allow(clippy::struct_excessive_bools)]
pub struct AuthSettings {
    pub allow_password_auth: bool,
    #[serde(rename = "allowGoogleOAuth")]
    pub allow_google_oauth: bool,
    #[serde(rename = "allowGithubOAuth")]
    pub allow_github_oauth: bool,
    pub require_username: bool,
    pub require_email: bool,
    pub email_verification_required: bool,
    pub two_factor_required: bool,
    pub allow_self_registration: bool,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            allow_password_auth: true,
            allow_google_oauth: false,
            allow_github_oauth: false,
            require_username: true,
            require_email: true,
            email_verification_required: false,
            two_factor_required: false,
            allow_self_registration: true,
        }
    }
}

/// Partial update; absent fields keep their current value.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuthSettingsUpdate {
    pub allow_password_auth: Option<bool>,
    #[serde(rename = "allowGoogleOAuth")]
    pub allow_google_oauth: Option<bool>,
    #[serde(rename = "allowGithubOAuth")]
    pub allow_github_oauth: Option<bool>,
    pub require_username: Option<bool>,
    pub require_email: Option<bool>,
    pub email_verification_required: Option<bool>,
    pub two_factor_required: Option<bool>,
    pub allow_self_registration: Option<bool>,
}

impl AuthSettings {
    /// Read a stored document, falling back to defaults when it is unusable.
    #[must_use]
    pub fn from_stored(value: Option<Value>) -> Self {
        match value {
            Some(value @ Value::Object(_)) => serde_json::from_value(value).unwrap_or_else(|err| {
                warn!("Malformed auth settings, using defaults: {err}");
                Self::default()
            }),
            Some(_) => {
                warn!("Auth settings are not a JSON object, using defaults");
                Self::default()
            }
            None => Self::default(),
        }
    }

    #[must_use]
    pub fn merge(self, update: AuthSettingsUpdate) -> Self {
        Self {
            allow_password_auth: update
                .allow_password_auth
                .unwrap_or(self.allow_password_auth),
            allow_google_oauth: update
                .allow_google_oauth
                .unwrap_or(self.allow_google_oauth),
            allow_github_oauth: update
                .allow_github_oauth
                .unwrap_or(self.allow_github_oauth),
            require_username: update.require_username.unwrap_or(self.require_username),
            require_email: update.require_email.unwrap_or(self.require_email),
            email_verification_required: update
                .email_verification_required
                .unwrap_or(self.email_verification_required),
            two_factor_required: update
                .two_factor_required
                .unwrap_or(self.two_factor_required),
            allow_self_registration: update
                .allow_self_registration
                .unwrap_or(self.allow_self_registration),
        }
    }
}

async fn fetch_stored<'e, E>(executor: E, lock: bool) -> Result<Option<Value>>
where
    E: PgExecutor<'e>,
{
    let query = if lock {
        "SELECT value FROM system_settings WHERE key = $1 FOR UPDATE"
    } else {
        "SELECT value FROM system_settings WHERE key = $1"
    };
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(AUTH_SETTINGS_KEY)
        .fetch_optional(executor)
        .instrument(span)
        .await
        .context("failed to load auth settings")?;
    Ok(row.map(|row| row.get::<Value, _>("value")))
}

/// Current settings (defaults when nothing is stored).
pub(crate) async fn load_auth_settings(pool: &PgPool) -> Result<AuthSettings> {
    fetch_stored(pool, false).await.map(AuthSettings::from_stored)
}

/// Merge `update` into the stored settings and return the result.
pub(crate) async fn update_auth_settings(
    pool: &PgPool,
    update: AuthSettingsUpdate,
    updated_by: Uuid,
) -> Result<AuthSettings> {
    let mut tx = pool.begin().await.context("begin settings transaction")?;

    let current = AuthSettings::from_stored(fetch_stored(&mut *tx, true).await?);
    let merged = current.merge(update);

    let query = r"
        INSERT INTO system_settings (key, value, updated_by, updated_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (key) DO UPDATE
        SET value = EXCLUDED.value,
            updated_by = EXCLUDED.updated_by,
            updated_at = NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(AUTH_SETTINGS_KEY)
        .bind(serde_json::to_value(merged).context("failed to encode auth settings")?)
        .bind(updated_by)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to store auth settings")?;

    tx.commit().await.context("commit settings transaction")?;
    Ok(merged)
}

#[utoipa::path(
    get,
    path = "/api/admin/settings",
    responses(
        (status = 200, description = "Current authentication settings.", body = AuthSettings),
        (status = 401, description = "Not authenticated."),
        (status = 403, description = "Requires ADMIN or SUPER_ADMIN.")
    ),
    tag = "admin"
)]
pub async fn get_settings(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> ApiResult<Response> {
    require_role(&headers, &pool, &auth_state, ADMIN_ROLES).await?;
    let settings = load_auth_settings(&pool).await?;
    Ok(success(StatusCode::OK, json!({ "settings": settings })))
}

#[utoipa::path(
    patch,
    path = "/api/admin/settings",
    request_body = AuthSettingsUpdate,
    responses(
        (status = 200, description = "Settings updated.", body = AuthSettings),
        (status = 401, description = "Not authenticated."),
        (status = 403, description = "Requires ADMIN or SUPER_ADMIN."),
        (status = 422, description = "Unknown or non-boolean setting.")
    ),
    tag = "admin"
)]
pub async fn update_settings(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Payload(update): Payload<AuthSettingsUpdate>,
) -> ApiResult<Response> {
    let principal = require_role(&headers, &pool, &auth_state, ADMIN_ROLES).await?;
    let settings = update_auth_settings(&pool, update, principal.user_id).await?;
    info!(user_id = %principal.user_id, ?settings, "Auth settings updated");
    Ok(success(
        StatusCode::OK,
        json!({ "settings": settings, "message": "Settings updated successfully" }),
    ))
}
