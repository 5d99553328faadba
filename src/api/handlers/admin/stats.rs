//! Dashboard counters for the admin area.

use anyhow::{Context, Result};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::Response,
};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::Instrument;
use utoipa::ToSchema;

use crate::api::{
    error::{ApiResult, success},
    handlers::auth::{
        AuthState,
        principal::require_role,
        role::ADMIN_ROLES,
        storage::{USER_COLUMNS, UserRecord},
        types::UserView,
    },
};

const RECENT_USERS: i64 = 5;

#[derive(Debug, Default, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoleCounts {
    pub user: i64,
    pub admin: i64,
    pub super_admin: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub total_users: i64,
    pub users_by_role: RoleCounts,
    pub new_users_today: i64,
    pub new_users_this_week: i64,
    pub new_users_this_month: i64,
    pub two_factor_enabled: i64,
    pub pending_invites: i64,
    pub recent_users: Vec<UserView>,
}

async fn fetch_stats(pool: &PgPool) -> Result<UserStats> {
    let query = r"
        SELECT
            COUNT(*) AS total,
            COUNT(*) FILTER (WHERE role = 'USER') AS role_user,
            COUNT(*) FILTER (WHERE role = 'ADMIN') AS role_admin,
            COUNT(*) FILTER (WHERE role = 'SUPER_ADMIN') AS role_super_admin,
            COUNT(*) FILTER (WHERE created_at >= date_trunc('day', NOW())) AS today,
            COUNT(*) FILTER (WHERE created_at >= NOW() - INTERVAL '7 days') AS week,
            COUNT(*) FILTER (WHERE created_at >= NOW() - INTERVAL '30 days') AS month,
            COUNT(*) FILTER (WHERE two_factor_enabled) AS two_factor,
            (SELECT COUNT(*) FROM invites WHERE used_at IS NULL AND expires_at > NOW()) AS invites
        FROM users
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let counts = sqlx::query(query)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to count users")?;

    let query = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC LIMIT $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let rows = sqlx::query(&query)
        .bind(RECENT_USERS)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to load recent users")?;
    let recent_users = rows
        .iter()
        .map(|row| UserRecord::from_row(row).map(|user| UserView::from(&user)))
        .collect::<Result<Vec<_>>>()?;

    Ok(UserStats {
        total_users: counts.get("total"),
        users_by_role: RoleCounts {
            user: counts.get("role_user"),
            admin: counts.get("role_admin"),
            super_admin: counts.get("role_super_admin"),
        },
        new_users_today: counts.get("today"),
        new_users_this_week: counts.get("week"),
        new_users_this_month: counts.get("month"),
        two_factor_enabled: counts.get("two_factor"),
        pending_invites: counts.get("invites"),
        recent_users,
    })
}

#[utoipa::path(
    get,
    path = "/api/admin/stats",
    responses(
        (status = 200, description = "User counters and the most recent sign-ups.", body = UserStats),
        (status = 401, description = "Not authenticated."),
        (status = 403, description = "Requires ADMIN or SUPER_ADMIN.")
    ),
    tag = "admin"
)]
pub async fn stats(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> ApiResult<Response> {
    require_role(&headers, &pool, &auth_state, ADMIN_ROLES).await?;
    let stats = fetch_stats(&pool).await?;
    Ok(success(StatusCode::OK, stats))
}
