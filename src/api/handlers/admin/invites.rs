//! Registration invites.
//!
//! An invite binds an email address to a role. The token travels in the invite
//! link; registering with it and the same email consumes the invite.

use anyhow::{Context, Result, anyhow};
use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::Response,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{PgPool, Row, postgres::PgRow};
use std::sync::Arc;
use tracing::{Instrument, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::{
    error::{ApiError, ApiResult, FieldErrors, message, success},
    extract::Payload,
    handlers::auth::{
        AuthConfig, AuthState, Role,
        principal::require_role,
        role::ADMIN_ROLES,
        storage::email_taken,
        utils::{check_email, generate_token, normalize_email},
    },
};

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateInviteRequest {
    pub email: String,
    /// Defaults to `USER`.
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
    Pending,
    Used,
    Expired,
}

impl InviteStatus {
    fn of(used_at: Option<DateTime<Utc>>, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if used_at.is_some() {
            Self::Used
        } else if expires_at <= now {
            Self::Expired
        } else {
            Self::Pending
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InviteCreator {
    pub username: String,
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InviteView {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub status: InviteStatus,
    /// Only present while the invite can still be used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_link: Option<String>,
    pub created_by: Option<InviteCreator>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl InviteView {
    fn from_row(row: &PgRow, config: &AuthConfig, now: DateTime<Utc>) -> Result<Self> {
        let role: String = row.get("role");
        let token: String = row.get("token");
        let used_at: Option<DateTime<Utc>> = row.get("used_at");
        let expires_at: DateTime<Utc> = row.get("expires_at");
        let status = InviteStatus::of(used_at, expires_at, now);
        let created_by = match (
            row.get::<Option<String>, _>("creator_username"),
            row.get::<Option<String>, _>("creator_email"),
        ) {
            (Some(username), Some(email)) => Some(InviteCreator { username, email }),
            _ => None,
        };
        Ok(Self {
            id: row.get("id"),
            email: row.get("email"),
            role: role.parse().map_err(|err: String| anyhow!(err))?,
            status,
            invite_link: (status == InviteStatus::Pending).then(|| config.invite_link(&token)),
            created_by,
            expires_at,
            used_at,
            created_at: row.get("created_at"),
        })
    }
}

const INVITE_SELECT: &str = r"
    SELECT i.id, i.email, i.role::text AS role, i.token, i.expires_at, i.used_at, i.created_at,
           u.username AS creator_username, u.email AS creator_email
    FROM invites i
    LEFT JOIN users u ON u.id = i.created_by
";

async fn pending_invite_exists(pool: &PgPool, email: &str) -> Result<bool> {
    let query = r"
        SELECT EXISTS(
            SELECT 1 FROM invites
            WHERE email = $1 AND used_at IS NULL AND expires_at > NOW()
        )
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    sqlx::query_scalar(query)
        .bind(email)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to check pending invites")
}

async fn insert_invite(
    pool: &PgPool,
    email: &str,
    role: Role,
    token: &str,
    created_by: Uuid,
    expires_at: DateTime<Utc>,
) -> Result<Uuid> {
    let query = r"
        INSERT INTO invites (email, role, token, created_by, expires_at)
        VALUES ($1, $2::user_role, $3, $4, $5)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query_scalar(query)
        .bind(email)
        .bind(role.as_str())
        .bind(token)
        .bind(created_by)
        .bind(expires_at)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to insert invite")
}

async fn fetch_invite(pool: &PgPool, config: &AuthConfig, invite_id: Uuid) -> Result<Option<InviteView>> {
    let query = format!("{INVITE_SELECT} WHERE i.id = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(invite_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to load invite")?;
    let now = Utc::now();
    row.map(|row| InviteView::from_row(&row, config, now))
        .transpose()
}

async fn fetch_invites(pool: &PgPool, config: &AuthConfig) -> Result<Vec<InviteView>> {
    let query = format!("{INVITE_SELECT} ORDER BY i.created_at DESC");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let rows = sqlx::query(&query)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list invites")?;
    let now = Utc::now();
    rows.iter()
        .map(|row| InviteView::from_row(row, config, now))
        .collect()
}

async fn delete_invite(pool: &PgPool, invite_id: Uuid) -> Result<()> {
    let query = "DELETE FROM invites WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(invite_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete invite")?;
    Ok(())
}

fn validate(request: CreateInviteRequest, actor_role: Role) -> Result<(String, Role), ApiError> {
    let email = normalize_email(&request.email);
    let mut errors = FieldErrors::new();
    check_email(&mut errors, "email", &email);
    errors.into_result()?;

    let role = request.role.unwrap_or(Role::User);
    if !actor_role.can_assign(role) {
        return Err(ApiError::forbidden("Admins can only invite regular users"));
    }
    Ok((email, role))
}

#[utoipa::path(
    post,
    path = "/api/admin/invites",
    request_body = CreateInviteRequest,
    responses(
        (status = 201, description = "Invite created.", body = InviteView),
        (status = 400, description = "Email already registered or already invited."),
        (status = 401, description = "Not authenticated."),
        (status = 403, description = "Role outside the caller's authority."),
        (status = 422, description = "Invalid email.")
    ),
    tag = "admin"
)]
pub async fn create_invite(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Payload(request): Payload<CreateInviteRequest>,
) -> ApiResult<Response> {
    let actor = require_role(&headers, &pool, &auth_state, ADMIN_ROLES).await?;
    let (email, role) = validate(request, actor.role)?;

    if email_taken(&pool, &email, None).await? {
        return Err(ApiError::bad_request("A user with this email already exists"));
    }
    if pending_invite_exists(&pool, &email).await? {
        return Err(ApiError::bad_request(
            "A pending invitation already exists for this email",
        ));
    }

    let config = auth_state.config();
    let token = generate_token()?;
    let expires_at = Utc::now() + Duration::days(config.invite_ttl_days());
    let invite_id = insert_invite(&pool, &email, role, &token, actor.user_id, expires_at).await?;

    let invite = fetch_invite(&pool, config, invite_id)
        .await?
        .ok_or_else(|| anyhow!("invite {invite_id} vanished after insert"))?;

    info!(actor_id = %actor.user_id, %invite_id, %role, "Invite created");
    Ok(success(
        StatusCode::CREATED,
        json!({
            "invite": invite,
            "inviteLink": config.invite_link(&token),
            "message": "Invitation created successfully",
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/admin/invites",
    responses(
        (status = 200, description = "All invites, newest first.", body = [InviteView]),
        (status = 401, description = "Not authenticated."),
        (status = 403, description = "Requires ADMIN or SUPER_ADMIN.")
    ),
    tag = "admin"
)]
pub async fn list_invites(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> ApiResult<Response> {
    require_role(&headers, &pool, &auth_state, ADMIN_ROLES).await?;
    let invites = fetch_invites(&pool, auth_state.config()).await?;
    Ok(success(StatusCode::OK, json!({ "invites": invites })))
}

#[utoipa::path(
    delete,
    path = "/api/admin/invites/{id}",
    params(
        ("id" = String, Path, description = "Invite id")
    ),
    responses(
        (status = 200, description = "Invite revoked."),
        (status = 400, description = "Invalid invite id."),
        (status = 401, description = "Not authenticated."),
        (status = 403, description = "Role outside the caller's authority."),
        (status = 404, description = "Invite not found.")
    ),
    tag = "admin"
)]
pub async fn revoke_invite(
    headers: HeaderMap,
    Path(id): Path<String>,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> ApiResult<Response> {
    let actor = require_role(&headers, &pool, &auth_state, ADMIN_ROLES).await?;
    let invite_id =
        Uuid::parse_str(id.trim()).map_err(|_| ApiError::bad_request("Invalid invite id"))?;

    let invite = fetch_invite(&pool, auth_state.config(), invite_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Invite not found"))?;
    if !actor.role.can_assign(invite.role) {
        return Err(ApiError::forbidden("Admins can only revoke invitations for regular users"));
    }

    delete_invite(&pool, invite_id).await?;
    info!(actor_id = %actor.user_id, %invite_id, "Invite revoked");
    Ok(message("Invitation revoked successfully"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(email: &str, role: Option<Role>) -> CreateInviteRequest {
        CreateInviteRequest {
            email: email.to_string(),
            role,
        }
    }

    #[test]
    fn status_from_timestamps() {
        let now = Utc::now();
        let later = now + Duration::days(1);
        let earlier = now - Duration::days(1);
        assert_eq!(InviteStatus::of(None, later, now), InviteStatus::Pending);
        assert_eq!(InviteStatus::of(None, earlier, now), InviteStatus::Expired);
        assert_eq!(InviteStatus::of(Some(earlier), later, now), InviteStatus::Used);
        assert_eq!(InviteStatus::of(None, now, now), InviteStatus::Expired);
    }

    #[test]
    fn default_role_is_user() {
        let result = validate(request(" New@Example.com ", None), Role::Admin).ok();
        assert_eq!(result, Some(("new@example.com".to_string(), Role::User)));
    }

    #[test]
    fn admin_cannot_invite_admins() {
        assert!(matches!(
            validate(request("a@example.com", Some(Role::Admin)), Role::Admin),
            Err(ApiError::Forbidden(_))
        ));
        assert!(validate(request("a@example.com", Some(Role::Admin)), Role::SuperAdmin).is_ok());
    }

    #[test]
    fn invalid_email_is_422() {
        assert!(matches!(
            validate(request("nope", None), Role::SuperAdmin),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&InviteStatus::Pending).ok().as_deref(),
            Some("\"pending\"")
        );
    }
}
