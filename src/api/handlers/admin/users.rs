//! Admin user management.
//!
//! Flow Overview:
//! 1) Authenticate and require `ADMIN` or `SUPER_ADMIN`.
//! 2) Check the management hierarchy against the target's current role.
//! 3) Read, update, or delete the target.

use anyhow::{Context, Result};
use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::Response,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{Instrument, info};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::api::{
    error::{ApiError, ApiResult, FieldErrors, message, success},
    extract::Payload,
    handlers::auth::{
        AuthState, Role,
        principal::{Principal, require_role},
        role::ADMIN_ROLES,
        storage::{
            USER_COLUMNS, UserChanges, UserRecord, email_taken, lookup_user_by_id, update_user,
            username_taken,
        },
        types::UserView,
        utils::{check_email, check_username, normalize_email, normalize_username},
    },
};

pub(crate) const DEFAULT_PAGE_SIZE: i64 = 10;
pub(crate) const MAX_PAGE_SIZE: i64 = 100;
/// Highest page whose offset still fits in an `i64` at any page size.
const MAX_PAGE: i64 = i64::MAX / MAX_PAGE_SIZE;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListUsersQuery {
    /// 1-based page number.
    pub page: Option<String>,
    /// Page size, at most 100.
    pub limit: Option<String>,
    /// Case-insensitive match on username or email.
    pub search: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl Pagination {
    fn new(page: i64, limit: i64, total: i64) -> Self {
        Self {
            page,
            limit,
            total,
            total_pages: (total + limit - 1) / limit,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct AdminUserUpdateRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
}

/// Validated listing filters.
#[derive(Debug, PartialEq, Eq)]
struct UserFilter {
    page: i64,
    limit: i64,
    pattern: Option<String>,
    role: Option<Role>,
}

impl UserFilter {
    fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }
}

fn parse_filter(query: ListUsersQuery) -> Result<UserFilter, ApiError> {
    let page = query
        .page
        .as_deref()
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(1)
        .clamp(1, MAX_PAGE);
    let limit = query
        .limit
        .as_deref()
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let pattern = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|search| !search.is_empty())
        .map(like_pattern);
    let role = match query.role.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(value) => Some(
            value
                .parse::<Role>()
                .map_err(|_| ApiError::invalid("role", "Role must be USER, ADMIN, or SUPER_ADMIN"))?,
        ),
    };
    Ok(UserFilter {
        page,
        limit,
        pattern,
        role,
    })
}

/// `ILIKE` pattern matching `search` anywhere, with wildcards escaped.
fn like_pattern(search: &str) -> String {
    let mut pattern = String::with_capacity(search.len() + 2);
    pattern.push('%');
    for ch in search.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

fn parse_user_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id.trim()).map_err(|_| ApiError::bad_request("Invalid user id"))
}

const FILTER_CLAUSE: &str = "WHERE ($1::text IS NULL OR username ILIKE $1 OR email ILIKE $1) \
                             AND ($2::user_role IS NULL OR role = $2::user_role)";

async fn fetch_users(pool: &PgPool, filter: &UserFilter) -> Result<(Vec<UserRecord>, i64)> {
    let query = format!("SELECT COUNT(*) FROM users {FILTER_CLAUSE}");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let total: i64 = sqlx::query_scalar(&query)
        .bind(filter.pattern.as_deref())
        .bind(filter.role.map(Role::as_str))
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to count users")?;

    let query = format!(
        "SELECT {USER_COLUMNS} FROM users {FILTER_CLAUSE} \
         ORDER BY created_at DESC, id LIMIT $3 OFFSET $4"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let rows = sqlx::query(&query)
        .bind(filter.pattern.as_deref())
        .bind(filter.role.map(Role::as_str))
        .bind(filter.limit)
        .bind(filter.offset())
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list users")?;

    let users = rows
        .iter()
        .map(UserRecord::from_row)
        .collect::<Result<Vec<_>>>()?;
    Ok((users, total))
}

async fn delete_user_row(pool: &PgPool, user_id: Uuid) -> Result<bool> {
    let query = "DELETE FROM users WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete user")?;
    Ok(result.rows_affected() == 1)
}

#[utoipa::path(
    get,
    path = "/api/admin/users",
    params(ListUsersQuery),
    responses(
        (status = 200, description = "Page of users, newest first.", body = [UserView]),
        (status = 401, description = "Not authenticated."),
        (status = 403, description = "Requires ADMIN or SUPER_ADMIN."),
        (status = 422, description = "Unknown role filter.")
    ),
    tag = "admin"
)]
pub async fn list_users(
    headers: HeaderMap,
    Query(query): Query<ListUsersQuery>,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> ApiResult<Response> {
    require_role(&headers, &pool, &auth_state, ADMIN_ROLES).await?;
    let filter = parse_filter(query)?;

    let (users, total) = fetch_users(&pool, &filter).await?;
    let users: Vec<UserView> = users.iter().map(UserView::from).collect();

    Ok(success(
        StatusCode::OK,
        json!({
            "users": users,
            "pagination": Pagination::new(filter.page, filter.limit, total),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/admin/users/{id}",
    params(
        ("id" = String, Path, description = "User id")
    ),
    responses(
        (status = 200, description = "User detail.", body = UserView),
        (status = 400, description = "Invalid user id."),
        (status = 401, description = "Not authenticated."),
        (status = 403, description = "Requires ADMIN or SUPER_ADMIN."),
        (status = 404, description = "User not found.")
    ),
    tag = "admin"
)]
pub async fn get_user(
    headers: HeaderMap,
    Path(id): Path<String>,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> ApiResult<Response> {
    require_role(&headers, &pool, &auth_state, ADMIN_ROLES).await?;
    let user_id = parse_user_id(&id)?;

    let user = lookup_user_by_id(&*pool, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(success(
        StatusCode::OK,
        json!({ "user": UserView::from(&user) }),
    ))
}

/// Check what `actor` may change on `target` and normalize the request.
fn authorize_update(
    actor: &Principal,
    target: &UserRecord,
    request: AdminUserUpdateRequest,
) -> Result<UserChanges, ApiError> {
    if !actor.role.can_manage(target.role) {
        return Err(ApiError::forbidden("Admins can only update regular users"));
    }
    if let Some(role) = request.role
        && role != target.role
    {
        if !actor.role.can_assign(role) {
            return Err(ApiError::forbidden("Admins cannot change user roles"));
        }
        if actor.user_id == target.id {
            return Err(ApiError::forbidden("Cannot change your own role"));
        }
    }

    let mut errors = FieldErrors::new();
    let username = request.username.map(|value| normalize_username(&value));
    if let Some(username) = &username {
        check_username(&mut errors, "username", username);
    }
    let email = request.email.map(|value| normalize_email(&value));
    if let Some(email) = &email {
        check_email(&mut errors, "email", email);
    }
    errors.into_result()?;

    let changes = UserChanges {
        username,
        email,
        role: request.role,
    };
    if changes.is_empty() {
        return Err(ApiError::bad_request("No updates provided"));
    }
    Ok(changes)
}

#[utoipa::path(
    patch,
    path = "/api/admin/users/{id}",
    params(
        ("id" = String, Path, description = "User id")
    ),
    request_body = AdminUserUpdateRequest,
    responses(
        (status = 200, description = "User updated.", body = UserView),
        (status = 400, description = "Invalid id or empty update."),
        (status = 401, description = "Not authenticated."),
        (status = 403, description = "Target or role outside the caller's authority."),
        (status = 404, description = "User not found."),
        (status = 409, description = "Username or email already in use."),
        (status = 422, description = "Validation failed.")
    ),
    tag = "admin"
)]
pub async fn patch_user(
    headers: HeaderMap,
    Path(id): Path<String>,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Payload(request): Payload<AdminUserUpdateRequest>,
) -> ApiResult<Response> {
    let actor = require_role(&headers, &pool, &auth_state, ADMIN_ROLES).await?;
    let user_id = parse_user_id(&id)?;

    let target = lookup_user_by_id(&*pool, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    let changes = authorize_update(&actor, &target, request)?;

    if let Some(username) = &changes.username
        && username_taken(&pool, username, Some(target.id)).await?
    {
        return Err(ApiError::conflict("Username already taken"));
    }
    if let Some(email) = &changes.email
        && email_taken(&pool, email, Some(target.id)).await?
    {
        return Err(ApiError::conflict("Email already registered"));
    }

    let user = match update_user(&*pool, target.id, &changes).await? {
        Ok(Some(user)) => user,
        Ok(None) => return Err(ApiError::not_found("User not found")),
        Err(conflict) => return Err(ApiError::conflict(conflict.message())),
    };

    info!(
        actor_id = %actor.user_id,
        user_id = %user.id,
        role = %user.role,
        "User updated by admin"
    );
    Ok(success(
        StatusCode::OK,
        json!({ "user": UserView::from(&user), "message": "User updated successfully" }),
    ))
}

#[utoipa::path(
    delete,
    path = "/api/admin/users/{id}",
    params(
        ("id" = String, Path, description = "User id")
    ),
    responses(
        (status = 200, description = "User deleted."),
        (status = 400, description = "Invalid user id."),
        (status = 401, description = "Not authenticated."),
        (status = 403, description = "Requires SUPER_ADMIN; self-deletion is refused."),
        (status = 404, description = "User not found.")
    ),
    tag = "admin"
)]
pub async fn delete_user(
    headers: HeaderMap,
    Path(id): Path<String>,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> ApiResult<Response> {
    let actor = require_role(&headers, &pool, &auth_state, &[Role::SuperAdmin]).await?;
    let user_id = parse_user_id(&id)?;

    if user_id == actor.user_id {
        return Err(ApiError::forbidden("Cannot delete your own account"));
    }
    if !delete_user_row(&pool, user_id).await? {
        return Err(ApiError::not_found("User not found"));
    }

    info!(actor_id = %actor.user_id, %user_id, "User deleted");
    Ok(message("User deleted successfully"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn query(page: Option<&str>, limit: Option<&str>, search: Option<&str>, role: Option<&str>) -> ListUsersQuery {
        ListUsersQuery {
            page: page.map(ToString::to_string),
            limit: limit.map(ToString::to_string),
            search: search.map(ToString::to_string),
            role: role.map(ToString::to_string),
        }
    }

    fn principal(role: Role) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            username: "actor".to_string(),
            email: "actor@example.com".to_string(),
            role,
            two_factor_enabled: false,
        }
    }

    fn target(role: Role) -> UserRecord {
        UserRecord {
            id: Uuid::new_v4(),
            username: "target".to_string(),
            email: "target@example.com".to_string(),
            password_hash: String::new(),
            role,
            two_factor_enabled: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn update(role: Option<Role>, username: Option<&str>) -> AdminUserUpdateRequest {
        AdminUserUpdateRequest {
            username: username.map(ToString::to_string),
            email: None,
            role,
        }
    }

    #[test]
    fn filter_defaults() {
        let filter = parse_filter(ListUsersQuery::default()).ok();
        assert_eq!(
            filter,
            Some(UserFilter {
                page: 1,
                limit: DEFAULT_PAGE_SIZE,
                pattern: None,
                role: None,
            })
        );
    }

    #[test]
    fn filter_clamps_and_ignores_garbage() {
        let filter = parse_filter(query(Some("0"), Some("500"), Some("  "), Some(""))).ok();
        assert_eq!(filter.as_ref().map(|f| (f.page, f.limit)), Some((1, MAX_PAGE_SIZE)));
        assert!(filter.as_ref().is_some_and(|f| f.pattern.is_none() && f.role.is_none()));

        let filter = parse_filter(query(Some("abc"), Some("-3"), None, None)).ok();
        assert_eq!(filter.map(|f| (f.page, f.limit)), Some((1, 1)));
    }

    #[test]
    fn filter_offset() {
        let filter = parse_filter(query(Some("3"), Some("20"), None, None)).ok();
        assert_eq!(filter.map(|f| f.offset()), Some(40));
    }

    #[test]
    fn huge_page_is_capped_without_overflow() {
        let filter = parse_filter(query(Some("9223372036854775807"), Some("100"), None, None));
        assert!(filter.is_ok());
        if let Ok(filter) = filter {
            assert_eq!(filter.page, MAX_PAGE);
            assert!(filter.offset() >= 0);
            assert_eq!(filter.offset(), (MAX_PAGE - 1) * MAX_PAGE_SIZE);
        }
    }

    #[test]
    fn filter_role() {
        let filter = parse_filter(query(None, None, None, Some("ADMIN"))).ok();
        assert_eq!(filter.and_then(|f| f.role), Some(Role::Admin));
        assert!(matches!(
            parse_filter(query(None, None, None, Some("root"))),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn search_wildcards_are_escaped() {
        assert_eq!(like_pattern("bob"), "%bob%");
        assert_eq!(like_pattern("50%_a\\b"), "%50\\%\\_a\\\\b%");
    }

    #[test]
    fn pagination_rounds_up() {
        assert_eq!(Pagination::new(1, 10, 0).total_pages, 0);
        assert_eq!(Pagination::new(1, 10, 10).total_pages, 1);
        assert_eq!(Pagination::new(2, 10, 11).total_pages, 2);
    }

    #[test]
    fn admin_cannot_touch_admins() {
        let result = authorize_update(&principal(Role::Admin), &target(Role::Admin), update(None, Some("x_y_z")));
        assert!(matches!(result, Err(ApiError::Forbidden(ref m)) if m == "Admins can only update regular users"));
    }

    #[test]
    fn admin_cannot_promote() {
        let result = authorize_update(
            &principal(Role::Admin),
            &target(Role::User),
            update(Some(Role::Admin), None),
        );
        assert!(matches!(result, Err(ApiError::Forbidden(ref m)) if m == "Admins cannot change user roles"));
    }

    #[test]
    fn admin_may_edit_users_and_repeat_their_role() {
        let result = authorize_update(
            &principal(Role::Admin),
            &target(Role::User),
            update(Some(Role::User), Some("New_Name")),
        );
        assert!(result.is_ok_and(|changes| changes.username.as_deref() == Some("new_name")));
    }

    #[test]
    fn super_admin_may_promote() {
        let result = authorize_update(
            &principal(Role::SuperAdmin),
            &target(Role::User),
            update(Some(Role::Admin), None),
        );
        assert!(result.is_ok_and(|changes| changes.role == Some(Role::Admin)));
    }

    #[test]
    fn super_admin_cannot_demote_self() {
        let actor = principal(Role::SuperAdmin);
        let mut me = target(Role::SuperAdmin);
        me.id = actor.user_id;
        let result = authorize_update(&actor, &me, update(Some(Role::User), None));
        assert!(matches!(result, Err(ApiError::Forbidden(_))));
    }

    #[test]
    fn empty_update_is_rejected() {
        let result = authorize_update(&principal(Role::SuperAdmin), &target(Role::User), update(None, None));
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }
}
