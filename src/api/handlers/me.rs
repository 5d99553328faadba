//! Authenticated self-service endpoints.
//!
//! Flow Overview:
//! 1) Authenticate via the access token.
//! 2) Resolve the current user from the database.
//! 3) Apply allow-listed profile updates or a password change.

use anyhow::Context;
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

use super::auth::{
    AuthState,
    password::{hash_password, password_policy_violations, verify_password},
    principal::require_auth,
    session::issue_session,
    storage::{
        UserChanges, delete_user_refresh_tokens, email_taken, lookup_user_by_id,
        update_password_hash, update_user, username_taken,
    },
    types::UserView,
    utils::{check_email, check_username, normalize_email, normalize_username},
};
use crate::api::{
    error::{ApiError, ApiResult, FieldErrors, message, success},
    extract::Payload,
};

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileUpdateRequest {
    pub username: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct PasswordChangeRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_new_password: String,
}

#[utoipa::path(
    get,
    path = "/api/users/me",
    responses(
        (status = 200, description = "Return the authenticated user profile.", body = UserView),
        (status = 401, description = "Missing or invalid access token.")
    ),
    tag = "me"
)]
pub async fn get_me(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> ApiResult<Response> {
    let principal = require_auth(&headers, &pool, &auth_state).await?;
    let user = lookup_user_by_id(&*pool, principal.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(success(
        StatusCode::OK,
        json!({ "user": UserView::from(&user) }),
    ))
}

fn profile_changes(request: ProfileUpdateRequest) -> Result<UserChanges, ApiError> {
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
        role: None,
    };
    if changes.is_empty() {
        return Err(ApiError::bad_request("No updates provided"));
    }
    Ok(changes)
}

#[utoipa::path(
    patch,
    path = "/api/users/me",
    request_body = ProfileUpdateRequest,
    responses(
        (status = 200, description = "Profile updated.", body = UserView),
        (status = 400, description = "No updates provided."),
        (status = 401, description = "Missing or invalid access token."),
        (status = 409, description = "Username or email already in use."),
        (status = 422, description = "Validation failed.")
    ),
    tag = "me"
)]
pub async fn patch_me(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Payload(request): Payload<ProfileUpdateRequest>,
) -> ApiResult<Response> {
    let principal = require_auth(&headers, &pool, &auth_state).await?;
    let changes = profile_changes(request)?;

    if let Some(username) = &changes.username
        && username_taken(&pool, username, Some(principal.user_id)).await?
    {
        return Err(ApiError::conflict("Username already taken"));
    }
    if let Some(email) = &changes.email
        && email_taken(&pool, email, Some(principal.user_id)).await?
    {
        return Err(ApiError::conflict("Email already registered"));
    }

    let user = match update_user(&*pool, principal.user_id, &changes).await? {
        Ok(Some(user)) => user,
        Ok(None) => return Err(ApiError::not_found("User not found")),
        Err(conflict) => return Err(ApiError::conflict(conflict.message())),
    };

    info!(user_id = %user.id, "Profile updated");
    Ok(success(
        StatusCode::OK,
        json!({ "user": UserView::from(&user), "message": "Profile updated successfully" }),
    ))
}

fn validate_password_change(request: &PasswordChangeRequest) -> Result<(), ApiError> {
    let mut errors = FieldErrors::new();

    if request.current_password.is_empty() {
        errors.add("currentPassword", "Current password is required");
    }
    if request.new_password.is_empty() {
        errors.add("newPassword", "New password is required");
    } else {
        for violation in password_policy_violations(&request.new_password) {
            errors.add("newPassword", violation);
        }
        if request.new_password == request.current_password {
            errors.add(
                "newPassword",
                "New password must be different from current password",
            );
        }
    }
    if request.confirm_new_password != request.new_password {
        errors.add("confirmNewPassword", "Passwords do not match");
    }

    errors.into_result()
}

#[utoipa::path(
    patch,
    path = "/api/users/me/password",
    request_body = PasswordChangeRequest,
    responses(
        (status = 200, description = "Password changed; other sessions revoked."),
        (status = 401, description = "Not authenticated or wrong current password."),
        (status = 422, description = "Validation failed.")
    ),
    tag = "me"
)]
pub async fn change_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Payload(request): Payload<PasswordChangeRequest>,
) -> ApiResult<Response> {
    let principal = require_auth(&headers, &pool, &auth_state).await?;
    validate_password_change(&request)?;

    let user = lookup_user_by_id(&*pool, principal.user_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("User not found"))?;
    if !verify_password(&request.current_password, &user.password_hash) {
        return Err(ApiError::unauthorized("Current password is incorrect"));
    }

    let password_hash = hash_password(&request.new_password)?;

    let mut tx = pool.begin().await.context("begin password transaction")?;
    update_password_hash(&mut *tx, user.id, &password_hash).await?;
    let revoked = delete_user_refresh_tokens(&mut *tx, user.id).await?;
    tx.commit().await.context("commit password transaction")?;

    info!(user_id = %user.id, revoked, "Password changed; sessions revoked");

    // Every other session is gone; keep this one signed in with a fresh pair.
    let cookies = issue_session(&pool, &auth_state, &user).await?;
    Ok((cookies, message("Password changed successfully")).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn password_request(current: &str, new: &str, confirm: &str) -> PasswordChangeRequest {
        PasswordChangeRequest {
            current_password: current.to_string(),
            new_password: new.to_string(),
            confirm_new_password: confirm.to_string(),
        }
    }

    fn field_errors(result: Result<(), ApiError>) -> FieldErrors {
        match result {
            Err(ApiError::Validation(errors)) => errors,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn empty_profile_update_is_rejected() {
        let result = profile_changes(ProfileUpdateRequest::default());
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn profile_update_is_normalized() {
        let changes = profile_changes(ProfileUpdateRequest {
            username: Some(" Bob ".to_string()),
            email: None,
        });
        assert!(changes.is_ok_and(|changes| changes.username.as_deref() == Some("bob")
            && changes.email.is_none()
            && changes.role.is_none()));
    }

    #[test]
    fn profile_update_validates_given_fields() {
        let result = profile_changes(ProfileUpdateRequest {
            username: None,
            email: Some("nope".to_string()),
        });
        let errors = match result {
            Err(ApiError::Validation(errors)) => errors,
            other => panic!("expected validation error, got {other:?}"),
        };
        assert!(errors.get("email").is_some());
        assert!(errors.get("username").is_none());
    }

    #[test]
    fn password_change_rules() {
        assert!(validate_password_change(&password_request("Old$ecret1", "N3w$ecret", "N3w$ecret")).is_ok());

        let errors = field_errors(validate_password_change(&password_request(
            "",
            "N3w$ecret",
            "N3w$ecret",
        )));
        assert!(errors.get("currentPassword").is_some());

        let errors = field_errors(validate_password_change(&password_request(
            "Same$ecret1",
            "Same$ecret1",
            "Same$ecret1",
        )));
        assert_eq!(
            errors.get("newPassword"),
            Some(&["New password must be different from current password".to_string()][..])
        );

        let errors = field_errors(validate_password_change(&password_request(
            "Old$ecret1",
            "N3w$ecret",
            "N3w$ecreT",
        )));
        assert!(errors.get("confirmNewPassword").is_some());
    }
}
