//! Account registration.
//!
//! Open registration can be switched off in the auth settings; an unused,
//! unexpired invite for the same email is then required. The invite decides the
//! new account's role and is consumed in the same transaction as the insert.

use anyhow::Context;
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::api::{
    error::{ApiError, ApiResult, FieldErrors, success},
    extract::Payload,
    handlers::{
        admin::settings::load_auth_settings,
        auth::{
            AuthState, Role,
            password::{hash_password, password_policy_violations},
            session::issue_session,
            storage::{
                email_taken, insert_user, lock_pending_invite, mark_invite_used, username_taken,
            },
            types::{AuthResponse, RegisterRequest, UserView},
            utils::{check_email, check_username, extract_client_ip, normalize_email, normalize_username},
        },
    },
};

const INVALID_INVITE: &str = "Invalid or expired invitation";

/// Normalized registration input.
#[derive(Debug)]
struct NewAccount {
    username: String,
    email: String,
    invite_token: Option<String>,
}

fn validate(request: &RegisterRequest) -> Result<NewAccount, ApiError> {
    let mut errors = FieldErrors::new();

    let username = normalize_username(&request.username);
    check_username(&mut errors, "username", &username);

    let email = normalize_email(&request.email);
    check_email(&mut errors, "email", &email);

    if request.password.is_empty() {
        errors.add("password", "Password is required");
    } else {
        for violation in password_policy_violations(&request.password) {
            errors.add("password", violation);
        }
    }

    if request.confirm_password.is_empty() {
        errors.add("confirmPassword", "Please confirm your password");
    } else if request.confirm_password != request.password {
        errors.add("confirmPassword", "Passwords do not match");
    }

    errors.into_result()?;

    let invite_token = request
        .invite_token
        .as_deref()
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(ToString::to_string);

    Ok(NewAccount {
        username,
        email,
        invite_token,
    })
}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created; session cookies set.", body = AuthResponse),
        (status = 403, description = "Registration requires a valid invitation."),
        (status = 409, description = "Username or email already in use."),
        (status = 422, description = "Validation failed.")
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn register(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Payload(request): Payload<RegisterRequest>,
) -> ApiResult<Response> {
    let account = validate(&request)?;

    let settings = load_auth_settings(&pool).await?;
    if !settings.allow_self_registration && account.invite_token.is_none() {
        return Err(ApiError::forbidden(
            "Registration is currently by invitation only",
        ));
    }

    // Friendly pre-checks; the unique constraints settle races below.
    if username_taken(&pool, &account.username, None).await? {
        return Err(ApiError::conflict("Username already taken"));
    }
    if email_taken(&pool, &account.email, None).await? {
        return Err(ApiError::conflict("Email already registered"));
    }

    let password_hash = hash_password(&request.password)?;

    let mut tx = pool.begin().await.context("begin registration transaction")?;

    let invite = match account.invite_token.as_deref() {
        Some(token) => {
            let Some(invite) = lock_pending_invite(&mut tx, token).await? else {
                warn!(
                    client_ip = extract_client_ip(&headers).as_deref().unwrap_or("unknown"),
                    "Registration with unusable invite"
                );
                return Err(ApiError::forbidden(INVALID_INVITE));
            };
            if invite.email != account.email {
                return Err(ApiError::forbidden(
                    "This invitation was issued for a different email address",
                ));
            }
            Some(invite)
        }
        None => None,
    };

    let role = invite.as_ref().map_or(Role::User, |invite| invite.role);
    let user = match insert_user(
        &mut tx,
        &account.username,
        &account.email,
        &password_hash,
        role,
    )
    .await?
    {
        Ok(user) => user,
        Err(conflict) => return Err(ApiError::conflict(conflict.message())),
    };

    if let Some(invite) = &invite {
        mark_invite_used(&mut tx, invite.id).await?;
    }

    tx.commit().await.context("commit registration transaction")?;

    info!(user_id = %user.id, %role, invited = invite.is_some(), "User registered");

    let cookies = issue_session(&pool, &auth_state, &user).await?;
    let body = AuthResponse {
        user: UserView::from(&user),
        message: "Registration successful".to_string(),
        two_factor_setup_required: settings.two_factor_required,
    };
    Ok((cookies, success(StatusCode::CREATED, body)).into_response())
}
