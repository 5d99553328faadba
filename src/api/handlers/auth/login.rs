//! Password login.
//!
//! Flow Overview:
//! 1) Validate the body and check that password login is enabled.
//! 2) Look the user up by email or username (both stored lowercase).
//! 3) Verify the Argon2 hash; unknown users pay for a dummy verify so timing
//!    does not reveal which accounts exist.
//! 4) Enrolled 2FA users get a challenge cookie; everyone else gets a session.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

use super::{
    AuthState,
    mfa::challenge_cookies,
    password::{verify_dummy, verify_password},
    session::issue_session,
    storage::lookup_user_by_login,
    types::{AuthResponse, LoginRequest, TwoFactorChallengeResponse, UserView},
    utils::extract_client_ip,
};
use crate::api::{
    error::{ApiError, ApiResult, FieldErrors, success},
    extract::Payload,
    handlers::admin::settings::load_auth_settings,
};

const INVALID_CREDENTIALS: &str = "Invalid email/username or password";

fn validate(request: &LoginRequest) -> Result<String, ApiError> {
    let identifier = request.email_or_username.trim().to_lowercase();
    let mut errors = FieldErrors::new();
    if identifier.is_empty() {
        errors.add("emailOrUsername", "Email or username is required");
    }
    if request.password.is_empty() {
        errors.add("password", "Password is required");
    }
    errors.into_result()?;
    Ok(identifier)
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session cookies set, or a second factor is required.", body = AuthResponse),
        (status = 401, description = "Invalid credentials."),
        (status = 403, description = "Password login is disabled."),
        (status = 422, description = "Missing fields.")
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Payload(request): Payload<LoginRequest>,
) -> ApiResult<Response> {
    let identifier = validate(&request)?;

    let settings = load_auth_settings(&pool).await?;
    if !settings.allow_password_auth {
        return Err(ApiError::forbidden("Password authentication is disabled"));
    }

    let client_ip = extract_client_ip(&headers);
    let client_ip = client_ip.as_deref().unwrap_or("unknown");

    let Some(user) = lookup_user_by_login(&pool, &identifier).await? else {
        verify_dummy(&request.password);
        warn!(client_ip, "Login failed: unknown account");
        return Err(ApiError::unauthorized(INVALID_CREDENTIALS));
    };

    if !verify_password(&request.password, &user.password_hash) {
        warn!(user_id = %user.id, client_ip, "Login failed: wrong password");
        return Err(ApiError::unauthorized(INVALID_CREDENTIALS));
    }

    if user.two_factor_enabled {
        let cookies = challenge_cookies(&auth_state, &user)?;
        info!(user_id = %user.id, "Password accepted; awaiting second factor");
        let body = TwoFactorChallengeResponse {
            requires_two_factor: true,
            message: "Two-factor authentication required".to_string(),
        };
        return Ok((cookies, success(StatusCode::OK, body)).into_response());
    }

    let cookies = issue_session(&pool, &auth_state, &user).await?;
    info!(user_id = %user.id, role = %user.role, "Login successful");

    let body = AuthResponse {
        user: UserView::from(&user),
        message: "Login successful".to_string(),
        two_factor_setup_required: settings.two_factor_required,
    };
    Ok((cookies, success(StatusCode::OK, body)).into_response())
}
