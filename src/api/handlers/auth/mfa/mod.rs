//! TOTP two-factor authentication.
//!
//! Flow Overview:
//! 1) `setup` stores a pending secret and returns it with a QR code.
//! 2) `enable` proves the app works with a code for the pending secret, promotes
//!    it, and hands out backup codes once.
//! 3) Login for an enrolled user only sets the `two_factor_token` cookie.
//!    `verify-2fa` exchanges it plus a TOTP or backup code for a real session.
//! 4) `disable` requires the account password and removes every 2FA artifact.

pub(crate) mod backup;
pub(crate) mod storage;
pub(crate) mod totp;

use anyhow::Context;
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use self::{
    backup::{BackupCodeSet, verify_backup_code},
    storage::{
        activate_two_factor, deactivate_two_factor, load_two_factor, load_unused_backup_codes,
        mark_backup_code_used, store_pending_secret,
    },
    totp::{enrollment, format_secret_for_display, generate_secret, is_totp_format, verify_code},
};
use super::{
    AuthState,
    cookies::{TWO_FACTOR_COOKIE_NAME, append_cookie, build_cookie, read_cookie},
    password::verify_password,
    principal::require_auth,
    session::issue_session,
    storage::{UserRecord, lookup_user_by_id},
    types::{
        AuthResponse, TwoFactorDisableRequest, TwoFactorEnableRequest, TwoFactorEnabledResponse,
        TwoFactorSetupResponse, UserView, VerifyTwoFactorRequest,
    },
    utils::extract_client_ip,
};
use crate::api::{
    error::{ApiError, ApiResult, message, success},
    extract::Payload,
};

const ALREADY_ENABLED: &str = "Two-factor authentication is already enabled";
const NOT_ENABLED: &str = "Two-factor authentication is not enabled";
const CHALLENGE_EXPIRED: &str = "Two-factor session expired. Please log in again.";

#[utoipa::path(
    post,
    path = "/api/users/me/2fa/setup",
    responses(
        (status = 200, description = "Pending secret created.", body = TwoFactorSetupResponse),
        (status = 401, description = "Not authenticated."),
        (status = 409, description = "2FA already enabled.")
    ),
    tag = "two-factor"
)]
pub async fn setup(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> ApiResult<Response> {
    let principal = require_auth(&headers, &pool, &auth_state).await?;
    if principal.two_factor_enabled {
        return Err(ApiError::conflict(ALREADY_ENABLED));
    }

    let secret = generate_secret()?;
    if !store_pending_secret(&pool, principal.user_id, &secret).await? {
        return Err(ApiError::conflict(ALREADY_ENABLED));
    }

    let enrollment = enrollment(&secret, auth_state.config().app_name(), &principal.email)?;
    debug!(user_id = %principal.user_id, "2FA setup started");

    Ok(success(
        StatusCode::OK,
        TwoFactorSetupResponse {
            formatted_secret: format_secret_for_display(&enrollment.secret),
            secret: enrollment.secret,
            qr_code: enrollment.qr_code,
            otpauth_url: enrollment.otpauth_url,
            message: "Scan the QR code with your authenticator app".to_string(),
        },
    ))
}

#[utoipa::path(
    post,
    path = "/api/users/me/2fa/enable",
    request_body = TwoFactorEnableRequest,
    responses(
        (status = 200, description = "2FA enabled; backup codes returned once.", body = TwoFactorEnabledResponse),
        (status = 400, description = "Wrong code or setup not started."),
        (status = 401, description = "Not authenticated."),
        (status = 409, description = "2FA already enabled."),
        (status = 422, description = "Code is not 6 digits.")
    ),
    tag = "two-factor"
)]
pub async fn enable(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Payload(request): Payload<TwoFactorEnableRequest>,
) -> ApiResult<Response> {
    let principal = require_auth(&headers, &pool, &auth_state).await?;
    if principal.two_factor_enabled {
        return Err(ApiError::conflict(ALREADY_ENABLED));
    }

    let token = request.token.trim();
    if !is_totp_format(token) {
        return Err(ApiError::invalid("token", "TOTP code must be 6 digits"));
    }

    let pending = load_two_factor(&*pool, principal.user_id)
        .await?
        .and_then(|record| record.pending_secret)
        .ok_or_else(|| ApiError::bad_request("Two-factor setup has not been started"))?;

    if !verify_code(&pending, token)? {
        return Err(ApiError::bad_request("Invalid verification code"));
    }

    let codes = BackupCodeSet::generate()?;
    if !activate_two_factor(&pool, principal.user_id, &pending, &codes.code_hashes).await? {
        return Err(ApiError::conflict(ALREADY_ENABLED));
    }

    info!(user_id = %principal.user_id, "2FA enabled");
    Ok(success(
        StatusCode::OK,
        TwoFactorEnabledResponse {
            backup_codes: codes.codes,
            message: "Two-factor authentication enabled".to_string(),
        },
    ))
}

#[utoipa::path(
    post,
    path = "/api/users/me/2fa/disable",
    request_body = TwoFactorDisableRequest,
    responses(
        (status = 200, description = "2FA disabled."),
        (status = 400, description = "Incorrect password or 2FA not enabled."),
        (status = 401, description = "Not authenticated."),
        (status = 422, description = "Password missing.")
    ),
    tag = "two-factor"
)]
pub async fn disable(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Payload(request): Payload<TwoFactorDisableRequest>,
) -> ApiResult<Response> {
    let principal = require_auth(&headers, &pool, &auth_state).await?;
    if request.password.is_empty() {
        return Err(ApiError::invalid("password", "Password is required"));
    }
    if !principal.two_factor_enabled {
        return Err(ApiError::bad_request(NOT_ENABLED));
    }

    let user = lookup_user_by_id(&*pool, principal.user_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("User not found"))?;
    if !verify_password(&request.password, &user.password_hash) {
        return Err(ApiError::bad_request("Incorrect password"));
    }

    deactivate_two_factor(&pool, principal.user_id).await?;
    info!(user_id = %principal.user_id, "2FA disabled");
    Ok(message("Two-factor authentication disabled"))
}

/// Check a backup code against the unused set and consume the match.
async fn consume_backup_code(pool: &PgPool, user_id: Uuid, code: &str) -> ApiResult<bool> {
    let codes = load_unused_backup_codes(pool, user_id).await?;
    let matched = codes
        .into_iter()
        .find(|(_, hash)| verify_backup_code(code, hash));
    match matched {
        Some((code_id, _)) => Ok(mark_backup_code_used(pool, code_id).await?),
        None => Ok(false),
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/verify-2fa",
    request_body = VerifyTwoFactorRequest,
    responses(
        (status = 200, description = "Second factor accepted; session cookies set.", body = AuthResponse),
        (status = 400, description = "Wrong code."),
        (status = 401, description = "Missing or expired two-factor session."),
        (status = 422, description = "Code missing or too short.")
    ),
    tag = "auth"
)]
pub async fn verify_two_factor(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Payload(request): Payload<VerifyTwoFactorRequest>,
) -> ApiResult<Response> {
    let code = request.code.trim();
    if code.len() < 6 {
        return Err(ApiError::invalid(
            "code",
            "Verification code must be at least 6 characters",
        ));
    }

    let token = read_cookie(&headers, TWO_FACTOR_COOKIE_NAME)
        .ok_or_else(|| ApiError::unauthorized(CHALLENGE_EXPIRED))?;
    let claims = auth_state
        .tokens()
        .verify_two_factor(&token)
        .map_err(|err| {
            debug!("Rejected two-factor token: {err}");
            ApiError::unauthorized(CHALLENGE_EXPIRED)
        })?;

    let user = lookup_user_by_id(&*pool, claims.sub)
        .await?
        .ok_or_else(|| ApiError::unauthorized(CHALLENGE_EXPIRED))?;
    let secret = load_two_factor(&*pool, user.id)
        .await?
        .filter(|record| record.enabled)
        .and_then(|record| record.secret)
        .ok_or_else(|| ApiError::unauthorized(NOT_ENABLED))?;

    let accepted = if request.is_backup_code {
        consume_backup_code(&pool, user.id, code).await?
    } else {
        verify_code(&secret, code)?
    };

    if !accepted {
        warn!(
            user_id = %user.id,
            backup_code = request.is_backup_code,
            client_ip = extract_client_ip(&headers).as_deref().unwrap_or("unknown"),
            "Second factor rejected"
        );
        let reason = if request.is_backup_code {
            "Invalid backup code. Please try again."
        } else {
            "Invalid verification code. Please try again."
        };
        return Err(ApiError::bad_request(reason));
    }

    let cookies = issue_session(&pool, &auth_state, &user).await?;
    info!(user_id = %user.id, backup_code = request.is_backup_code, "Login completed with 2FA");

    let body = AuthResponse {
        user: UserView::from(&user),
        message: "Login successful".to_string(),
        two_factor_setup_required: false,
    };
    Ok((cookies, success(StatusCode::OK, body)).into_response())
}

/// Start a partial session: only the `two_factor_token` cookie is set.
pub(crate) fn challenge_cookies(auth_state: &AuthState, user: &UserRecord) -> ApiResult<HeaderMap> {
    let challenge = auth_state
        .tokens()
        .issue_two_factor(user.id, user.role)
        .context("failed to issue two-factor token")?;
    let mut headers = HeaderMap::new();
    append_cookie(
        &mut headers,
        build_cookie(
            auth_state.config(),
            TWO_FACTOR_COOKIE_NAME,
            &challenge.token,
            auth_state.tokens().ttls().two_factor,
        ),
    );
    Ok(headers)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::{
        AuthConfig,
        role::Role,
        tokens::{TokenIssuer, TokenTtls},
    };
    use axum::http::header::SET_COOKIE;
    use chrono::Utc;
    use secrecy::SecretString;

    fn auth_state() -> AuthState {
        let tokens = TokenIssuer::new(
            &SecretString::from("access-secret-access-secret-access-secret"),
            &SecretString::from("refresh-secret-refresh-secret-refresh-secret"),
            TokenTtls::default(),
        )
        .unwrap();
        AuthState::new(
            AuthConfig::new("https://app.example.com".to_string()),
            tokens,
        )
    }

    fn user() -> UserRecord {
        UserRecord {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: String::new(),
            role: Role::Admin,
            two_factor_enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn challenge_sets_only_the_two_factor_cookie() {
        let state = auth_state();
        let user = user();
        let headers = challenge_cookies(&state, &user).unwrap();
        let cookies: Vec<_> = headers.get_all(SET_COOKIE).iter().collect();
        assert_eq!(cookies.len(), 1);

        let cookie = cookies[0].to_str().unwrap();
        assert!(cookie.starts_with("two_factor_token="));
        assert!(cookie.contains("Max-Age=300"));
        assert!(cookie.contains("Secure"));

        let token = cookie
            .trim_start_matches("two_factor_token=")
            .split(';')
            .next()
            .unwrap();
        let claims = state.tokens().verify_two_factor(token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.role, Role::Admin);
        // A challenge token is not an access token.
        assert!(state.tokens().verify_access(token).is_err());
    }
}
