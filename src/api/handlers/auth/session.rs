//! Session lifecycle: issuing, rotating, and revoking cookie sessions.

use anyhow::Context;
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{
    cookies::{
        ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME, TWO_FACTOR_COOKIE_NAME, append_cookie,
        build_cookie, clear_cookie, read_cookie,
    },
    principal::require_auth,
    state::AuthState,
    storage::{
        RefreshLookup, UserRecord, consume_refresh_token, delete_expired_refresh_tokens,
        delete_refresh_token, delete_user_refresh_tokens, insert_refresh_token,
        lookup_user_by_id,
    },
    types::{AuthResponse, MessageResponse, UserView},
    utils::hash_token,
};
use crate::api::error::{ApiError, ApiResult, success};

const INVALID_REFRESH: &str = "Invalid or expired refresh token";

/// Mint an access/refresh pair for `user`, persist the refresh hash, and return
/// the `Set-Cookie` headers.
pub(crate) async fn issue_session(
    pool: &PgPool,
    auth_state: &AuthState,
    user: &UserRecord,
) -> ApiResult<HeaderMap> {
    if let Err(err) = delete_expired_refresh_tokens(pool, user.id).await {
        warn!("Failed to purge expired refresh tokens: {err:#}");
    }

    let tokens = auth_state.tokens();
    let access = tokens
        .issue_access(user.id, user.role)
        .context("failed to issue access token")?;
    let refresh = tokens
        .issue_refresh(user.id, user.role)
        .context("failed to issue refresh token")?;

    insert_refresh_token(
        pool,
        user.id,
        &hash_token(&refresh.token),
        refresh.claims.expires_at(),
    )
    .await?;

    Ok(session_cookies(auth_state, &access.token, &refresh.token))
}

fn session_cookies(auth_state: &AuthState, access: &str, refresh: &str) -> HeaderMap {
    let config = auth_state.config();
    let ttls = auth_state.tokens().ttls();
    let mut headers = HeaderMap::new();
    append_cookie(
        &mut headers,
        build_cookie(config, ACCESS_COOKIE_NAME, access, ttls.access),
    );
    append_cookie(
        &mut headers,
        build_cookie(config, REFRESH_COOKIE_NAME, refresh, ttls.refresh),
    );
    // A finished login never leaves a pending second-factor cookie behind.
    append_cookie(
        &mut headers,
        clear_cookie(config, TWO_FACTOR_COOKIE_NAME),
    );
    headers
}

/// `Set-Cookie` headers removing every auth cookie.
pub(crate) fn cleared_cookies(auth_state: &AuthState) -> HeaderMap {
    let config = auth_state.config();
    let mut headers = HeaderMap::new();
    for name in [
        ACCESS_COOKIE_NAME,
        REFRESH_COOKIE_NAME,
        TWO_FACTOR_COOKIE_NAME,
    ] {
        append_cookie(&mut headers, clear_cookie(config, name));
    }
    headers
}

/// Exchange a refresh token for a new pair. The presented token is consumed.
///
/// A correctly signed token with no stored row has already been used (or revoked);
/// every refresh token of that user is revoked in response.
pub(crate) async fn rotate_session(
    pool: &PgPool,
    auth_state: &AuthState,
    refresh_token: &str,
) -> ApiResult<(UserRecord, HeaderMap)> {
    let claims = auth_state
        .tokens()
        .verify_refresh(refresh_token)
        .map_err(|err| {
            debug!("Rejected refresh token: {err}");
            ApiError::unauthorized(INVALID_REFRESH)
        })?;

    let mut tx = pool.begin().await.context("begin refresh transaction")?;

    let user_id = match consume_refresh_token(&mut tx, &hash_token(refresh_token)).await? {
        RefreshLookup::Active(user_id) if user_id == claims.sub => user_id,
        RefreshLookup::Active(_) | RefreshLookup::Expired => {
            tx.commit().await.context("commit refresh transaction")?;
            return Err(ApiError::unauthorized(INVALID_REFRESH));
        }
        RefreshLookup::Missing => {
            let revoked = delete_user_refresh_tokens(&mut *tx, claims.sub).await?;
            tx.commit().await.context("commit refresh transaction")?;
            warn!(
                user_id = %claims.sub,
                revoked,
                "Refresh token reuse detected; revoked all sessions"
            );
            return Err(ApiError::unauthorized(INVALID_REFRESH));
        }
    };

    // Role comes from the database so promotions and demotions apply on refresh.
    let Some(user) = lookup_user_by_id(&mut *tx, user_id).await? else {
        tx.commit().await.context("commit refresh transaction")?;
        return Err(ApiError::unauthorized("User not found"));
    };

    let tokens = auth_state.tokens();
    let access = tokens
        .issue_access(user.id, user.role)
        .context("failed to issue access token")?;
    let refresh = tokens
        .issue_refresh(user.id, user.role)
        .context("failed to issue refresh token")?;
    insert_refresh_token(
        &mut *tx,
        user.id,
        &hash_token(&refresh.token),
        refresh.claims.expires_at(),
    )
    .await?;

    tx.commit().await.context("commit refresh transaction")?;

    let headers = session_cookies(auth_state, &access.token, &refresh.token);
    Ok((user, headers))
}

#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    responses(
        (status = 200, description = "Tokens rotated; new cookies set.", body = AuthResponse),
        (status = 401, description = "Missing, expired, reused, or invalid refresh token.")
    ),
    tag = "auth"
)]
pub async fn refresh(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    let Some(token) = read_cookie(&headers, REFRESH_COOKIE_NAME) else {
        return ApiError::unauthorized("Refresh token not found").into_response();
    };

    match rotate_session(&pool, &auth_state, &token).await {
        Ok((user, cookies)) => {
            debug!(user_id = %user.id, "Session refreshed");
            let body = AuthResponse {
                user: UserView::from(&user),
                message: "Token refreshed successfully".to_string(),
                two_factor_setup_required: false,
            };
            (cookies, success(StatusCode::OK, body)).into_response()
        }
        Err(err) => {
            // Drop the dead cookies so the client stops retrying with them.
            let cookies = if err.status() == StatusCode::UNAUTHORIZED {
                cleared_cookies(&auth_state)
            } else {
                HeaderMap::new()
            };
            (cookies, err).into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Refresh token revoked and cookies cleared.", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    if let Some(token) = read_cookie(&headers, REFRESH_COOKIE_NAME) {
        if let Err(err) = delete_refresh_token(&pool, &hash_token(&token)).await {
            error!("Failed to delete refresh token: {err:#}");
        } else {
            info!("Session logged out");
        }
    }

    // Always clear the cookies, even if the token record was missing.
    (
        cleared_cookies(&auth_state),
        success(
            StatusCode::OK,
            json!({ "message": "Logged out successfully" }),
        ),
    )
        .into_response()
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Current user.", body = UserView),
        (status = 401, description = "Missing or invalid access token.")
    ),
    tag = "auth"
)]
pub async fn me(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> ApiResult<Response> {
    let principal = require_auth(&headers, &pool, &auth_state).await?;
    let user = lookup_user_by_id(&*pool, principal.user_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("User not found"))?;
    Ok(success(
        StatusCode::OK,
        json!({ "user": UserView::from(&user) }),
    ))
}
