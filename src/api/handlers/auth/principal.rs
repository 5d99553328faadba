//! Authenticated principal extraction and authorization helpers.
//!
//! Flow Overview: read the access token (cookie or bearer), verify it, and load
//! the user fresh from the database so deleted accounts and role changes take
//! effect before the token expires.

use axum::http::HeaderMap;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::{
    cookies::extract_access_token,
    role::Role,
    state::AuthState,
    storage::{UserRecord, lookup_user_by_id},
    tokens::TokenError,
};
use crate::api::error::ApiError;

/// Authenticated user context derived from the access token.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub two_factor_enabled: bool,
}

impl From<UserRecord> for Principal {
    fn from(user: UserRecord) -> Self {
        Self {
            user_id: user.id,
            username: user.username,
            email: user.email,
            role: user.role,
            two_factor_enabled: user.two_factor_enabled,
        }
    }
}

impl Principal {
    /// # Errors
    /// Returns 403 when the principal's role is not in `allowed`.
    pub fn require_role(&self, allowed: &[Role]) -> Result<(), ApiError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(ApiError::forbidden("Insufficient permissions"))
        }
    }
}

/// Resolve the access token into a principal, or return 401.
///
/// # Errors
/// Returns 401 for missing, expired, or invalid tokens and for deleted users.
pub async fn require_auth(
    headers: &HeaderMap,
    pool: &PgPool,
    auth_state: &AuthState,
) -> Result<Principal, ApiError> {
    let Some(token) = extract_access_token(headers) else {
        return Err(ApiError::unauthorized("Authentication required"));
    };

    let claims = auth_state.tokens().verify_access(&token).map_err(|err| {
        debug!("Rejected access token: {err}");
        match err {
            TokenError::Expired => ApiError::unauthorized("Access token expired"),
            _ => ApiError::unauthorized("Invalid access token"),
        }
    })?;

    match lookup_user_by_id(pool, claims.sub).await? {
        Some(user) => Ok(Principal::from(user)),
        None => Err(ApiError::unauthorized("User not found")),
    }
}

/// Authenticate and require one of `allowed`.
///
/// # Errors
/// Returns 401 when unauthenticated and 403 when the role is not allowed.
pub async fn require_role(
    headers: &HeaderMap,
    pool: &PgPool,
    auth_state: &AuthState,
    allowed: &[Role],
) -> Result<Principal, ApiError> {
    let principal = require_auth(headers, pool, auth_state).await?;
    principal.require_role(allowed)?;
    Ok(principal)
}
