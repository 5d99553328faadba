//! Database helpers for users, refresh tokens, and invite redemption.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool, Postgres, Row, Transaction, postgres::PgRow};
use tracing::Instrument;
use uuid::Uuid;

use super::role::Role;
use super::utils::unique_violation_constraint;

pub(crate) const USER_COLUMNS: &str = "id, username, email, password_hash, role::text AS role, \
     two_factor_enabled, created_at, updated_at";

/// A row of `users` without the 2FA secrets.
#[derive(Debug, Clone)]
pub(crate) struct UserRecord {
    pub(crate) id: Uuid,
    pub(crate) username: String,
    pub(crate) email: String,
    pub(crate) password_hash: String,
    pub(crate) role: Role,
    pub(crate) two_factor_enabled: bool,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl UserRecord {
    pub(crate) fn from_row(row: &PgRow) -> Result<Self> {
        let role: String = row.try_get("role").context("missing role column")?;
        Ok(Self {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            role: role.parse().map_err(|err: String| anyhow!(err))?,
            two_factor_enabled: row.try_get("two_factor_enabled")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Which unique column an insert or update collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UserConflict {
    Username,
    Email,
}

impl UserConflict {
    pub(crate) fn from_sqlx(err: &sqlx::Error) -> Option<Self> {
        let constraint = unique_violation_constraint(err)?;
        if constraint.contains("username") {
            Some(Self::Username)
        } else if constraint.contains("email") {
            Some(Self::Email)
        } else {
            None
        }
    }

    pub(crate) fn message(self) -> &'static str {
        match self {
            Self::Username => "Username already taken",
            Self::Email => "Email already registered",
        }
    }
}

/// State of a presented refresh token after the consume attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefreshLookup {
    Active(Uuid),
    Expired,
    Missing,
}

/// A pending invite as seen by registration.
#[derive(Debug, Clone)]
pub(crate) struct InviteRecord {
    pub(crate) id: Uuid,
    pub(crate) email: String,
    pub(crate) role: Role,
}

/// Look up a user by lowercase email or username (login).
pub(crate) async fn lookup_user_by_login(
    pool: &PgPool,
    identifier: &str,
) -> Result<Option<UserRecord>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1 OR username = $1 LIMIT 1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(identifier)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by login")?;

    row.as_ref().map(UserRecord::from_row).transpose()
}

pub(crate) async fn lookup_user_by_id<'e, E>(executor: E, user_id: Uuid) -> Result<Option<UserRecord>>
where
    E: PgExecutor<'e>,
{
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .fetch_optional(executor)
        .instrument(span)
        .await
        .context("failed to lookup user by id")?;

    row.as_ref().map(UserRecord::from_row).transpose()
}

/// Whether `username` belongs to someone other than `exclude`.
pub(crate) async fn username_taken(
    pool: &PgPool,
    username: &str,
    exclude: Option<Uuid>,
) -> Result<bool> {
    let query = "SELECT EXISTS(SELECT 1 FROM users WHERE username = $1 AND id IS DISTINCT FROM $2)";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    sqlx::query_scalar::<_, bool>(query)
        .bind(username)
        .bind(exclude)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to check username")
}

/// Whether `email` belongs to someone other than `exclude`.
pub(crate) async fn email_taken(pool: &PgPool, email: &str, exclude: Option<Uuid>) -> Result<bool> {
    let query = "SELECT EXISTS(SELECT 1 FROM users WHERE email = $1 AND id IS DISTINCT FROM $2)";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    sqlx::query_scalar::<_, bool>(query)
        .bind(email)
        .bind(exclude)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to check email")
}

/// Insert a user; a lost uniqueness race comes back as `Err(Ok(conflict))`.
pub(crate) async fn insert_user(
    tx: &mut Transaction<'_, Postgres>,
    username: &str,
    email: &str,
    password_hash: &str,
    role: Role,
) -> Result<std::result::Result<UserRecord, UserConflict>> {
    let query = format!(
        "INSERT INTO users (username, email, password_hash, role) \
         VALUES ($1, $2, $3, $4::user_role) RETURNING {USER_COLUMNS}"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query.as_str()
    );
    let result = sqlx::query(&query)
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(role.as_str())
        .fetch_one(&mut **tx)
        .instrument(span)
        .await;

    match result {
        Ok(row) => UserRecord::from_row(&row).map(Ok),
        Err(err) => match UserConflict::from_sqlx(&err) {
            Some(conflict) => Ok(Err(conflict)),
            None => Err(err).context("failed to insert user"),
        },
    }
}

pub(crate) async fn update_password_hash<'e, E>(
    executor: E,
    user_id: Uuid,
    password_hash: &str,
) -> Result<()>
where
    E: PgExecutor<'e>,
{
    let query = "UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(password_hash)
        .execute(executor)
        .instrument(span)
        .await
        .context("failed to update password")?;
    Ok(())
}

/// Column changes for an existing user; `None` keeps the current value.
#[derive(Debug, Default, Clone)]
pub(crate) struct UserChanges {
    pub(crate) username: Option<String>,
    pub(crate) email: Option<String>,
    pub(crate) role: Option<Role>,
}

impl UserChanges {
    pub(crate) fn is_empty(&self) -> bool {
        self.username.is_none() && self.email.is_none() && self.role.is_none()
    }
}

/// Apply `changes`; `Ok(None)` when the user does not exist.
pub(crate) async fn update_user<'e, E>(
    executor: E,
    user_id: Uuid,
    changes: &UserChanges,
) -> Result<std::result::Result<Option<UserRecord>, UserConflict>>
where
    E: PgExecutor<'e>,
{
    let query = format!(
        "UPDATE users SET \
         username = COALESCE($2, username), \
         email = COALESCE($3, email), \
         role = COALESCE($4::user_role, role), \
         updated_at = NOW() \
         WHERE id = $1 RETURNING {USER_COLUMNS}"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query.as_str()
    );
    let result = sqlx::query(&query)
        .bind(user_id)
        .bind(changes.username.as_deref())
        .bind(changes.email.as_deref())
        .bind(changes.role.map(Role::as_str))
        .fetch_optional(executor)
        .instrument(span)
        .await;

    match result {
        Ok(row) => row.as_ref().map(UserRecord::from_row).transpose().map(Ok),
        Err(err) => match UserConflict::from_sqlx(&err) {
            Some(conflict) => Ok(Err(conflict)),
            None => Err(err).context("failed to update user"),
        },
    }
}

/// Persist the hash of a refresh token.
pub(crate) async fn insert_refresh_token<'e, E>(
    executor: E,
    user_id: Uuid,
    token_hash: &[u8],
    expires_at: DateTime<Utc>,
) -> Result<()>
where
    E: PgExecutor<'e>,
{
    let query = r"
        INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
        VALUES ($1, $2, $3)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(executor)
        .instrument(span)
        .await
        .context("failed to insert refresh token")?;
    Ok(())
}

/// Delete the presented refresh token and report whether it was still valid.
///
/// The row is removed either way, so a token can be consumed at most once.
pub(crate) async fn consume_refresh_token(
    tx: &mut Transaction<'_, Postgres>,
    token_hash: &[u8],
) -> Result<RefreshLookup> {
    let query = r"
        DELETE FROM refresh_tokens
        WHERE token_hash = $1
        RETURNING user_id, expires_at > NOW() AS active
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to consume refresh token")?;

    Ok(match row {
        Some(row) if row.get::<bool, _>("active") => RefreshLookup::Active(row.get("user_id")),
        Some(_) => RefreshLookup::Expired,
        None => RefreshLookup::Missing,
    })
}

pub(crate) async fn delete_refresh_token(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    // Logout is idempotent; it's fine if no rows are deleted.
    let query = "DELETE FROM refresh_tokens WHERE token_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete refresh token")?;
    Ok(())
}

/// Revoke every refresh token of a user; returns how many were removed.
pub(crate) async fn delete_user_refresh_tokens<'e, E>(executor: E, user_id: Uuid) -> Result<u64>
where
    E: PgExecutor<'e>,
{
    let query = "DELETE FROM refresh_tokens WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(executor)
        .instrument(span)
        .await
        .context("failed to revoke refresh tokens")?;
    Ok(result.rows_affected())
}

/// Drop a user's expired refresh tokens so the table does not grow unbounded.
pub(crate) async fn delete_expired_refresh_tokens<'e, E>(executor: E, user_id: Uuid) -> Result<()>
where
    E: PgExecutor<'e>,
{
    let query = "DELETE FROM refresh_tokens WHERE user_id = $1 AND expires_at <= NOW()";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(executor)
        .instrument(span)
        .await
        .context("failed to purge expired refresh tokens")?;
    Ok(())
}

/// Lock a pending (unused, unexpired) invite by its token.
pub(crate) async fn lock_pending_invite(
    tx: &mut Transaction<'_, Postgres>,
    token: &str,
) -> Result<Option<InviteRecord>> {
    let query = r"
        SELECT id, email, role::text AS role
        FROM invites
        WHERE token = $1
          AND used_at IS NULL
          AND expires_at > NOW()
        FOR UPDATE
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to lookup invite")?;

    row.map(|row| {
        let role: String = row.get("role");
        Ok(InviteRecord {
            id: row.get("id"),
            email: row.get("email"),
            role: role.parse().map_err(|err: String| anyhow!(err))?,
        })
    })
    .transpose()
}

pub(crate) async fn mark_invite_used(tx: &mut Transaction<'_, Postgres>, invite_id: Uuid) -> Result<()> {
    let query = "UPDATE invites SET used_at = NOW() WHERE id = $1 AND used_at IS NULL";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(invite_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to mark invite used")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_messages() {
        assert_eq!(UserConflict::Username.message(), "Username already taken");
        assert_eq!(UserConflict::Email.message(), "Email already registered");
    }

    #[test]
    fn non_unique_errors_are_not_conflicts() {
        assert!(UserConflict::from_sqlx(&sqlx::Error::RowNotFound).is_none());
    }

    #[test]
    fn user_columns_cast_role_to_text() {
        assert!(USER_COLUMNS.contains("role::text AS role"));
        assert!(!USER_COLUMNS.contains("two_factor_secret"));
    }
}
