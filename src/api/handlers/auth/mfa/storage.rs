//! Storage helpers for TOTP secrets and backup codes.

use anyhow::{Context, Result};
use sqlx::{PgExecutor, PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

/// Second-factor columns of a user.
#[derive(Clone, Debug, Default)]
pub(crate) struct TwoFactorRecord {
    pub(crate) enabled: bool,
    pub(crate) secret: Option<String>,
    pub(crate) pending_secret: Option<String>,
}

fn db_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

pub(crate) async fn load_two_factor<'e, E>(
    executor: E,
    user_id: Uuid,
) -> Result<Option<TwoFactorRecord>>
where
    E: PgExecutor<'e>,
{
    let query = r"
        SELECT two_factor_enabled, two_factor_secret, two_factor_pending_secret
        FROM users
        WHERE id = $1
    ";
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(executor)
        .instrument(db_span("SELECT", query))
        .await
        .context("failed to load 2FA state")?;
    Ok(row.map(|row| TwoFactorRecord {
        enabled: row.get("two_factor_enabled"),
        secret: row.get("two_factor_secret"),
        pending_secret: row.get("two_factor_pending_secret"),
    }))
}

/// Replace the pending secret. Ignored once 2FA is enabled.
pub(crate) async fn store_pending_secret(pool: &PgPool, user_id: Uuid, secret: &str) -> Result<bool> {
    let query = r"
        UPDATE users
        SET two_factor_pending_secret = $2, updated_at = NOW()
        WHERE id = $1 AND two_factor_enabled = FALSE
    ";
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(secret)
        .execute(pool)
        .instrument(db_span("UPDATE", query))
        .await
        .context("failed to store pending 2FA secret")?;
    Ok(result.rows_affected() == 1)
}

/// Promote `pending_secret` to the active secret and replace the backup codes.
///
/// Returns `false` when 2FA was enabled concurrently or the pending secret
/// changed since it was checked.
pub(crate) async fn activate_two_factor(
    pool: &PgPool,
    user_id: Uuid,
    pending_secret: &str,
    code_hashes: &[String],
) -> Result<bool> {
    let mut tx = pool.begin().await.context("begin 2FA enable transaction")?;

    let query = r"
        UPDATE users
        SET two_factor_secret = two_factor_pending_secret,
            two_factor_pending_secret = NULL,
            two_factor_enabled = TRUE,
            updated_at = NOW()
        WHERE id = $1
          AND two_factor_enabled = FALSE
          AND two_factor_pending_secret = $2
    ";
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(pending_secret)
        .execute(&mut *tx)
        .instrument(db_span("UPDATE", query))
        .await
        .context("failed to enable 2FA")?;
    if result.rows_affected() != 1 {
        tx.rollback().await.context("rollback 2FA enable")?;
        return Ok(false);
    }

    delete_backup_codes(&mut *tx, user_id).await?;

    let query = r"
        INSERT INTO backup_codes (user_id, code_hash)
        SELECT $1, UNNEST($2::text[])
    ";
    sqlx::query(query)
        .bind(user_id)
        .bind(code_hashes)
        .execute(&mut *tx)
        .instrument(db_span("INSERT", query))
        .await
        .context("failed to store backup codes")?;

    tx.commit().await.context("commit 2FA enable")?;
    Ok(true)
}

/// Clear every 2FA column and drop the backup codes.
pub(crate) async fn deactivate_two_factor(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let mut tx = pool.begin().await.context("begin 2FA disable transaction")?;

    let query = r"
        UPDATE users
        SET two_factor_enabled = FALSE,
            two_factor_secret = NULL,
            two_factor_pending_secret = NULL,
            updated_at = NOW()
        WHERE id = $1
    ";
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut *tx)
        .instrument(db_span("UPDATE", query))
        .await
        .context("failed to disable 2FA")?;

    delete_backup_codes(&mut *tx, user_id).await?;

    tx.commit().await.context("commit 2FA disable")?;
    Ok(())
}

async fn delete_backup_codes<'e, E>(executor: E, user_id: Uuid) -> Result<()>
where
    E: PgExecutor<'e>,
{
    let query = "DELETE FROM backup_codes WHERE user_id = $1";
    sqlx::query(query)
        .bind(user_id)
        .execute(executor)
        .instrument(db_span("DELETE", query))
        .await
        .context("failed to delete backup codes")?;
    Ok(())
}

/// Unused backup codes as `(id, hash)`.
pub(crate) async fn load_unused_backup_codes(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Vec<(Uuid, String)>> {
    let query = r"
        SELECT id, code_hash
        FROM backup_codes
        WHERE user_id = $1 AND used_at IS NULL
        ORDER BY created_at
    ";
    let rows = sqlx::query(query)
        .bind(user_id)
        .fetch_all(pool)
        .instrument(db_span("SELECT", query))
        .await
        .context("failed to load backup codes")?;
    Ok(rows
        .into_iter()
        .map(|row| (row.get("id"), row.get("code_hash")))
        .collect())
}

/// Mark a code used. `false` means another request used it first.
pub(crate) async fn mark_backup_code_used(pool: &PgPool, code_id: Uuid) -> Result<bool> {
    let query = r"
        UPDATE backup_codes
        SET used_at = NOW()
        WHERE id = $1 AND used_at IS NULL
    ";
    let result = sqlx::query(query)
        .bind(code_id)
        .execute(pool)
        .instrument(db_span("UPDATE", query))
        .await
        .context("failed to mark backup code used")?;
    Ok(result.rows_affected() == 1)
}
