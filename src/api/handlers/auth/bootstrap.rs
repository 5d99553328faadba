//! First `SUPER_ADMIN` account.
//!
//! When bootstrap credentials are configured, startup creates a super admin
//! unless one already exists. Instances racing at startup serialize on a
//! transaction-scoped advisory lock.

use anyhow::{Context, Result, anyhow, bail};
use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use tracing::{Instrument, info};

use super::{
    password::{hash_password, password_policy_violations},
    role::Role,
    storage::insert_user,
    utils::{check_email, check_username, normalize_email, normalize_username},
};
use crate::api::error::FieldErrors;

const BOOTSTRAP_LOCK_KEY: i64 = 0x6175_7468_6761_7465;

#[derive(Clone, Debug)]
pub struct BootstrapAdmin {
    pub username: String,
    pub email: String,
    pub password: SecretString,
}

impl BootstrapAdmin {
    /// Normalize and validate the configured credentials.
    ///
    /// # Errors
    /// Returns an error describing every rule the credentials break.
    pub fn new(username: &str, email: &str, password: SecretString) -> Result<Self> {
        let username = normalize_username(username);
        let email = normalize_email(email);

        let mut errors = FieldErrors::new();
        check_username(&mut errors, "username", &username);
        check_email(&mut errors, "email", &email);
        for violation in password_policy_violations(password.expose_secret()) {
            errors.add("password", violation);
        }
        if !errors.is_empty() {
            let details = serde_json::to_string(&errors).unwrap_or_default();
            bail!("invalid bootstrap admin credentials: {details}");
        }

        Ok(Self {
            username,
            email,
            password,
        })
    }
}

/// Create the bootstrap super admin if none exists. Returns whether one was created.
///
/// # Errors
/// Returns an error if the database fails or the username/email belongs to an
/// existing non-super-admin account.
pub async fn ensure_super_admin(pool: &PgPool, admin: &BootstrapAdmin) -> Result<bool> {
    let mut tx = pool.begin().await.context("begin bootstrap transaction")?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(BOOTSTRAP_LOCK_KEY)
        .execute(&mut *tx)
        .await
        .context("failed to acquire bootstrap lock")?;

    let query = "SELECT EXISTS(SELECT 1 FROM users WHERE role = 'SUPER_ADMIN')";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let exists: bool = sqlx::query_scalar(query)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await
        .context("failed to check for super admin")?;
    if exists {
        tx.commit().await.context("commit bootstrap transaction")?;
        return Ok(false);
    }

    let password_hash = hash_password(admin.password.expose_secret())?;
    let user = insert_user(
        &mut tx,
        &admin.username,
        &admin.email,
        &password_hash,
        Role::SuperAdmin,
    )
    .await?
    .map_err(|conflict| anyhow!("bootstrap admin not created: {}", conflict.message()))?;

    tx.commit().await.context("commit bootstrap transaction")?;
    info!(user_id = %user.id, username = %user.username, "Bootstrap super admin created");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_are_normalized() {
        let admin = BootstrapAdmin::new(
            " Root ",
            "Root@Example.com",
            SecretString::from("Sup3r$ecret"),
        );
        assert!(admin.is_ok_and(|admin| admin.username == "root" && admin.email == "root@example.com"));
    }

    #[test]
    fn weak_password_is_rejected() {
        let err = BootstrapAdmin::new("root", "root@example.com", SecretString::from("password"))
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert!(err.contains("password"));
    }

    #[test]
    fn bad_email_is_rejected() {
        assert!(BootstrapAdmin::new("root", "nope", SecretString::from("Sup3r$ecret")).is_err());
    }
}
