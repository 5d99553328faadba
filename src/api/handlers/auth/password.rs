//! Password hashing (Argon2id) and the password strength policy.

use anyhow::{Result, anyhow};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use once_cell::sync::Lazy;
use rand::rngs::OsRng;

pub(crate) const MIN_PASSWORD_LEN: usize = 8;
const SPECIAL_CHARACTERS: &str = "@$!%*?&";

// Verified against when the account does not exist so both paths cost the same.
static DUMMY_HASH: Lazy<Option<String>> = Lazy::new(|| hash_password("dummy-password").ok());

/// Hash a password into a PHC string.
pub(crate) fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| anyhow!("failed to hash password"))
}

/// Check a password against a stored PHC string. Unparseable hashes never match.
pub(crate) fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Burn one verification for a login attempt against an unknown account.
pub(crate) fn verify_dummy(password: &str) {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_password(password, hash);
    }
}

/// Every policy rule the password breaks, in a stable order.
pub(crate) fn password_policy_violations(password: &str) -> Vec<&'static str> {
    let mut violations = Vec::new();

    if password.chars().count() < MIN_PASSWORD_LEN {
        violations.push("Password must be at least 8 characters");
    }
    if !password.chars().any(|ch| ch.is_ascii_lowercase()) {
        violations.push("Password must contain at least one lowercase letter");
    }
    if !password.chars().any(|ch| ch.is_ascii_uppercase()) {
        violations.push("Password must contain at least one uppercase letter");
    }
    if !password.chars().any(|ch| ch.is_ascii_digit()) {
        violations.push("Password must contain at least one number");
    }
    if !password.chars().any(|ch| SPECIAL_CHARACTERS.contains(ch)) {
        violations.push("Password must contain at least one special character (@$!%*?&)");
    }
    if password
        .chars()
        .any(|ch| !ch.is_ascii_alphanumeric() && !SPECIAL_CHARACTERS.contains(ch))
    {
        violations.push("Password may only contain letters, numbers, and @$!%*?&");
    }

    violations
}
