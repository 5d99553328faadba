//! Small helpers for input normalization, opaque tokens, and database errors.

use anyhow::{Context, Result};
use base64::Engine;
use once_cell::sync::Lazy;
use rand::{RngCore, rngs::OsRng};
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::api::error::FieldErrors;

pub(crate) const USERNAME_MIN_LEN: usize = 3;
pub(crate) const USERNAME_MAX_LEN: usize = 30;

static EMAIL_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());
static USERNAME_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").ok());

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Usernames are compared and stored lowercase.
pub(crate) fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    EMAIL_RE
        .as_ref()
        .is_some_and(|regex| regex.is_match(email_normalized))
}

/// Record username rule violations under `field`.
pub(crate) fn check_username(errors: &mut FieldErrors, field: &str, username: &str) {
    let length = username.chars().count();
    if length == 0 {
        errors.add(field, "Username is required");
        return;
    }
    if length < USERNAME_MIN_LEN {
        errors.add(field, "Username must be at least 3 characters");
    }
    if length > USERNAME_MAX_LEN {
        errors.add(field, "Username must be at most 30 characters");
    }
    if !USERNAME_RE
        .as_ref()
        .is_some_and(|regex| regex.is_match(username))
    {
        errors.add(
            field,
            "Username can only contain letters, numbers, underscores, and hyphens",
        );
    }
}

/// Record email rule violations under `field`.
pub(crate) fn check_email(errors: &mut FieldErrors, field: &str, email_normalized: &str) {
    if email_normalized.is_empty() {
        errors.add(field, "Email is required");
    } else if !valid_email(email_normalized) {
        errors.add(field, "Invalid email address");
    }
}

/// Random URL-safe token (invite links).
pub(crate) fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a token so raw values never touch the database.
pub(crate) fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Name of the violated unique constraint, if the error is one.
pub(crate) fn unique_violation_constraint(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) if is_unique_violation(err) => {
            db_err.constraint().map(str::to_string)
        }
        _ => None,
    }
}

/// Extract a client IP for audit logging from common proxy headers.
pub(crate) fn extract_client_ip(headers: &axum::http::HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn normalize_username_trims_and_lowercases() {
        assert_eq!(normalize_username(" Alice_01 "), "alice_01");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@example.com"));
        assert!(valid_email("name.surname@example.co"));
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-at.example.com"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn check_username_rules() {
        let mut errors = FieldErrors::new();
        check_username(&mut errors, "username", "alice-01_x");
        assert!(errors.is_empty());

        let mut errors = FieldErrors::new();
        check_username(&mut errors, "username", "ab");
        assert_eq!(
            errors.get("username"),
            Some(["Username must be at least 3 characters".to_string()].as_slice())
        );

        let mut errors = FieldErrors::new();
        check_username(&mut errors, "username", &"a".repeat(31));
        assert_eq!(errors.get("username").map(<[String]>::len), Some(1));

        let mut errors = FieldErrors::new();
        check_username(&mut errors, "username", "no spaces");
        assert_eq!(errors.get("username").map(<[String]>::len), Some(1));

        let mut errors = FieldErrors::new();
        check_username(&mut errors, "username", "");
        assert_eq!(
            errors.get("username"),
            Some(["Username is required".to_string()].as_slice())
        );
    }

    #[test]
    fn check_email_rules() {
        let mut errors = FieldErrors::new();
        check_email(&mut errors, "email", "");
        check_email(&mut errors, "other", "nope");
        assert_eq!(
            errors.get("email"),
            Some(["Email is required".to_string()].as_slice())
        );
        assert_eq!(
            errors.get("other"),
            Some(["Invalid email address".to_string()].as_slice())
        );
    }

    #[test]
    fn generate_token_is_url_safe_32_bytes() {
        let decoded_len = generate_token()
            .ok()
            .and_then(|token| URL_SAFE_NO_PAD.decode(token.as_bytes()).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(32));
    }

    #[test]
    fn hash_token_stable() {
        let first = hash_token("token");
        let second = hash_token("token");
        let different = hash_token("other");
        assert_eq!(first, second);
        assert_ne!(first, different);
        assert_eq!(first.len(), 32);
    }

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
        constraint: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn constraint(&self) -> Option<&str> {
            self.constraint
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn unique_violation_detection() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
            constraint: Some("users_email_key"),
        }));
        assert!(is_unique_violation(&err));
        assert_eq!(
            unique_violation_constraint(&err).as_deref(),
            Some("users_email_key")
        );

        let other = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23503"),
            constraint: None,
        }));
        assert!(!is_unique_violation(&other));
        assert!(unique_violation_constraint(&other).is_none());
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn extract_client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(extract_client_ip(&headers).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn extract_client_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.2"));
        assert_eq!(extract_client_ip(&headers).as_deref(), Some("10.0.0.2"));
        assert!(extract_client_ip(&HeaderMap::new()).is_none());
    }
}
