//! # Authgate (Authentication & Admin API)
//!
//! `authgate` issues and rotates cookie-based JWT sessions, enforces role-based
//! access, and runs the TOTP two-factor flow for a web frontend. Administrators
//! manage users, invites, and system settings through `/api/admin/*`.
//!
//! ## Sessions
//!
//! A login sets two `HttpOnly` cookies:
//!
//! - **`access_token`:** HS256 JWT, 15 minutes, authorizes API requests.
//! - **`refresh_token`:** HS256 JWT signed with a separate secret, 7 days. Only its
//!   SHA-256 hash is stored. Refresh tokens are single use: every refresh deletes the
//!   presented token and issues a new pair. Presenting a consumed token revokes all of
//!   the user's refresh tokens.
//!
//! ## Two-Factor Authentication
//!
//! When 2FA is enabled, the password step only yields a short-lived
//! `two_factor_token` cookie. The session is issued by `/api/auth/verify-2fa` after a
//! valid TOTP code or an unused backup code.
//!
//! ## Roles
//!
//! `USER`, `ADMIN`, `SUPER_ADMIN`. Admin routes accept `ADMIN` and `SUPER_ADMIN`;
//! an `ADMIN` may only manage `USER` accounts, and only a `SUPER_ADMIN` may delete.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
