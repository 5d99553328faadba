//! Auth handlers and supporting modules.
//!
//! This module coordinates password login, the JWT session lifecycle (access and
//! refresh cookies with single-use rotation), and TOTP second factors.
//!
//! ## Tokens
//!
//! Access and refresh tokens are HS256 JWTs signed with separate secrets. Only
//! the SHA-256 of each refresh token is stored; presenting one deletes its row,
//! and presenting a correctly signed token whose row is gone revokes every
//! session of that user.
//!
//! ## Roles
//!
//! `USER < ADMIN < SUPER_ADMIN`. Every request reloads the user, so role changes
//! and deletions apply immediately instead of when the access token expires.

pub mod bootstrap;
pub(crate) mod cookies;
pub(crate) mod login;
pub(crate) mod mfa;
pub(crate) mod password;
pub(crate) mod principal;
pub(crate) mod role;
pub(crate) mod session;
mod state;
pub(crate) mod storage;
pub(crate) mod tokens;
pub(crate) mod types;
pub(crate) mod utils;

pub use role::Role;
pub use state::{AuthConfig, AuthState};
pub use tokens::{TokenIssuer, TokenTtls, parse_expiry};
