//! API handlers for authgate.
//!
//! Each handler authenticates on its own (cookie or bearer access token), checks
//! roles where needed, and answers with the JSON envelope from `api::error`.

pub mod admin;
pub mod auth;
pub mod health;
pub mod me;
pub mod user_register;
