//! Admin API: user management, invites, settings, and statistics.
//!
//! Every route requires `ADMIN` or `SUPER_ADMIN`. Within that, an `ADMIN` may only
//! act on `USER` accounts and invites, and deleting users is `SUPER_ADMIN` only.

pub mod invites;
pub mod settings;
pub mod stats;
pub mod users;
