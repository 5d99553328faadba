//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to an action, currently only starting the API
//! server with its full configuration.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{self, auth, bootstrap, jwt};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(commands::ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;
    let db_max_connections = matches
        .get_one::<u32>(commands::ARG_DB_MAX_CONNECTIONS)
        .copied()
        .unwrap_or(5);

    let jwt_opts = jwt::Options::parse(matches)?;
    let auth_opts = auth::Options::parse(matches);
    let bootstrap_admin = bootstrap::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        db_max_connections,
        migrate: matches.get_flag(commands::ARG_MIGRATE),
        jwt_access_secret: jwt_opts.access_secret,
        jwt_refresh_secret: jwt_opts.refresh_secret,
        token_ttls: jwt_opts.ttls,
        frontend_base_url: auth_opts.frontend_base_url,
        cookie_secure: auth_opts.cookie_secure,
        cookie_domain: auth_opts.cookie_domain,
        app_name: auth_opts.app_name,
        invite_ttl_days: auth_opts.invite_ttl_days,
        bootstrap_admin,
    }))
}
