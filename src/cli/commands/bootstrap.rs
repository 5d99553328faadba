use anyhow::{Result, bail};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

use crate::api::handlers::auth::bootstrap::BootstrapAdmin;

pub const ARG_BOOTSTRAP_USERNAME: &str = "bootstrap-admin-username";
pub const ARG_BOOTSTRAP_EMAIL: &str = "bootstrap-admin-email";
pub const ARG_BOOTSTRAP_PASSWORD: &str = "bootstrap-admin-password";

/// Bootstrap super admin credentials; all three or none.
///
/// # Errors
/// Returns an error if only some values are set or they fail validation.
pub fn parse(matches: &ArgMatches) -> Result<Option<BootstrapAdmin>> {
    let get_non_empty = |id: &str| {
        matches
            .get_one::<String>(id)
            .cloned()
            .filter(|v| !v.trim().is_empty())
    };

    match (
        get_non_empty(ARG_BOOTSTRAP_USERNAME),
        get_non_empty(ARG_BOOTSTRAP_EMAIL),
        get_non_empty(ARG_BOOTSTRAP_PASSWORD),
    ) {
        (None, None, None) => Ok(None),
        (Some(username), Some(email), Some(password)) => Ok(Some(BootstrapAdmin::new(
            &username,
            &email,
            SecretString::from(password),
        )?)),
        _ => bail!(
            "--{ARG_BOOTSTRAP_USERNAME}, --{ARG_BOOTSTRAP_EMAIL} and --{ARG_BOOTSTRAP_PASSWORD} must be set together"
        ),
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_BOOTSTRAP_USERNAME)
                .long(ARG_BOOTSTRAP_USERNAME)
                .help("Username of the super admin created at startup when none exists")
                .env("AUTHGATE_BOOTSTRAP_ADMIN_USERNAME"),
        )
        .arg(
            Arg::new(ARG_BOOTSTRAP_EMAIL)
                .long(ARG_BOOTSTRAP_EMAIL)
                .help("Email of the bootstrap super admin")
                .env("AUTHGATE_BOOTSTRAP_ADMIN_EMAIL"),
        )
        .arg(
            Arg::new(ARG_BOOTSTRAP_PASSWORD)
                .long(ARG_BOOTSTRAP_PASSWORD)
                .help("Password of the bootstrap super admin")
                .env("AUTHGATE_BOOTSTRAP_ADMIN_PASSWORD")
                .hide_env_values(true),
        )
}
