use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

use crate::api::handlers::auth::{TokenTtls, parse_expiry};

pub const ARG_JWT_ACCESS_SECRET: &str = "jwt-access-secret";
pub const ARG_JWT_REFRESH_SECRET: &str = "jwt-refresh-secret";
pub const ARG_JWT_ACCESS_EXPIRY: &str = "jwt-access-expiry";
pub const ARG_JWT_REFRESH_EXPIRY: &str = "jwt-refresh-expiry";
pub const ARG_TWO_FACTOR_TTL_SECONDS: &str = "two-factor-ttl-seconds";

#[derive(Debug)]
pub struct Options {
    pub access_secret: SecretString,
    pub refresh_secret: SecretString,
    pub ttls: TokenTtls,
}

impl Options {
    /// Parse signing secrets and token lifetimes from matches.
    ///
    /// # Errors
    /// Returns an error if a secret is missing or an expiry cannot be parsed.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let secret = |id: &str| -> Result<SecretString> {
            matches
                .get_one::<String>(id)
                .filter(|value| !value.trim().is_empty())
                .map(|value| SecretString::from(value.clone()))
                .with_context(|| format!("missing required argument: --{id}"))
        };
        let expiry = |id: &str| -> Result<i64> {
            let value = matches
                .get_one::<String>(id)
                .with_context(|| format!("missing required argument: --{id}"))?;
            parse_expiry(value).with_context(|| format!("invalid --{id}"))
        };

        Ok(Self {
            access_secret: secret(ARG_JWT_ACCESS_SECRET)?,
            refresh_secret: secret(ARG_JWT_REFRESH_SECRET)?,
            ttls: TokenTtls {
                access: expiry(ARG_JWT_ACCESS_EXPIRY)?,
                refresh: expiry(ARG_JWT_REFRESH_EXPIRY)?,
                two_factor: matches
                    .get_one::<i64>(ARG_TWO_FACTOR_TTL_SECONDS)
                    .copied()
                    .unwrap_or(TokenTtls::default().two_factor),
            },
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_ACCESS_SECRET)
                .long(ARG_JWT_ACCESS_SECRET)
                .help("HS256 secret for access tokens (at least 32 characters)")
                .env("AUTHGATE_JWT_ACCESS_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_JWT_REFRESH_SECRET)
                .long(ARG_JWT_REFRESH_SECRET)
                .help("HS256 secret for refresh tokens, distinct from the access secret")
                .env("AUTHGATE_JWT_REFRESH_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_JWT_ACCESS_EXPIRY)
                .long(ARG_JWT_ACCESS_EXPIRY)
                .help("Access token lifetime, e.g. 15m")
                .env("AUTHGATE_JWT_ACCESS_EXPIRY")
                .default_value("15m"),
        )
        .arg(
            Arg::new(ARG_JWT_REFRESH_EXPIRY)
                .long(ARG_JWT_REFRESH_EXPIRY)
                .help("Refresh token lifetime, e.g. 7d")
                .env("AUTHGATE_JWT_REFRESH_EXPIRY")
                .default_value("7d"),
        )
        .arg(
            Arg::new(ARG_TWO_FACTOR_TTL_SECONDS)
                .long(ARG_TWO_FACTOR_TTL_SECONDS)
                .help("Lifetime of the pending two-factor challenge in seconds")
                .env("AUTHGATE_TWO_FACTOR_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(i64).range(30..=3600)),
        )
}
