use clap::{Arg, ArgAction, ArgMatches, Command};

pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_COOKIE_SECURE: &str = "cookie-secure";
pub const ARG_COOKIE_DOMAIN: &str = "cookie-domain";
pub const ARG_APP_NAME: &str = "app-name";
pub const ARG_INVITE_TTL_DAYS: &str = "invite-ttl-days";

#[derive(Debug)]
pub struct Options {
    pub frontend_base_url: String,
    pub cookie_secure: Option<bool>,
    pub cookie_domain: Option<String>,
    pub app_name: String,
    pub invite_ttl_days: i64,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        Self {
            frontend_base_url: get_non_empty(ARG_FRONTEND_BASE_URL)
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            cookie_secure: matches.get_one::<bool>(ARG_COOKIE_SECURE).copied(),
            cookie_domain: get_non_empty(ARG_COOKIE_DOMAIN),
            app_name: get_non_empty(ARG_APP_NAME).unwrap_or_else(|| "Authgate".to_string()),
            invite_ttl_days: matches
                .get_one::<i64>(ARG_INVITE_TTL_DAYS)
                .copied()
                .unwrap_or(7),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL, used as the CORS origin and for invite links")
                .env("AUTHGATE_FRONTEND_BASE_URL")
                .default_value("http://localhost:3000"),
        )
        .arg(
            Arg::new(ARG_COOKIE_SECURE)
                .long(ARG_COOKIE_SECURE)
                .help("Force the Secure cookie attribute (default: on when the frontend URL is https)")
                .env("AUTHGATE_COOKIE_SECURE")
                .action(ArgAction::Set)
                .num_args(0..=1)
                .default_missing_value("true")
                .value_parser(clap::builder::BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_COOKIE_DOMAIN)
                .long(ARG_COOKIE_DOMAIN)
                .help("Domain attribute for auth cookies")
                .env("AUTHGATE_COOKIE_DOMAIN"),
        )
        .arg(
            Arg::new(ARG_APP_NAME)
                .long(ARG_APP_NAME)
                .help("Issuer name shown in authenticator apps")
                .env("AUTHGATE_APP_NAME")
                .default_value("Authgate"),
        )
        .arg(
            Arg::new(ARG_INVITE_TTL_DAYS)
                .long(ARG_INVITE_TTL_DAYS)
                .help("Days before an invitation expires")
                .env("AUTHGATE_INVITE_TTL_DAYS")
                .default_value("7")
                .value_parser(clap::value_parser!(i64).range(1..=365)),
        )
}
