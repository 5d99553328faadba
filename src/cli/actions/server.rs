use crate::api::{
    self, PoolConfig,
    handlers::auth::{AuthConfig, AuthState, TokenIssuer, TokenTtls, bootstrap::BootstrapAdmin},
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub db_max_connections: u32,
    pub migrate: bool,
    pub jwt_access_secret: SecretString,
    pub jwt_refresh_secret: SecretString,
    pub token_ttls: TokenTtls,
    pub frontend_base_url: String,
    pub cookie_secure: Option<bool>,
    pub cookie_domain: Option<String>,
    pub app_name: String,
    pub invite_ttl_days: i64,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the token secrets are unusable, the database is unreachable, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let tokens = TokenIssuer::new(
        &args.jwt_access_secret,
        &args.jwt_refresh_secret,
        args.token_ttls,
    )
    .context("Invalid JWT configuration")?;

    let auth_config = AuthConfig::new(args.frontend_base_url)
        .with_cookie_secure(args.cookie_secure)
        .with_cookie_domain(args.cookie_domain)
        .with_app_name(args.app_name)
        .with_invite_ttl_days(args.invite_ttl_days);

    api::new(
        args.port,
        args.dsn,
        PoolConfig {
            max_connections: args.db_max_connections,
        },
        args.migrate,
        AuthState::new(auth_config, tokens),
        args.bootstrap_admin,
    )
    .await
}

fn log_startup_args(args: &Args) {
    info!(
        port = args.port,
        db_max_connections = args.db_max_connections,
        migrate = args.migrate,
        access_ttl_seconds = args.token_ttls.access,
        refresh_ttl_seconds = args.token_ttls.refresh,
        two_factor_ttl_seconds = args.token_ttls.two_factor,
        frontend_base_url = %args.frontend_base_url,
        cookie_domain = args.cookie_domain.as_deref().unwrap_or("-"),
        bootstrap_admin = args.bootstrap_admin.is_some(),
        "Starting authgate {} ({})",
        env!("CARGO_PKG_VERSION"),
        crate::GIT_COMMIT_HASH
    );
}
