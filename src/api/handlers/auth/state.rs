//! Auth state and configuration shared by every handler.

use url::Url;

use super::tokens::TokenIssuer;

const DEFAULT_APP_NAME: &str = "Authgate";
const DEFAULT_INVITE_TTL_DAYS: i64 = 7;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    cookie_secure: Option<bool>,
    cookie_domain: Option<String>,
    app_name: String,
    invite_ttl_days: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            cookie_secure: None,
            cookie_domain: None,
            app_name: DEFAULT_APP_NAME.to_string(),
            invite_ttl_days: DEFAULT_INVITE_TTL_DAYS,
        }
    }

    /// Force the `Secure` cookie attribute on or off instead of deriving it from the URL.
    #[must_use]
    pub fn with_cookie_secure(mut self, secure: Option<bool>) -> Self {
        self.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn with_cookie_domain(mut self, domain: Option<String>) -> Self {
        self.cookie_domain = domain.filter(|value| !value.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_app_name(mut self, app_name: String) -> Self {
        self.app_name = app_name;
        self
    }

    #[must_use]
    pub fn with_invite_ttl_days(mut self, days: i64) -> Self {
        self.invite_ttl_days = days;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    /// Cookies are `Secure` when configured so, otherwise when the frontend is served over HTTPS.
    pub(crate) fn cookie_secure(&self) -> bool {
        self.cookie_secure.unwrap_or_else(|| {
            Url::parse(&self.frontend_base_url).is_ok_and(|url| url.scheme() == "https")
        })
    }

    pub(crate) fn cookie_domain(&self) -> Option<&str> {
        self.cookie_domain.as_deref()
    }

    /// Issuer shown in authenticator apps.
    pub(crate) fn app_name(&self) -> &str {
        &self.app_name
    }

    pub(crate) fn invite_ttl_days(&self) -> i64 {
        self.invite_ttl_days
    }

    /// Link sent to an invited user.
    pub(crate) fn invite_link(&self, token: &str) -> String {
        let base = self.frontend_base_url.trim_end_matches('/');
        format!("{base}/invite/{token}")
    }
}

#[derive(Debug)]
pub struct AuthState {
    config: AuthConfig,
    tokens: TokenIssuer,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig, tokens: TokenIssuer) -> Self {
        Self { config, tokens }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }
}
