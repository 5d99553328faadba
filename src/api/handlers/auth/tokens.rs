//! JWT issuance and verification.
//!
//! Access and two-factor tokens are signed with the access secret; refresh tokens
//! use their own secret so one leaked key cannot mint the other kind. Every token
//! carries a `typ` claim, and verification rejects a token of the wrong type even
//! when the signature matches.

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};
use uuid::Uuid;

use super::role::Role;

pub(crate) const MIN_SECRET_LEN: usize = 32;
pub const DEFAULT_ACCESS_TTL_SECONDS: i64 = 15 * 60;
pub const DEFAULT_REFRESH_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
pub const DEFAULT_TWO_FACTOR_TTL_SECONDS: i64 = 5 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
    TwoFactor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    pub typ: TokenKind,
}

impl Claims {
    /// Expiry as a timestamp, clamped to "now" if out of range.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or_else(Utc::now)
    }
}

/// A freshly signed token together with the claims inside it.
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub claims: Claims,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
    #[error("unexpected token type: expected {expected:?}, got {actual:?}")]
    WrongType {
        expected: TokenKind,
        actual: TokenKind,
    },
    #[error("failed to sign token: {0}")]
    Encode(jsonwebtoken::errors::Error),
}

/// Token lifetimes in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTtls {
    pub access: i64,
    pub refresh: i64,
    pub two_factor: i64,
}

impl Default for TokenTtls {
    fn default() -> Self {
        Self {
            access: DEFAULT_ACCESS_TTL_SECONDS,
            refresh: DEFAULT_REFRESH_TTL_SECONDS,
            two_factor: DEFAULT_TWO_FACTOR_TTL_SECONDS,
        }
    }
}

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn from_secret(secret: &SecretString) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
        }
    }
}

pub struct TokenIssuer {
    access: KeyPair,
    refresh: KeyPair,
    ttls: TokenTtls,
    validation: Validation,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("ttls", &self.ttls)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Build an issuer from the two HS256 secrets.
    ///
    /// # Errors
    /// Returns an error if a secret is shorter than 32 bytes or both secrets are equal.
    pub fn new(
        access_secret: &SecretString,
        refresh_secret: &SecretString,
        ttls: TokenTtls,
    ) -> Result<Self> {
        if access_secret.expose_secret().len() < MIN_SECRET_LEN {
            bail!("JWT access secret must be at least {MIN_SECRET_LEN} characters");
        }
        if refresh_secret.expose_secret().len() < MIN_SECRET_LEN {
            bail!("JWT refresh secret must be at least {MIN_SECRET_LEN} characters");
        }
        if access_secret.expose_secret() == refresh_secret.expose_secret() {
            bail!("JWT access and refresh secrets must differ");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            access: KeyPair::from_secret(access_secret),
            refresh: KeyPair::from_secret(refresh_secret),
            ttls,
            validation,
        })
    }

    #[must_use]
    pub fn ttls(&self) -> TokenTtls {
        self.ttls
    }

    /// # Errors
    /// Returns `TokenError::Encode` if signing fails.
    pub fn issue_access(&self, user_id: Uuid, role: Role) -> Result<SignedToken, TokenError> {
        self.sign(&self.access, user_id, role, TokenKind::Access, self.ttls.access)
    }

    /// # Errors
    /// Returns `TokenError::Encode` if signing fails.
    pub fn issue_refresh(&self, user_id: Uuid, role: Role) -> Result<SignedToken, TokenError> {
        self.sign(&self.refresh, user_id, role, TokenKind::Refresh, self.ttls.refresh)
    }

    /// Partial session proving the password step while the second factor is pending.
    ///
    /// # Errors
    /// Returns `TokenError::Encode` if signing fails.
    pub fn issue_two_factor(&self, user_id: Uuid, role: Role) -> Result<SignedToken, TokenError> {
        self.sign(
            &self.access,
            user_id,
            role,
            TokenKind::TwoFactor,
            self.ttls.two_factor,
        )
    }

    /// # Errors
    /// Returns a `TokenError` if the token is expired, forged, or not an access token.
    pub fn verify_access(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(&self.access, token, TokenKind::Access)
    }

    /// # Errors
    /// Returns a `TokenError` if the token is expired, forged, or not a refresh token.
    pub fn verify_refresh(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(&self.refresh, token, TokenKind::Refresh)
    }

    /// # Errors
    /// Returns a `TokenError` if the token is expired, forged, or not a two-factor token.
    pub fn verify_two_factor(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify(&self.access, token, TokenKind::TwoFactor)
    }

    fn sign(
        &self,
        keys: &KeyPair,
        user_id: Uuid,
        role: Role,
        typ: TokenKind,
        ttl_seconds: i64,
    ) -> Result<SignedToken, TokenError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id,
            role,
            iat: now,
            exp: now.saturating_add(ttl_seconds),
            jti: generate_jti(),
            typ,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
            .map_err(TokenError::Encode)?;
        Ok(SignedToken { token, claims })
    }

    fn verify(&self, keys: &KeyPair, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &keys.decoding, &self.validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            }
        })?;
        if data.claims.typ != expected {
            return Err(TokenError::WrongType {
                expected,
                actual: data.claims.typ,
            });
        }
        Ok(data.claims)
    }
}

/// 16 random bytes, hex encoded.
fn generate_jti() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().fold(String::with_capacity(32), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

/// Parse an expiry like `30s`, `15m`, `12h` or `7d` into seconds.
///
/// # Errors
/// Returns an error for anything other than digits followed by one unit.
pub fn parse_expiry(value: &str) -> Result<i64> {
    let value = value.trim();
    let unit = value
        .chars()
        .last()
        .ok_or_else(|| anyhow!("expiry must not be empty"))?;
    let digits = &value[..value.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
        bail!("invalid expiry format: {value} (expected e.g. 15m or 7d)");
    }
    let amount: i64 = digits
        .parse()
        .map_err(|_| anyhow!("invalid expiry amount: {value}"))?;
    let multiplier = match unit {
        's' => 1,
        'm' => 60,
        'h' => 60 * 60,
        'd' => 24 * 60 * 60,
        _ => bail!("invalid expiry unit: {value} (expected s, m, h or d)"),
    };
    amount
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow!("expiry out of range: {value}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const ACCESS: &str = "access-secret-access-secret-access-secret";
    const REFRESH: &str = "refresh-secret-refresh-secret-refresh-secret";

    fn issuer_with(ttls: TokenTtls) -> TokenIssuer {
        TokenIssuer::new(
            &SecretString::from(ACCESS),
            &SecretString::from(REFRESH),
            ttls,
        )
        .unwrap()
    }

    fn issuer() -> TokenIssuer {
        issuer_with(TokenTtls::default())
    }

    #[test]
    fn rejects_short_or_shared_secrets() {
        let short = SecretString::from("too-short");
        let access = SecretString::from(ACCESS);
        let refresh = SecretString::from(REFRESH);
        assert!(TokenIssuer::new(&short, &refresh, TokenTtls::default()).is_err());
        assert!(TokenIssuer::new(&access, &short, TokenTtls::default()).is_err());
        assert!(TokenIssuer::new(&access, &access, TokenTtls::default()).is_err());
        assert!(TokenIssuer::new(&access, &refresh, TokenTtls::default()).is_ok());
    }

    #[test]
    fn access_token_carries_identity_and_ttl() {
        let issuer = issuer();
        let user_id = Uuid::new_v4();
        let signed = issuer.issue_access(user_id, Role::Admin).unwrap();
        let claims = issuer.verify_access(&signed.token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.typ, TokenKind::Access);
        assert_eq!(claims.exp - claims.iat, DEFAULT_ACCESS_TTL_SECONDS);
        assert_eq!(claims, signed.claims);
    }

    #[test]
    fn refresh_tokens_are_unique() {
        let issuer = issuer();
        let user_id = Uuid::new_v4();
        let first = issuer.issue_refresh(user_id, Role::User).unwrap();
        let second = issuer.issue_refresh(user_id, Role::User).unwrap();
        assert_ne!(first.token, second.token);
        assert_ne!(first.claims.jti, second.claims.jti);
        assert_eq!(first.claims.jti.len(), 32);
        assert_eq!(
            first.claims.exp - first.claims.iat,
            DEFAULT_REFRESH_TTL_SECONDS
        );
    }

    #[test]
    fn token_kinds_do_not_cross() {
        let issuer = issuer();
        let user_id = Uuid::new_v4();
        let access = issuer.issue_access(user_id, Role::User).unwrap();
        let refresh = issuer.issue_refresh(user_id, Role::User).unwrap();
        let partial = issuer.issue_two_factor(user_id, Role::User).unwrap();

        // Refresh tokens use a different key entirely.
        assert!(matches!(
            issuer.verify_access(&refresh.token),
            Err(TokenError::Invalid)
        ));
        assert!(matches!(
            issuer.verify_refresh(&access.token),
            Err(TokenError::Invalid)
        ));
        // Same key, wrong purpose.
        assert!(matches!(
            issuer.verify_access(&partial.token),
            Err(TokenError::WrongType {
                expected: TokenKind::Access,
                actual: TokenKind::TwoFactor
            })
        ));
        assert!(matches!(
            issuer.verify_two_factor(&access.token),
            Err(TokenError::WrongType { .. })
        ));
        assert!(issuer.verify_two_factor(&partial.token).is_ok());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let issuer = issuer_with(TokenTtls {
            access: -5,
            refresh: -5,
            two_factor: -5,
        });
        let user_id = Uuid::new_v4();
        let access = issuer.issue_access(user_id, Role::User).unwrap();
        let refresh = issuer.issue_refresh(user_id, Role::User).unwrap();
        assert!(matches!(
            issuer.verify_access(&access.token),
            Err(TokenError::Expired)
        ));
        assert!(matches!(
            issuer.verify_refresh(&refresh.token),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn tampered_tokens_are_rejected() {
        let issuer = issuer();
        let signed = issuer.issue_access(Uuid::new_v4(), Role::User).unwrap();
        let mut tampered = signed.token.clone();
        tampered.push('x');
        assert!(matches!(
            issuer.verify_access(&tampered),
            Err(TokenError::Invalid)
        ));
        assert!(matches!(
            issuer.verify_access("not.a.jwt"),
            Err(TokenError::Invalid)
        ));

        let other = TokenIssuer::new(
            &SecretString::from("another-access-secret-another-access"),
            &SecretString::from(REFRESH),
            TokenTtls::default(),
        )
        .unwrap();
        assert!(matches!(
            other.verify_access(&signed.token),
            Err(TokenError::Invalid)
        ));
    }

    #[test]
    fn expires_at_matches_exp() {
        let signed = issuer().issue_refresh(Uuid::new_v4(), Role::User).unwrap();
        assert_eq!(signed.claims.expires_at().timestamp(), signed.claims.exp);
    }

    #[test]
    fn parse_expiry_units() {
        assert_eq!(parse_expiry("30s").unwrap(), 30);
        assert_eq!(parse_expiry("15m").unwrap(), 900);
        assert_eq!(parse_expiry("12h").unwrap(), 43_200);
        assert_eq!(parse_expiry("7d").unwrap(), 604_800);
    }

    #[test]
    fn parse_expiry_rejects_bad_formats() {
        for value in ["", "m", "15", "15w", "-1m", "1.5h", "15 m", "ten m"] {
            assert!(parse_expiry(value).is_err(), "{value} should be rejected");
        }
    }
}
