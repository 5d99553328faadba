//! TOTP (RFC 6238) secrets, enrollment payloads, and code checks.
//!
//! SHA-1, 6 digits, 30 second step, and one step of skew either side, which is
//! what every mainstream authenticator app expects.

use anyhow::{Result, anyhow};
use totp_rs::{Algorithm, Secret, TOTP};

const DIGITS: usize = 6;
const SKEW: u8 = 1;
const STEP_SECONDS: u64 = 30;

/// What the client needs to enroll an authenticator app.
#[derive(Debug, Clone)]
pub(crate) struct Enrollment {
    pub(crate) secret: String,
    pub(crate) otpauth_url: String,
    pub(crate) qr_code: String,
}

/// New random 160-bit secret, base32 encoded.
pub(crate) fn generate_secret() -> Result<String> {
    let bytes = Secret::generate_secret()
        .to_bytes()
        .map_err(|e| anyhow!("Secret gen error: {e}"))?;
    Ok(build_totp(bytes, "authgate", "user")?.get_secret_base32())
}

fn build_totp(secret_bytes: Vec<u8>, issuer: &str, account: &str) -> Result<TOTP> {
    // `:` separates issuer and account in otpauth labels.
    let issuer = issuer.replace(':', "");
    let account = account.replace(':', "");
    TOTP::new(
        Algorithm::SHA1,
        DIGITS,
        SKEW,
        STEP_SECONDS,
        secret_bytes,
        Some(issuer),
        account,
    )
    .map_err(|e| anyhow!("TOTP init error: {e}"))
}

fn totp_from_base32(secret_base32: &str, issuer: &str, account: &str) -> Result<TOTP> {
    let bytes = Secret::Encoded(secret_base32.to_string())
        .to_bytes()
        .map_err(|e| anyhow!("Invalid TOTP secret: {e}"))?;
    build_totp(bytes, issuer, account)
}

/// Secret, `otpauth://` URL, and PNG QR code (data URL) for a stored secret.
pub(crate) fn enrollment(secret_base32: &str, issuer: &str, account: &str) -> Result<Enrollment> {
    let totp = totp_from_base32(secret_base32, issuer, account)?;
    let qr = totp
        .get_qr_base64()
        .map_err(|e| anyhow!("QR gen error: {e}"))?;
    Ok(Enrollment {
        secret: totp.get_secret_base32(),
        otpauth_url: totp.get_url(),
        qr_code: format!("data:image/png;base64,{qr}"),
    })
}

/// Whether `code` is a well-formed 6-digit TOTP code.
pub(crate) fn is_totp_format(code: &str) -> bool {
    code.len() == DIGITS && code.chars().all(|ch| ch.is_ascii_digit())
}

/// Check a code against the current time window.
pub(crate) fn verify_code(secret_base32: &str, code: &str) -> Result<bool> {
    let code = code.trim();
    if !is_totp_format(code) {
        return Ok(false);
    }
    let totp = totp_from_base32(secret_base32, "authgate", "user")?;
    Ok(totp.check_current(code).unwrap_or(false))
}

#[cfg(test)]
fn verify_code_at(secret_base32: &str, code: &str, unix_time: u64) -> Result<bool> {
    if !is_totp_format(code) {
        return Ok(false);
    }
    let totp = totp_from_base32(secret_base32, "authgate", "user")?;
    Ok(totp.check(code, unix_time))
}

/// Group a base32 secret in blocks of four for manual entry.
pub(crate) fn format_secret_for_display(secret_base32: &str) -> String {
    secret_base32
        .as_bytes()
        .chunks(4)
        .filter_map(|chunk| std::str::from_utf8(chunk).ok())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn code_at(secret: &str, unix_time: u64) -> String {
        totp_from_base32(secret, "authgate", "user")
            .unwrap()
            .generate(unix_time)
    }

    #[test]
    fn generated_secret_is_160_bits() {
        let secret = generate_secret().unwrap();
        // 20 bytes -> 32 base32 characters
        assert_eq!(secret.len(), 32);
        assert_ne!(secret, generate_secret().unwrap());
    }

    #[test]
    fn current_code_verifies() {
        let secret = generate_secret().unwrap();
        let code = totp_from_base32(&secret, "authgate", "user")
            .unwrap()
            .generate_current()
            .unwrap();
        assert!(verify_code(&secret, &code).unwrap());
    }

    #[test]
    fn one_step_of_skew_is_accepted() {
        let secret = generate_secret().unwrap();
        let now = 1_700_000_010;
        assert!(verify_code_at(&secret, &code_at(&secret, now - 30), now).unwrap());
        assert!(verify_code_at(&secret, &code_at(&secret, now + 30), now).unwrap());
        assert!(!verify_code_at(&secret, &code_at(&secret, now - 90), now).unwrap());
    }

    #[test]
    fn malformed_codes_are_rejected_without_checking() {
        let secret = generate_secret().unwrap();
        assert!(!verify_code(&secret, "12345").unwrap());
        assert!(!verify_code(&secret, "1234567").unwrap());
        assert!(!verify_code(&secret, "12a456").unwrap());
        assert!(!verify_code(&secret, "").unwrap());
    }

    #[test]
    fn invalid_secret_is_an_error() {
        assert!(verify_code("not base32!", "123456").is_err());
    }

    #[test]
    fn enrollment_payload() {
        let secret = generate_secret().unwrap();
        let enrollment = enrollment(&secret, "Acme: Portal", "alice@example.com").unwrap();
        assert_eq!(enrollment.secret, secret);
        assert!(enrollment.otpauth_url.starts_with("otpauth://totp/"));
        assert!(enrollment.otpauth_url.contains(&format!("secret={secret}")));
        assert!(enrollment.qr_code.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn display_format_groups_by_four() {
        assert_eq!(
            format_secret_for_display("ABCDEFGHIJKLMNOP"),
            "ABCD EFGH IJKL MNOP"
        );
        assert_eq!(format_secret_for_display("ABCDEF"), "ABCD EF");
    }
}
