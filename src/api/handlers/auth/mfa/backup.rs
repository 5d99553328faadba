//! Backup code generation and verification.
//!
//! Backup codes stand in for the authenticator app during login. Each code is
//! single use and stored only as an Argon2id hash.

use anyhow::{Context, Result, anyhow};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use rand::{RngCore, rngs::OsRng};

pub(crate) const BACKUP_CODE_COUNT: usize = 10;
const BACKUP_CODE_LEN: usize = 8;
const BACKUP_CODE_GROUP_SIZE: usize = 4;
const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Freshly generated codes (plaintext for the user, hashes for storage).
#[derive(Debug)]
pub(crate) struct BackupCodeSet {
    pub(crate) codes: Vec<String>,
    pub(crate) code_hashes: Vec<String>,
}

impl BackupCodeSet {
    pub(crate) fn generate() -> Result<Self> {
        let mut rng = OsRng;
        Self::generate_with_rng(&mut rng)
    }

    fn generate_with_rng<R: RngCore + ?Sized>(rng: &mut R) -> Result<Self> {
        let mut codes = Vec::with_capacity(BACKUP_CODE_COUNT);
        let mut code_hashes = Vec::with_capacity(BACKUP_CODE_COUNT);
        for _ in 0..BACKUP_CODE_COUNT {
            let code = generate_code(rng)?;
            code_hashes.push(hash_backup_code(&code)?);
            codes.push(code);
        }
        Ok(Self { codes, code_hashes })
    }
}

/// Uppercase and strip separators. Fails on wrong length or foreign characters.
pub(crate) fn normalize_backup_code(input: &str) -> Result<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    if normalized.len() != BACKUP_CODE_LEN {
        return Err(anyhow!("invalid backup code length"));
    }

    if !normalized
        .bytes()
        .all(|ch| BACKUP_CODE_ALPHABET.contains(&ch))
    {
        return Err(anyhow!("invalid backup code characters"));
    }

    Ok(normalized)
}

/// `ABCDEFGH` -> `ABCD-EFGH`.
pub(crate) fn format_backup_code(normalized: &str) -> Result<String> {
    if normalized.len() != BACKUP_CODE_LEN {
        return Err(anyhow!("invalid backup code length"));
    }
    let mut out = String::with_capacity(BACKUP_CODE_LEN + 1);
    for (idx, chunk) in normalized
        .as_bytes()
        .chunks(BACKUP_CODE_GROUP_SIZE)
        .enumerate()
    {
        if idx > 0 {
            out.push('-');
        }
        out.push_str(std::str::from_utf8(chunk).context("invalid backup code chunk")?);
    }
    Ok(out)
}

/// Verify user input against one stored hash. Malformed input never matches.
pub(crate) fn verify_backup_code(code: &str, stored_hash: &str) -> bool {
    let Ok(normalized) = normalize_backup_code(code) else {
        return false;
    };
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(normalized.as_bytes(), &parsed)
        .is_ok()
}

fn generate_code<R: RngCore + ?Sized>(rng: &mut R) -> Result<String> {
    let mut raw = [0u8; BACKUP_CODE_LEN];
    rng.fill_bytes(&mut raw);
    // 256 is a multiple of the 32-symbol alphabet, so the modulo is unbiased.
    let normalized: String = raw
        .iter()
        .map(|byte| char::from(BACKUP_CODE_ALPHABET[usize::from(*byte) % BACKUP_CODE_ALPHABET.len()]))
        .collect();
    format_backup_code(&normalized)
}

fn hash_backup_code(code: &str) -> Result<String> {
    let normalized = normalize_backup_code(code)?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(normalized.as_bytes(), &salt)
        .map_err(|_| anyhow!("failed to hash backup code"))?
        .to_string();
    Ok(hash)
}
