//! Password hashing
//!
//! Argon2id with the crate's default parameters and a random salt per hash.
//! Hashes are stored as PHC strings, so the parameters travel with them.

use anyhow::{Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Key for [`tokens_match`]; any key works since both sides use it
const COMPARE_KEY: &[u8] = b"agora-token-compare";

/// Hash a password, returning the PHC string
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
        .context("Password hashing failed")?;

    Ok(password_hash.to_string())
}

/// Check a password against a stored PHC hash.
///
/// A mismatch is `Ok(false)`; a malformed hash is an error.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))
        .context("Failed to parse password hash")?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow::anyhow!("Password verification failed: {}", e))
            .context("Password verification error"),
    }
}

/// Compare a stored token with a submitted one in constant time.
///
/// Both go through the same MAC; the digests are compared with `verify_slice`.
pub fn tokens_match(expected: &str, given: &str) -> bool {
    let (Ok(mut expected_mac), Ok(mut given_mac)) = (
        HmacSha256::new_from_slice(COMPARE_KEY),
        HmacSha256::new_from_slice(COMPARE_KEY),
    ) else {
        return false;
    };
    expected_mac.update(expected.as_bytes());
    given_mac.update(given.as_bytes());
    given_mac
        .verify_slice(&expected_mac.finalize().into_bytes())
        .is_ok()
}
