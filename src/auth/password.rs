//! Keyed password hashing: HMAC-SHA512 with a fresh random key per password.
//!
//! The random key doubles as the stored salt, which makes precomputed
//! dictionary attacks infeasible. This is a salted keyed hash, not a
//! memory-hard KDF — there is no iteration count, so a production deployment
//! that wants brute-force resistance should swap in a deliberately slow KDF
//! (Argon2id or similar) behind the same [`hash`]/[`verify`] contract.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

/// Salt length in raw bytes before encoding.
const SALT_LEN: usize = 64;

/// Hash plus the salt that produced it, both base64-encoded for storage.
#[derive(Clone, Debug)]
pub struct PasswordDigest {
    pub hash: String,
    pub salt: String,
}

/// Hash a password with a fresh random key.
///
/// # Errors
/// Fails only if the system RNG cannot produce the salt.
pub fn hash(password: &str) -> Result<PasswordDigest> {
    let mut key = [0u8; SALT_LEN];
    OsRng
        .try_fill_bytes(&mut key)
        .context("failed to generate password salt")?;
    let mut mac = HmacSha512::new_from_slice(&key).context("failed to key password hash")?;
    mac.update(password.as_bytes());
    let digest = mac.finalize().into_bytes();
    Ok(PasswordDigest {
        hash: STANDARD.encode(digest),
        salt: STANDARD.encode(key),
    })
}

/// Verify a candidate password against a stored hash and salt.
///
/// Recomputes the keyed hash with the stored salt and compares in constant
/// time. Returns `false` for any malformed stored value rather than erroring:
/// the verification path treats bad data as a failed match, though a
/// mismatched encoding here points at a data-integrity bug, not user error.
#[must_use]
pub fn verify(password: &str, stored_hash: &str, stored_salt: &str) -> bool {
    let Ok(salt) = STANDARD.decode(stored_salt.trim()) else {
        return false;
    };
    let Ok(expected) = STANDARD.decode(stored_hash.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(&salt) else {
        return false;
    };
    mac.update(password.as_bytes());
    mac.verify_slice(&expected).is_ok()
}
