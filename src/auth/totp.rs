//! TOTP engine: shared-secret generation, provisioning payloads, and
//! 6-digit code validation with clock-skew tolerance.
//!
//! Codes are standard RFC 6238: SHA-1 HMAC over the 30-second step counter,
//! truncated to 6 digits. Validation accepts any step in
//! `[-tolerance, +tolerance]` around the current one. There is no
//! replay-window tracking: a code that validates once will validate again
//! within the same step.

use anyhow::{anyhow, Result};
use totp_rs::{Algorithm, Secret, TOTP};

/// Digit count; fixed by the provisioning contract.
pub const DIGITS: usize = 6;
/// Step length in seconds; fixed by the provisioning contract.
pub const PERIOD: u64 = 30;

/// What the caller renders for enrollment: the otpauth URI (QR payload) and
/// the human-readable manual-entry form of the secret.
#[derive(Clone, Debug)]
pub struct Provisioning {
    pub otpauth_url: String,
    pub manual_entry_key: String,
}

/// Generate a fresh random shared secret, base32-encoded for storage and
/// provisioning. 160 bits, per the RFC 4226 recommendation.
#[must_use]
pub fn generate_secret() -> String {
    Secret::generate_secret().to_encoded().to_string()
}

/// Build the provisioning payload for a stored secret. Pure function of its
/// inputs; computed fresh on every enrollment view, never persisted.
///
/// # Errors
/// Fails if the stored secret is empty or not valid base32 — a
/// data-integrity problem, since enrollment only ever persists secrets from
/// [`generate_secret`].
pub fn provisioning(issuer: &str, account: &str, secret_base32: &str) -> Result<Provisioning> {
    let totp = build(secret_base32, 0, issuer, account)
        .ok_or_else(|| anyhow!("stored TOTP secret is empty or malformed"))?;
    // `get_url` leaves parameters at their RFC defaults implicit; the payload
    // spells them out.
    let otpauth_url = format!("{}&digits={DIGITS}&period={PERIOD}", totp.get_url());
    Ok(Provisioning {
        otpauth_url,
        manual_entry_key: secret_base32.trim().to_string(),
    })
}

/// Validate a submitted code against a stored secret at the current time.
///
/// Returns `false` for an empty or malformed secret and for codes that are
/// not exactly six ASCII digits.
#[must_use]
pub fn validate_code(secret_base32: &str, code: &str, tolerance_steps: u8) -> bool {
    let Some(totp) = checker(secret_base32, code, tolerance_steps) else {
        return false;
    };
    totp.check_current(code).unwrap_or(false)
}

/// [`validate_code`] against an explicit unix timestamp. Backs the
/// deterministic tests; behavior is otherwise identical.
#[must_use]
pub fn validate_code_at(
    secret_base32: &str,
    code: &str,
    tolerance_steps: u8,
    unix_time: u64,
) -> bool {
    let Some(totp) = checker(secret_base32, code, tolerance_steps) else {
        return false;
    };
    totp.check(code, unix_time)
}

fn checker(secret_base32: &str, code: &str, tolerance_steps: u8) -> Option<TOTP> {
    if !well_formed_code(code) {
        return None;
    }
    // Labels do not affect code math; validation only needs the secret.
    build(secret_base32, tolerance_steps, "gatekey", "user")
}

fn well_formed_code(code: &str) -> bool {
    code.len() == DIGITS && code.bytes().all(|byte| byte.is_ascii_digit())
}

fn build(secret_base32: &str, tolerance_steps: u8, issuer: &str, account: &str) -> Option<TOTP> {
    let trimmed = secret_base32.trim();
    if trimmed.is_empty() {
        return None;
    }
    let secret = Secret::Encoded(trimmed.to_string()).to_bytes().ok()?;
    TOTP::new(
        Algorithm::SHA1,
        DIGITS,
        tolerance_steps,
        PERIOD,
        secret,
        Some(issuer.to_string()),
        account.to_string(),
    )
    .ok()
}
