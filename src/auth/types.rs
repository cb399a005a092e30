//! Domain records and request/outcome types shared with the collaborators.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A registered account. Mutated only on login success (`last_login_at`) and
/// never deleted by this core.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    /// Base64-encoded HMAC-SHA512 digest of the password.
    pub password_hash: String,
    /// Base64-encoded random key used for the digest above.
    pub password_salt: String,
    /// Carried for completeness; no core decision reads it today.
    pub is_email_confirmed: bool,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Write shape for a new user row; ids and timestamps come from the store.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub password_salt: String,
}

/// Per-user MFA record (exactly one per user). The secret is generated at
/// most once and never rotated; `is_enabled` flips true only after a correct
/// verification code.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MfaSettings {
    pub mfa_settings_id: Uuid,
    pub user_id: Uuid,
    pub is_enabled: bool,
    /// Base32 shared secret; empty until the first enrollment step.
    pub secret_key: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only login-history row, written for password failures and full
/// successes. Never updated or deleted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthenticationHistory {
    pub auth_history_id: Uuid,
    pub user_id: Uuid,
    pub login_at: DateTime<Utc>,
    pub login_status: bool,
    pub ip_address: String,
    pub user_agent: String,
}

/// Write shape for a history row; `login_at` defaults to record creation.
#[derive(Clone, Debug)]
pub struct NewHistoryEntry {
    pub user_id: Uuid,
    pub login_status: bool,
    pub ip_address: String,
    pub user_agent: String,
}

/// Request metadata supplied by the caller, never computed here.
#[derive(Clone, Debug)]
pub struct ClientMeta {
    pub ip_address: String,
    pub user_agent: String,
}

/// Signup input. The password stays wrapped until hashing.
#[derive(Debug)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: SecretString,
}

/// One leg of a login attempt. The second leg (after `MfaRequired`) carries
/// the full form again, password included; the core re-verifies it rather
/// than holding pending-login state between requests.
#[derive(Debug)]
pub struct LoginRequest {
    pub username_or_email: String,
    pub password: SecretString,
    pub mfa_code: Option<String>,
    pub remember_me: bool,
}

/// Claim set handed to the session issuer; the core never inspects session
/// internals beyond issuing and ending them.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
}

/// Opaque session handle. The raw value is surfaced exactly once, to the
/// caller that completed login; `Debug` never prints it.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionToken {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}
