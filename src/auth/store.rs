//! Collaborator seams: the durable user store and the session issuer.
//!
//! The core never retries these calls and never inspects session internals;
//! failures surface as [`crate::auth::AuthError::Storage`].

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::types::{
    MfaSettings, NewHistoryEntry, NewUser, SessionClaims, SessionToken, User,
};

/// Outcome of attempting to create a user. `Conflict` is the authoritative
/// uniqueness rejection: stores must map their constraint violation here so
/// concurrent signups for the same username/email cannot race past the
/// pre-check.
#[derive(Debug)]
pub enum CreateUserOutcome {
    Created(User),
    Conflict,
}

/// Durable user, MFA-settings, and login-history records. Implementations
/// must enforce uniqueness on `username` and `email`.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_username_or_email(&self, needle: &str) -> Result<Option<User>>;

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>>;

    async fn create_user(&self, new_user: NewUser) -> Result<CreateUserOutcome>;

    /// Create the 1:1 MFA record for a fresh user: disabled, empty secret.
    async fn create_mfa_settings(&self, user_id: Uuid) -> Result<MfaSettings>;

    async fn mfa_settings(&self, user_id: Uuid) -> Result<Option<MfaSettings>>;

    async fn update_mfa_secret(&self, user_id: Uuid, secret: &str) -> Result<()>;

    async fn set_mfa_enabled(&self, user_id: Uuid, enabled: bool) -> Result<()>;

    /// Append-only; rows are never updated or deleted.
    async fn append_history(&self, entry: NewHistoryEntry) -> Result<()>;

    async fn update_last_login(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

/// Session/cookie lifecycle. The token is opaque to the core.
#[async_trait]
pub trait SessionIssuer: Send + Sync {
    /// Issue a session for a verified identity. `persistent` maps from the
    /// login form's remember-me flag.
    async fn issue(&self, claims: &SessionClaims, persistent: bool) -> Result<SessionToken>;

    /// End a session. Idempotent: ending an unknown token is not an error.
    async fn end(&self, token: &SessionToken) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::CreateUserOutcome;

    #[test]
    fn conflict_debug_name() {
        assert_eq!(format!("{:?}", CreateUserOutcome::Conflict), "Conflict");
    }
}
