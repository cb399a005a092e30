//! Typed failures for signup, login, enrollment, and logout.
//!
//! `MfaRequired` is deliberately absent here: an attempt that pauses for a
//! second factor is a continuation, not a failure, and is signalled through
//! [`crate::auth::LoginOutcome::MfaRequired`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Signup rejected: the username or email is already in use. Raised by
    /// the pre-check or by the store's uniqueness constraint at write time,
    /// whichever fires first.
    #[error("username or email already in use")]
    UsernameOrEmailTaken,

    /// Signup rejected before touching the store: empty username or a
    /// malformed email address.
    #[error("invalid username or email")]
    InvalidSignup,

    /// Login rejected. The message is identical for an unknown user and a
    /// wrong password so callers cannot enumerate accounts.
    #[error("invalid login attempt")]
    InvalidCredentials,

    /// The second factor was present but wrong; the caller should re-prompt
    /// for a code without re-asking the password.
    #[error("invalid verification code")]
    InvalidMfaCode,

    /// Enrollment was attempted for an account that no longer exists.
    #[error("user not found")]
    UserNotFound,

    /// A collaborator failed (constraint violation, connectivity). The core
    /// does not retry; that belongs to the store.
    #[error("storage error")]
    Storage(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::AuthError;

    #[test]
    fn credential_failures_share_one_message() {
        // Anti-enumeration: unknown user and wrong password must read the same.
        assert_eq!(
            AuthError::InvalidCredentials.to_string(),
            "invalid login attempt"
        );
    }

    #[test]
    fn storage_wraps_anyhow() {
        let err = AuthError::from(anyhow::anyhow!("connection refused"));
        assert!(matches!(err, AuthError::Storage(_)));
        assert_eq!(err.to_string(), "storage error");
    }
}
