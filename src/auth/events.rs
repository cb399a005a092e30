//! Observability hook for authentication decision points.
//!
//! Every branch of the signup/login/enrollment flows reports what it decided
//! through [`AuthObserver`]. Observers are write-only: nothing in the core
//! reads them back or branches on them.

use tracing::{debug, info, warn};
use uuid::Uuid;

/// What happened at a decision point.
#[derive(Clone, Debug)]
pub enum AuthEvent {
    /// Login lookup missed; no history row is written (there is no user id
    /// to attach it to).
    UserNotFound { needle: String },
    PasswordRejected { user_id: Uuid },
    PasswordVerified { user_id: Uuid },
    /// MFA is enabled and no code was supplied; the attempt paused.
    MfaChallenged { user_id: Uuid },
    /// A code was supplied and did not validate.
    MfaRejected { user_id: Uuid },
    MfaVerified { user_id: Uuid },
    LoginCompleted { user_id: Uuid },
    SignupConflict { username: String, email: String },
    SignupCompleted { user_id: Uuid },
    /// First enrollment view generated and persisted the shared secret.
    MfaSecretIssued { user_id: Uuid },
    MfaEnabled { user_id: Uuid },
    MfaEnrollmentRejected { user_id: Uuid },
    /// Best-effort history append failed; the attempt outcome still stands.
    HistoryWriteFailed { user_id: Uuid },
}

pub trait AuthObserver: Send + Sync {
    fn observe(&self, event: &AuthEvent);
}

/// Default observer: emits structured `tracing` events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl AuthObserver for TracingObserver {
    fn observe(&self, event: &AuthEvent) {
        match event {
            AuthEvent::UserNotFound { needle } => {
                debug!(needle = %needle, "login lookup missed");
            }
            AuthEvent::PasswordRejected { user_id } => {
                info!(user_id = %user_id, "password verification failed");
            }
            AuthEvent::PasswordVerified { user_id } => {
                debug!(user_id = %user_id, "password verified");
            }
            AuthEvent::MfaChallenged { user_id } => {
                debug!(user_id = %user_id, "MFA code required but not provided");
            }
            AuthEvent::MfaRejected { user_id } => {
                info!(user_id = %user_id, "invalid MFA code");
            }
            AuthEvent::MfaVerified { user_id } => {
                debug!(user_id = %user_id, "MFA code validated");
            }
            AuthEvent::LoginCompleted { user_id } => {
                info!(user_id = %user_id, "login completed");
            }
            AuthEvent::SignupConflict { username, email } => {
                debug!(username = %username, email = %email, "signup conflict");
            }
            AuthEvent::SignupCompleted { user_id } => {
                info!(user_id = %user_id, "signup completed");
            }
            AuthEvent::MfaSecretIssued { user_id } => {
                info!(user_id = %user_id, "MFA secret issued");
            }
            AuthEvent::MfaEnabled { user_id } => {
                info!(user_id = %user_id, "MFA enabled");
            }
            AuthEvent::MfaEnrollmentRejected { user_id } => {
                info!(user_id = %user_id, "MFA enrollment code rejected");
            }
            AuthEvent::HistoryWriteFailed { user_id } => {
                warn!(user_id = %user_id, "failed to append authentication history");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Collector(Mutex<Vec<String>>);

    impl AuthObserver for Collector {
        fn observe(&self, event: &AuthEvent) {
            if let Ok(mut seen) = self.0.lock() {
                seen.push(format!("{event:?}"));
            }
        }
    }

    #[test]
    fn observer_is_object_safe() {
        let collector = Collector(Mutex::new(Vec::new()));
        let observer: &dyn AuthObserver = &collector;
        observer.observe(&AuthEvent::LoginCompleted {
            user_id: Uuid::nil(),
        });
        let seen = collector.0.lock().map(|seen| seen.len()).unwrap_or(0);
        assert_eq!(seen, 1);
    }

    #[test]
    fn tracing_observer_handles_every_variant() {
        let observer = TracingObserver;
        let events = [
            AuthEvent::UserNotFound {
                needle: "ghost".to_string(),
            },
            AuthEvent::PasswordRejected {
                user_id: Uuid::nil(),
            },
            AuthEvent::HistoryWriteFailed {
                user_id: Uuid::nil(),
            },
        ];
        for event in &events {
            observer.observe(event);
        }
    }
}
