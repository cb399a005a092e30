//! Authentication core: credential hashing, TOTP, enrollment, and the login
//! state machine.
//!
//! Flow overview:
//! 1) Signup hashes the password and persists a user plus a disabled MFA
//!    record with an empty secret.
//! 2) Enrollment generates the shared secret at most once, then flips
//!    `is_enabled` only after the user proves possession with a valid code.
//! 3) Login verifies the password first, consults MFA second, and only a
//!    fully successful attempt issues a session.
//!
//! Decision points emit [`AuthEvent`]s through an injected [`AuthObserver`];
//! observers report, they never branch.

pub mod config;
pub mod error;
pub mod events;
pub mod password;
pub mod service;
pub mod store;
pub mod totp;
pub mod types;

pub use config::AuthConfig;
pub use error::AuthError;
pub use events::{AuthEvent, AuthObserver, TracingObserver};
pub use service::{AuthService, AuthenticatedSession, LoginOutcome, MfaSetup, MfaSetupOutcome};
pub use store::{CreateUserOutcome, SessionIssuer, UserStore};
pub use types::{
    AuthenticationHistory, ClientMeta, LoginRequest, MfaSettings, NewHistoryEntry, NewUser,
    SessionClaims, SessionToken, SignupRequest, User,
};
