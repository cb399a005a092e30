//! # Gatekey (Password + TOTP Authentication Core)
//!
//! `gatekey` is an authentication decision engine: password hashing and
//! verification, TOTP second-factor provisioning and validation, and the
//! multi-step login state machine that conditionally demands a second factor.
//! It records a history row for every login attempt that reaches password
//! verification.
//!
//! ## Collaborators
//!
//! The engine owns no persistence or transport. It talks to two seams:
//!
//! - [`auth::UserStore`] — durable user, MFA-settings, and login-history
//!   records. Postgres ([`store::postgres`]) and in-memory
//!   ([`store::memory`]) implementations are provided.
//! - [`auth::SessionIssuer`] — turns a verified identity into an opaque
//!   session token and ends it on logout.
//!
//! ## Authentication flow
//!
//! 1) Look up the user by username or email; unknown users and wrong
//!    passwords are indistinguishable to the caller.
//! 2) Verify the password (keyed HMAC-SHA512 hash with a per-user salt).
//! 3) If MFA is enabled: no code means the attempt pauses with a
//!    [`auth::LoginOutcome::MfaRequired`] continuation; a wrong code is
//!    rejected without ending the challenge.
//! 4) On success: update last-login, append a history row, issue a session.
//!
//! ## Security boundaries
//!
//! - Passwords travel as [`secrecy::SecretString`] and never reach logs.
//! - Session tokens are returned raw exactly once; stores keep only a hash.
//! - Error text never reveals whether the username or the password failed.

pub mod auth;
pub mod store;
