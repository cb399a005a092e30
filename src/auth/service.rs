//! The authentication service: signup, the login state machine, MFA
//! enrollment, and logout.
//!
//! Ordering rule for login: the password is always verified before MFA is
//! even consulted, and an unknown user is indistinguishable from a wrong
//! password. History rows are written for password failures and full
//! successes only — a wrong MFA code does not log a row. That asymmetry
//! mirrors the behavior this engine replaces and is kept deliberately.

use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use secrecy::ExposeSecret;
use tracing::debug;
use uuid::Uuid;

use super::config::AuthConfig;
use super::error::AuthError;
use super::events::{AuthEvent, AuthObserver, TracingObserver};
use super::password;
use super::store::{CreateUserOutcome, SessionIssuer, UserStore};
use super::totp;
use super::types::{
    ClientMeta, LoginRequest, NewHistoryEntry, NewUser, SessionClaims, SessionToken,
    SignupRequest, User,
};

/// Result of a login attempt that did not fail.
#[derive(Debug)]
pub enum LoginOutcome {
    Success(AuthenticatedSession),
    /// Continuation: the password checked out but MFA is enabled and no code
    /// was supplied. Nothing is persisted; the caller re-submits the full
    /// form with a code and the password is verified again.
    MfaRequired,
}

/// A fully verified identity plus its freshly issued session.
#[derive(Debug)]
pub struct AuthenticatedSession {
    pub claims: SessionClaims,
    pub token: SessionToken,
}

/// Enrollment view: rendered by the caller as a QR payload plus the
/// manual-entry secret. Recomputed on every view, never persisted.
#[derive(Clone, Debug)]
pub struct MfaSetup {
    pub otpauth_url: String,
    pub manual_entry_key: String,
}

/// Result of submitting an enrollment verification code.
#[derive(Debug)]
pub enum MfaSetupOutcome {
    /// Terminal: MFA is now enabled for the user.
    Enabled,
    /// The code was wrong; the secret is unchanged and the caller re-renders
    /// the same setup view.
    Rejected(MfaSetup),
}

/// Authentication decision engine over a [`UserStore`] and [`SessionIssuer`].
///
/// Each call is an independent, stateless request-response operation: no
/// state is held between an `MfaRequired` continuation and the retry.
pub struct AuthService<S, I> {
    store: S,
    sessions: I,
    config: AuthConfig,
    observer: Arc<dyn AuthObserver>,
}

impl<S: UserStore, I: SessionIssuer> AuthService<S, I> {
    pub fn new(store: S, sessions: I, config: AuthConfig) -> Self {
        Self {
            store,
            sessions,
            config,
            observer: Arc::new(TracingObserver),
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn AuthObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The underlying user store; handy for tests and admin tooling.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The underlying session issuer.
    #[must_use]
    pub fn sessions(&self) -> &I {
        &self.sessions
    }

    /// Register a new user: hash the password, persist the user, then its
    /// disabled MFA record.
    ///
    /// The existence pre-check is an optimization only; the store's
    /// uniqueness constraint is the source of truth, and a write-time
    /// conflict surfaces as [`AuthError::UsernameOrEmailTaken`] exactly like
    /// a pre-check hit.
    ///
    /// # Errors
    /// [`AuthError::InvalidSignup`] for an empty username or malformed
    /// email; [`AuthError::UsernameOrEmailTaken`] on conflict;
    /// [`AuthError::Storage`] when a collaborator fails.
    pub async fn signup(&self, request: SignupRequest) -> Result<User, AuthError> {
        let username = request.username.trim().to_string();
        let email = normalize_email(&request.email);
        if username.is_empty() || !valid_email(&email) {
            return Err(AuthError::InvalidSignup);
        }

        for needle in [username.as_str(), email.as_str()] {
            if self.store.find_by_username_or_email(needle).await?.is_some() {
                self.observer.observe(&AuthEvent::SignupConflict {
                    username: username.clone(),
                    email: email.clone(),
                });
                return Err(AuthError::UsernameOrEmailTaken);
            }
        }

        let digest = password::hash(request.password.expose_secret())?;
        let outcome = self
            .store
            .create_user(NewUser {
                username: username.clone(),
                email: email.clone(),
                password_hash: digest.hash,
                password_salt: digest.salt,
            })
            .await?;

        let user = match outcome {
            CreateUserOutcome::Created(user) => user,
            CreateUserOutcome::Conflict => {
                self.observer.observe(&AuthEvent::SignupConflict {
                    username,
                    email,
                });
                return Err(AuthError::UsernameOrEmailTaken);
            }
        };

        self.store.create_mfa_settings(user.user_id).await?;
        self.observer.observe(&AuthEvent::SignupCompleted {
            user_id: user.user_id,
        });
        Ok(user)
    }

    /// Run one leg of the login state machine.
    ///
    /// # Errors
    /// [`AuthError::InvalidCredentials`] for an unknown user or wrong
    /// password (indistinguishable by design);
    /// [`AuthError::InvalidMfaCode`] when a supplied code fails, leaving the
    /// challenge open; [`AuthError::Storage`] when a collaborator fails.
    pub async fn login(
        &self,
        request: LoginRequest,
        meta: ClientMeta,
    ) -> Result<LoginOutcome, AuthError> {
        let needle = request.username_or_email.trim();
        let Some(user) = self.find_user(needle).await? else {
            // No user id to attach a history row to.
            self.observer.observe(&AuthEvent::UserNotFound {
                needle: needle.to_string(),
            });
            return Err(AuthError::InvalidCredentials);
        };

        if !password::verify(
            request.password.expose_secret(),
            &user.password_hash,
            &user.password_salt,
        ) {
            self.observer.observe(&AuthEvent::PasswordRejected {
                user_id: user.user_id,
            });
            self.append_history(user.user_id, false, &meta).await;
            return Err(AuthError::InvalidCredentials);
        }
        self.observer.observe(&AuthEvent::PasswordVerified {
            user_id: user.user_id,
        });

        let settings = self.store.mfa_settings(user.user_id).await?;
        if let Some(settings) = settings.filter(|settings| settings.is_enabled) {
            let code = request
                .mfa_code
                .as_deref()
                .map(str::trim)
                .filter(|code| !code.is_empty());
            let Some(code) = code else {
                self.observer.observe(&AuthEvent::MfaChallenged {
                    user_id: user.user_id,
                });
                return Ok(LoginOutcome::MfaRequired);
            };

            if !totp::validate_code(
                &settings.secret_key,
                code,
                self.config.totp_tolerance_steps(),
            ) {
                // No history row here: only password failures and full
                // successes are logged.
                self.observer.observe(&AuthEvent::MfaRejected {
                    user_id: user.user_id,
                });
                return Err(AuthError::InvalidMfaCode);
            }
            self.observer.observe(&AuthEvent::MfaVerified {
                user_id: user.user_id,
            });
        }

        self.store.update_last_login(user.user_id, Utc::now()).await?;
        self.append_history(user.user_id, true, &meta).await;

        let claims = SessionClaims {
            user_id: user.user_id,
            username: user.username,
            email: user.email,
        };
        let token = self.sessions.issue(&claims, request.remember_me).await?;
        self.observer.observe(&AuthEvent::LoginCompleted {
            user_id: claims.user_id,
        });
        Ok(LoginOutcome::Success(AuthenticatedSession { claims, token }))
    }

    /// First enrollment step: generate and persist the shared secret if the
    /// user has none yet, then return a freshly computed provisioning view.
    /// Idempotent — an existing secret is never regenerated.
    ///
    /// # Errors
    /// [`AuthError::UserNotFound`] for a missing account or MFA record;
    /// [`AuthError::Storage`] when a collaborator fails.
    pub async fn mfa_setup_begin(&self, user_id: Uuid) -> Result<MfaSetup, AuthError> {
        let (user, settings) = self.load_enrollment_state(user_id).await?;

        let secret = if settings.secret_key.trim().is_empty() {
            let secret = totp::generate_secret();
            self.store.update_mfa_secret(user_id, &secret).await?;
            self.observer
                .observe(&AuthEvent::MfaSecretIssued { user_id });
            secret
        } else {
            settings.secret_key
        };

        self.setup_view(&user, &secret)
    }

    /// Confirmation step: validate the submitted code against the persisted
    /// secret. Success enables MFA (terminal); failure re-renders the same
    /// setup state with the unchanged secret.
    ///
    /// # Errors
    /// [`AuthError::UserNotFound`] for a missing account or MFA record;
    /// [`AuthError::InvalidMfaCode`] when confirmation is attempted before a
    /// secret was ever issued; [`AuthError::Storage`] when a collaborator
    /// fails.
    pub async fn mfa_setup_confirm(
        &self,
        user_id: Uuid,
        code: &str,
    ) -> Result<MfaSetupOutcome, AuthError> {
        let (user, settings) = self.load_enrollment_state(user_id).await?;
        if settings.secret_key.trim().is_empty() {
            // Confirmation posted before the setup view ever issued a secret.
            return Err(AuthError::InvalidMfaCode);
        }

        if totp::validate_code(
            &settings.secret_key,
            code.trim(),
            self.config.totp_tolerance_steps(),
        ) {
            self.store.set_mfa_enabled(user_id, true).await?;
            self.observer.observe(&AuthEvent::MfaEnabled { user_id });
            return Ok(MfaSetupOutcome::Enabled);
        }

        self.observer
            .observe(&AuthEvent::MfaEnrollmentRejected { user_id });
        let view = self.setup_view(&user, &settings.secret_key)?;
        Ok(MfaSetupOutcome::Rejected(view))
    }

    /// End a session. Idempotent.
    ///
    /// # Errors
    /// [`AuthError::Storage`] when the session issuer fails.
    pub async fn logout(&self, token: &SessionToken) -> Result<(), AuthError> {
        self.sessions.end(token).await?;
        Ok(())
    }

    /// Lookup by the needle as typed, then by its normalized form: usernames
    /// are stored as typed, emails lowercased at signup.
    async fn find_user(&self, needle: &str) -> Result<Option<User>, AuthError> {
        if let Some(user) = self.store.find_by_username_or_email(needle).await? {
            return Ok(Some(user));
        }
        let normalized = normalize_email(needle);
        if normalized == needle {
            return Ok(None);
        }
        Ok(self.store.find_by_username_or_email(&normalized).await?)
    }

    async fn load_enrollment_state(
        &self,
        user_id: Uuid,
    ) -> Result<(User, super::types::MfaSettings), AuthError> {
        let user = self
            .store
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        let settings = self
            .store
            .mfa_settings(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        Ok((user, settings))
    }

    fn setup_view(&self, user: &User, secret: &str) -> Result<MfaSetup, AuthError> {
        let payload = totp::provisioning(self.config.issuer(), &user.email, secret)?;
        Ok(MfaSetup {
            otpauth_url: payload.otpauth_url,
            manual_entry_key: payload.manual_entry_key,
        })
    }

    /// Best-effort auditing: a failed history append is reported but does
    /// not change the attempt's outcome.
    async fn append_history(&self, user_id: Uuid, login_status: bool, meta: &ClientMeta) {
        let entry = NewHistoryEntry {
            user_id,
            login_status,
            ip_address: meta.ip_address.clone(),
            user_agent: meta.user_agent.clone(),
        };
        if let Err(err) = self.store.append_history(entry).await {
            debug!(user_id = %user_id, "history append failed: {err:#}");
            self.observer
                .observe(&AuthEvent::HistoryWriteFailed { user_id });
        }
    }
}

/// Normalize an email for lookup/uniqueness checks.
fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::error::AuthError;
    use crate::auth::types::MfaSettings;
    use crate::store::memory::{InMemoryUserStore, RecordingSessionIssuer};
    use chrono::DateTime;
    use secrecy::SecretString;
    use std::sync::Mutex;
    use std::time::{SystemTime, UNIX_EPOCH};
    use totp_rs::{Algorithm, Secret, TOTP};

    fn service() -> AuthService<InMemoryUserStore, RecordingSessionIssuer> {
        AuthService::new(
            InMemoryUserStore::new(),
            RecordingSessionIssuer::new(),
            AuthConfig::new(),
        )
    }

    fn signup_request(username: &str, email: &str, password: &str) -> SignupRequest {
        SignupRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: SecretString::from(password.to_string()),
        }
    }

    fn login_request(needle: &str, password: &str, mfa_code: Option<&str>) -> LoginRequest {
        LoginRequest {
            username_or_email: needle.to_string(),
            password: SecretString::from(password.to_string()),
            mfa_code: mfa_code.map(str::to_string),
            remember_me: false,
        }
    }

    fn meta() -> ClientMeta {
        ClientMeta {
            ip_address: "203.0.113.7".to_string(),
            user_agent: "gatekey-tests".to_string(),
        }
    }

    fn totp_for(secret_base32: &str) -> TOTP {
        let secret = Secret::Encoded(secret_base32.to_string()).to_bytes().unwrap();
        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            secret,
            Some("gatekey".to_string()),
            "tests".to_string(),
        )
        .unwrap()
    }

    fn current_code(secret_base32: &str) -> String {
        totp_for(secret_base32).generate_current().unwrap()
    }

    /// A well-formed six-digit code guaranteed outside the current ±1 window.
    fn wrong_code(secret_base32: &str) -> String {
        let totp = totp_for(secret_base32);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let window = [
            totp.generate(now.saturating_sub(30)),
            totp.generate(now),
            totp.generate(now + 30),
        ];
        ["123456", "654321", "111111", "999999"]
            .iter()
            .map(|code| (*code).to_string())
            .find(|code| !window.contains(code))
            .unwrap()
    }

    #[tokio::test]
    async fn signup_creates_user_and_disabled_mfa() {
        let service = service();
        let user = service
            .signup(signup_request("alice", "Alice@Example.com ", "Secret1!"))
            .await
            .unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.email, "alice@example.com");
        assert!(user.last_login_at.is_none());

        let settings = service.store.mfa_settings(user.user_id).await.unwrap().unwrap();
        assert!(!settings.is_enabled);
        assert!(settings.secret_key.is_empty());
    }

    #[tokio::test]
    async fn signup_rejects_invalid_input() {
        let service = service();
        let err = service
            .signup(signup_request("  ", "alice@example.com", "Secret1!"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidSignup));

        let err = service
            .signup(signup_request("alice", "not-an-email", "Secret1!"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidSignup));
    }

    #[tokio::test]
    async fn signup_conflict_on_username_or_email() {
        let service = service();
        service
            .signup(signup_request("alice", "alice@example.com", "Secret1!"))
            .await
            .unwrap();

        let err = service
            .signup(signup_request("alice", "other@example.com", "Secret1!"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UsernameOrEmailTaken));

        let err = service
            .signup(signup_request("bob", "alice@example.com", "Secret1!"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UsernameOrEmailTaken));
    }

    #[tokio::test]
    async fn login_anti_enumeration() {
        let service = service();
        service
            .signup(signup_request("alice", "alice@example.com", "Secret1!"))
            .await
            .unwrap();

        let unknown = service
            .login(login_request("ghost", "Secret1!", None), meta())
            .await
            .unwrap_err();
        let wrong_password = service
            .login(login_request("alice", "Wrong1!", None), meta())
            .await
            .unwrap_err();
        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert!(matches!(wrong_password, AuthError::InvalidCredentials));
        assert_eq!(unknown.to_string(), wrong_password.to_string());
    }

    #[tokio::test]
    async fn wrong_password_writes_history_row_unknown_user_does_not() {
        let service = service();
        let user = service
            .signup(signup_request("alice", "alice@example.com", "Secret1!"))
            .await
            .unwrap();

        let _ = service
            .login(login_request("ghost", "Secret1!", None), meta())
            .await;
        let _ = service
            .login(login_request("alice", "Wrong1!", None), meta())
            .await;

        let history = service.store.history_for(user.user_id).await;
        assert_eq!(history.len(), 1);
        assert!(!history[0].login_status);
        assert_eq!(history[0].ip_address, "203.0.113.7");
    }

    #[tokio::test]
    async fn login_without_mfa_succeeds_and_logs() {
        let service = service();
        let user = service
            .signup(signup_request("alice", "alice@example.com", "Secret1!"))
            .await
            .unwrap();

        let outcome = service
            .login(login_request("alice", "Secret1!", None), meta())
            .await
            .unwrap();
        let LoginOutcome::Success(session) = outcome else {
            panic!("expected success without MFA");
        };
        assert_eq!(session.claims.user_id, user.user_id);
        assert_eq!(session.claims.email, "alice@example.com");

        let history = service.store.history_for(user.user_id).await;
        assert_eq!(history.len(), 1);
        assert!(history[0].login_status);

        let stored = service.store.find_by_id(user.user_id).await.unwrap().unwrap();
        assert!(stored.last_login_at.is_some());

        let issued = service.sessions.issued().await;
        assert_eq!(issued.len(), 1);
        assert!(!issued[0].persistent);
    }

    #[tokio::test]
    async fn login_by_email_also_works() {
        let service = service();
        service
            .signup(signup_request("alice", "alice@example.com", "Secret1!"))
            .await
            .unwrap();
        let outcome = service
            .login(login_request("alice@example.com", "Secret1!", None), meta())
            .await
            .unwrap();
        assert!(matches!(outcome, LoginOutcome::Success(_)));
    }

    #[tokio::test]
    async fn login_accepts_email_as_typed_at_signup() {
        let service = service();
        service
            .signup(signup_request("alice", "Alice@Example.com", "Secret1!"))
            .await
            .unwrap();
        // The stored email is lowercased; the login needle is not.
        let outcome = service
            .login(login_request("Alice@Example.com", "Secret1!", None), meta())
            .await
            .unwrap();
        assert!(matches!(outcome, LoginOutcome::Success(_)));
    }

    #[tokio::test]
    async fn remember_me_issues_persistent_session() {
        let service = service();
        service
            .signup(signup_request("alice", "alice@example.com", "Secret1!"))
            .await
            .unwrap();
        let mut request = login_request("alice", "Secret1!", None);
        request.remember_me = true;
        service.login(request, meta()).await.unwrap();
        let issued = service.sessions.issued().await;
        assert!(issued[0].persistent);
    }

    #[tokio::test]
    async fn enrollment_issues_secret_once_and_enables_on_valid_code() {
        let service = service();
        let user = service
            .signup(signup_request("alice", "alice@example.com", "Secret1!"))
            .await
            .unwrap();

        let first = service.mfa_setup_begin(user.user_id).await.unwrap();
        let second = service.mfa_setup_begin(user.user_id).await.unwrap();
        // Idempotent: the secret survives repeated views.
        assert_eq!(first.manual_entry_key, second.manual_entry_key);
        assert!(first.otpauth_url.contains("alice%40example.com"));

        let secret = first.manual_entry_key.clone();
        let outcome = service
            .mfa_setup_confirm(user.user_id, &wrong_code(&secret))
            .await
            .unwrap();
        let MfaSetupOutcome::Rejected(view) = outcome else {
            panic!("expected rejection for a wrong code");
        };
        assert_eq!(view.manual_entry_key, secret);
        let settings = service.store.mfa_settings(user.user_id).await.unwrap().unwrap();
        assert!(!settings.is_enabled);

        let outcome = service
            .mfa_setup_confirm(user.user_id, &current_code(&secret))
            .await
            .unwrap();
        assert!(matches!(outcome, MfaSetupOutcome::Enabled));
        let settings = service.store.mfa_settings(user.user_id).await.unwrap().unwrap();
        assert!(settings.is_enabled);
        assert_eq!(settings.secret_key, secret);
    }

    #[tokio::test]
    async fn enrollment_for_missing_user_is_not_found() {
        let service = service();
        let err = service.mfa_setup_begin(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AuthError::UserNotFound));
        let err = service
            .mfa_setup_confirm(Uuid::new_v4(), "123456")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UserNotFound));
    }

    #[tokio::test]
    async fn confirm_before_begin_is_rejected() {
        let service = service();
        let user = service
            .signup(signup_request("alice", "alice@example.com", "Secret1!"))
            .await
            .unwrap();
        let err = service
            .mfa_setup_confirm(user.user_id, "123456")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidMfaCode));
    }

    #[tokio::test]
    async fn mfa_gate_pauses_then_completes() {
        let service = service();
        let user = service
            .signup(signup_request("alice", "alice@example.com", "Secret1!"))
            .await
            .unwrap();
        let setup = service.mfa_setup_begin(user.user_id).await.unwrap();
        let secret = setup.manual_entry_key.clone();
        service
            .mfa_setup_confirm(user.user_id, &current_code(&secret))
            .await
            .unwrap();

        // No code: continuation, nothing persisted.
        let outcome = service
            .login(login_request("alice", "Secret1!", None), meta())
            .await
            .unwrap();
        assert!(matches!(outcome, LoginOutcome::MfaRequired));
        assert!(service.store.history_for(user.user_id).await.is_empty());

        // Wrong code: rejected, still no history row.
        let err = service
            .login(
                login_request("alice", "Secret1!", Some(&wrong_code(&secret))),
                meta(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidMfaCode));
        assert!(service.store.history_for(user.user_id).await.is_empty());

        // Correct code on the second leg: success, one history row.
        let outcome = service
            .login(
                login_request("alice", "Secret1!", Some(&current_code(&secret))),
                meta(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, LoginOutcome::Success(_)));
        let history = service.store.history_for(user.user_id).await;
        assert_eq!(history.len(), 1);
        assert!(history[0].login_status);
    }

    #[tokio::test]
    async fn blank_mfa_code_counts_as_missing() {
        let service = service();
        let user = service
            .signup(signup_request("alice", "alice@example.com", "Secret1!"))
            .await
            .unwrap();
        let setup = service.mfa_setup_begin(user.user_id).await.unwrap();
        service
            .mfa_setup_confirm(user.user_id, &current_code(&setup.manual_entry_key))
            .await
            .unwrap();

        let outcome = service
            .login(login_request("alice", "Secret1!", Some("   ")), meta())
            .await
            .unwrap();
        assert!(matches!(outcome, LoginOutcome::MfaRequired));
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let service = service();
        service
            .signup(signup_request("alice", "alice@example.com", "Secret1!"))
            .await
            .unwrap();
        let outcome = service
            .login(login_request("alice", "Secret1!", None), meta())
            .await
            .unwrap();
        let LoginOutcome::Success(session) = outcome else {
            panic!("expected success");
        };
        service.logout(&session.token).await.unwrap();
        service.logout(&session.token).await.unwrap();
        let ended = service.sessions.ended().await;
        assert_eq!(ended.len(), 2);
    }

    /// Delegating store with switchable faults on the write paths.
    struct FaultyStore {
        inner: InMemoryUserStore,
        conflict_on_create: bool,
        fail_history: bool,
    }

    impl FaultyStore {
        fn conflicting() -> Self {
            Self {
                inner: InMemoryUserStore::new(),
                conflict_on_create: true,
                fail_history: false,
            }
        }

        fn failing_history() -> Self {
            Self {
                inner: InMemoryUserStore::new(),
                conflict_on_create: false,
                fail_history: true,
            }
        }
    }

    #[async_trait::async_trait]
    impl UserStore for FaultyStore {
        async fn find_by_username_or_email(&self, needle: &str) -> anyhow::Result<Option<User>> {
            self.inner.find_by_username_or_email(needle).await
        }

        async fn find_by_id(&self, user_id: Uuid) -> anyhow::Result<Option<User>> {
            self.inner.find_by_id(user_id).await
        }

        async fn create_user(&self, new_user: NewUser) -> anyhow::Result<CreateUserOutcome> {
            if self.conflict_on_create {
                // A concurrent signup won the race after our pre-check.
                return Ok(CreateUserOutcome::Conflict);
            }
            self.inner.create_user(new_user).await
        }

        async fn create_mfa_settings(&self, user_id: Uuid) -> anyhow::Result<MfaSettings> {
            self.inner.create_mfa_settings(user_id).await
        }

        async fn mfa_settings(&self, user_id: Uuid) -> anyhow::Result<Option<MfaSettings>> {
            self.inner.mfa_settings(user_id).await
        }

        async fn update_mfa_secret(&self, user_id: Uuid, secret: &str) -> anyhow::Result<()> {
            self.inner.update_mfa_secret(user_id, secret).await
        }

        async fn set_mfa_enabled(&self, user_id: Uuid, enabled: bool) -> anyhow::Result<()> {
            self.inner.set_mfa_enabled(user_id, enabled).await
        }

        async fn append_history(&self, entry: NewHistoryEntry) -> anyhow::Result<()> {
            if self.fail_history {
                anyhow::bail!("history table unavailable");
            }
            self.inner.append_history(entry).await
        }

        async fn update_last_login(
            &self,
            user_id: Uuid,
            at: DateTime<Utc>,
        ) -> anyhow::Result<()> {
            self.inner.update_last_login(user_id, at).await
        }
    }

    #[tokio::test]
    async fn write_time_conflict_is_authoritative() {
        // The pre-check passes (empty store); the insert itself reports the
        // conflict, and it surfaces exactly like a pre-check hit.
        let service = AuthService::new(
            FaultyStore::conflicting(),
            RecordingSessionIssuer::new(),
            AuthConfig::new(),
        );
        let err = service
            .signup(signup_request("alice", "alice@example.com", "Secret1!"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UsernameOrEmailTaken));
    }

    #[tokio::test]
    async fn history_append_failure_does_not_gate_login() {
        let observer = Arc::new(CollectingObserver(Mutex::new(Vec::new())));
        let service = AuthService::new(
            FaultyStore::failing_history(),
            RecordingSessionIssuer::new(),
            AuthConfig::new(),
        )
        .with_observer(observer.clone());
        service
            .signup(signup_request("alice", "alice@example.com", "Secret1!"))
            .await
            .unwrap();

        let outcome = service
            .login(login_request("alice", "Secret1!", None), meta())
            .await
            .unwrap();
        assert!(matches!(outcome, LoginOutcome::Success(_)));

        let seen = observer.0.lock().unwrap();
        assert!(seen
            .iter()
            .any(|event| matches!(event, AuthEvent::HistoryWriteFailed { .. })));
    }

    struct CollectingObserver(Mutex<Vec<AuthEvent>>);

    impl AuthObserver for CollectingObserver {
        fn observe(&self, event: &AuthEvent) {
            if let Ok(mut seen) = self.0.lock() {
                seen.push(event.clone());
            }
        }
    }

    #[tokio::test]
    async fn observer_sees_decision_points_in_order() {
        let observer = Arc::new(CollectingObserver(Mutex::new(Vec::new())));
        let service = service().with_observer(observer.clone());
        service
            .signup(signup_request("alice", "alice@example.com", "Secret1!"))
            .await
            .unwrap();
        service
            .login(login_request("alice", "Secret1!", None), meta())
            .await
            .unwrap();

        let seen = observer.0.lock().unwrap();
        let names: Vec<&str> = seen
            .iter()
            .map(|event| match event {
                AuthEvent::SignupCompleted { .. } => "signup",
                AuthEvent::PasswordVerified { .. } => "password",
                AuthEvent::LoginCompleted { .. } => "login",
                _ => "other",
            })
            .collect();
        assert_eq!(names, vec!["signup", "password", "login"]);
    }

    #[test]
    fn email_validation() {
        assert!(valid_email("a@example.com"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-domain@"));
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }
}
