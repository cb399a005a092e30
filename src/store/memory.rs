//! In-memory collaborators backing the unit and end-to-end tests, and usable
//! as a throwaway store for demos. Uniqueness and append-only semantics match
//! the Postgres implementation.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::store::{CreateUserOutcome, SessionIssuer, UserStore};
use crate::auth::types::{
    AuthenticationHistory, MfaSettings, NewHistoryEntry, NewUser, SessionClaims, SessionToken,
    User,
};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    mfa: Vec<MfaSettings>,
    history: Vec<AuthenticationHistory>,
}

/// Vec-backed tables guarded by a single `RwLock`; attempts serialize on
/// writes the way a transaction per attempt would.
#[derive(Default)]
pub struct InMemoryUserStore {
    tables: RwLock<Tables>,
}

impl InMemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a user's history rows, oldest first.
    pub async fn history_for(&self, user_id: Uuid) -> Vec<AuthenticationHistory> {
        let tables = self.tables.read().await;
        tables
            .history
            .iter()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_username_or_email(&self, needle: &str) -> Result<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .iter()
            .find(|user| user.username == needle || user.email == needle)
            .cloned())
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .iter()
            .find(|user| user.user_id == user_id)
            .cloned())
    }

    async fn create_user(&self, new_user: NewUser) -> Result<CreateUserOutcome> {
        let mut tables = self.tables.write().await;
        let taken = tables.users.iter().any(|user| {
            user.username == new_user.username || user.email == new_user.email
        });
        if taken {
            return Ok(CreateUserOutcome::Conflict);
        }
        let user = User {
            user_id: Uuid::new_v4(),
            username: new_user.username,
            email: new_user.email,
            password_hash: new_user.password_hash,
            password_salt: new_user.password_salt,
            is_email_confirmed: false,
            created_at: Utc::now(),
            last_login_at: None,
        };
        tables.users.push(user.clone());
        Ok(CreateUserOutcome::Created(user))
    }

    async fn create_mfa_settings(&self, user_id: Uuid) -> Result<MfaSettings> {
        let mut tables = self.tables.write().await;
        if tables.mfa.iter().any(|settings| settings.user_id == user_id) {
            return Err(anyhow!("MFA settings already exist for user {user_id}"));
        }
        let settings = MfaSettings {
            mfa_settings_id: Uuid::new_v4(),
            user_id,
            is_enabled: false,
            secret_key: String::new(),
            created_at: Utc::now(),
        };
        tables.mfa.push(settings.clone());
        Ok(settings)
    }

    async fn mfa_settings(&self, user_id: Uuid) -> Result<Option<MfaSettings>> {
        let tables = self.tables.read().await;
        Ok(tables
            .mfa
            .iter()
            .find(|settings| settings.user_id == user_id)
            .cloned())
    }

    async fn update_mfa_secret(&self, user_id: Uuid, secret: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        let settings = tables
            .mfa
            .iter_mut()
            .find(|settings| settings.user_id == user_id)
            .ok_or_else(|| anyhow!("no MFA settings for user {user_id}"))?;
        settings.secret_key = secret.to_string();
        Ok(())
    }

    async fn set_mfa_enabled(&self, user_id: Uuid, enabled: bool) -> Result<()> {
        let mut tables = self.tables.write().await;
        let settings = tables
            .mfa
            .iter_mut()
            .find(|settings| settings.user_id == user_id)
            .ok_or_else(|| anyhow!("no MFA settings for user {user_id}"))?;
        settings.is_enabled = enabled;
        Ok(())
    }

    async fn append_history(&self, entry: NewHistoryEntry) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.history.push(AuthenticationHistory {
            auth_history_id: Uuid::new_v4(),
            user_id: entry.user_id,
            login_at: Utc::now(),
            login_status: entry.login_status,
            ip_address: entry.ip_address,
            user_agent: entry.user_agent,
        });
        Ok(())
    }

    async fn update_last_login(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .iter_mut()
            .find(|user| user.user_id == user_id)
            .ok_or_else(|| anyhow!("no user {user_id}"))?;
        user.last_login_at = Some(at);
        Ok(())
    }
}

/// A session handed out by [`RecordingSessionIssuer`].
#[derive(Clone, Debug)]
pub struct IssuedSession {
    pub claims: SessionClaims,
    pub persistent: bool,
    pub token: SessionToken,
}

/// Session issuer that records every issue/end call for assertions.
#[derive(Default)]
pub struct RecordingSessionIssuer {
    issued: RwLock<Vec<IssuedSession>>,
    ended: RwLock<Vec<SessionToken>>,
}

impl RecordingSessionIssuer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn issued(&self) -> Vec<IssuedSession> {
        self.issued.read().await.clone()
    }

    pub async fn ended(&self) -> Vec<SessionToken> {
        self.ended.read().await.clone()
    }
}

#[async_trait]
impl SessionIssuer for RecordingSessionIssuer {
    async fn issue(&self, claims: &SessionClaims, persistent: bool) -> Result<SessionToken> {
        let token = SessionToken::from(Uuid::new_v4().simple().to_string());
        self.issued.write().await.push(IssuedSession {
            claims: claims.clone(),
            persistent,
            token: token.clone(),
        });
        Ok(token)
    }

    async fn end(&self, token: &SessionToken) -> Result<()> {
        // Idempotent by design; unknown tokens are recorded all the same.
        self.ended.write().await.push(token.clone());
        Ok(())
    }
}
