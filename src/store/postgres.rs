//! Postgres-backed collaborators.
//!
//! The `users`/`user_mfa_settings` uniqueness constraints are the source of
//! truth for signup conflicts: SQLSTATE 23505 at insert time maps to
//! [`CreateUserOutcome::Conflict`], so the service's pre-check stays a pure
//! optimization. Session tokens are random 32-byte values returned raw to
//! the caller; only their SHA-256 hash is stored.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::store::{CreateUserOutcome, SessionIssuer, UserStore};
use crate::auth::types::{
    MfaSettings, NewHistoryEntry, NewUser, SessionClaims, SessionToken, User,
};

const DEFAULT_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;
const DEFAULT_PERSISTENT_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;

/// `UserStore` over a Postgres pool.
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn user_from_row(row: &PgRow) -> User {
    User {
        user_id: row.get("user_id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        password_salt: row.get("password_salt"),
        is_email_confirmed: row.get("is_email_confirmed"),
        created_at: row.get("created_at"),
        last_login_at: row.get("last_login_at"),
    }
}

fn settings_from_row(row: &PgRow) -> MfaSettings {
    MfaSettings {
        mfa_settings_id: row.get("mfa_settings_id"),
        user_id: row.get("user_id"),
        is_enabled: row.get("is_enabled"),
        secret_key: row.get("secret_key"),
        created_at: row.get("created_at"),
    }
}

const USER_COLUMNS: &str = "user_id, username, email, password_hash, password_salt, \
                            is_email_confirmed, created_at, last_login_at";

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_username_or_email(&self, needle: &str) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1 OR email = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let row = sqlx::query(&query)
            .bind(needle)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by username or email")?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let row = sqlx::query(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by id")?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn create_user(&self, new_user: NewUser) -> Result<CreateUserOutcome> {
        let query = r"
            INSERT INTO users
                (user_id, username, email, password_hash, password_salt,
                 is_email_confirmed, created_at)
            VALUES ($1, $2, $3, $4, $5, FALSE, $6)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let user_id = Uuid::new_v4();
        let created_at = Utc::now();
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(&new_user.username)
            .bind(&new_user.email)
            .bind(&new_user.password_hash)
            .bind(&new_user.password_salt)
            .bind(created_at)
            .execute(&self.pool)
            .instrument(span)
            .await;

        match result {
            Ok(_) => Ok(CreateUserOutcome::Created(User {
                user_id,
                username: new_user.username,
                email: new_user.email,
                password_hash: new_user.password_hash,
                password_salt: new_user.password_salt,
                is_email_confirmed: false,
                created_at,
                last_login_at: None,
            })),
            Err(err) if is_unique_violation(&err) => Ok(CreateUserOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert user"),
        }
    }

    async fn create_mfa_settings(&self, user_id: Uuid) -> Result<MfaSettings> {
        let query = r"
            INSERT INTO user_mfa_settings
                (mfa_settings_id, user_id, is_enabled, secret_key, created_at)
            VALUES ($1, $2, FALSE, '', $3)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let mfa_settings_id = Uuid::new_v4();
        let created_at = Utc::now();
        sqlx::query(query)
            .bind(mfa_settings_id)
            .bind(user_id)
            .bind(created_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert MFA settings")?;
        Ok(MfaSettings {
            mfa_settings_id,
            user_id,
            is_enabled: false,
            secret_key: String::new(),
            created_at,
        })
    }

    async fn mfa_settings(&self, user_id: Uuid) -> Result<Option<MfaSettings>> {
        let query = r"
            SELECT mfa_settings_id, user_id, is_enabled, secret_key, created_at
            FROM user_mfa_settings
            WHERE user_id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup MFA settings")?;
        Ok(row.as_ref().map(settings_from_row))
    }

    async fn update_mfa_secret(&self, user_id: Uuid, secret: &str) -> Result<()> {
        let query = "UPDATE user_mfa_settings SET secret_key = $2 WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(secret)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update MFA secret")?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("no MFA settings row for user {user_id}"));
        }
        Ok(())
    }

    async fn set_mfa_enabled(&self, user_id: Uuid, enabled: bool) -> Result<()> {
        let query = "UPDATE user_mfa_settings SET is_enabled = $2 WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(enabled)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update MFA enabled flag")?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("no MFA settings row for user {user_id}"));
        }
        Ok(())
    }

    async fn append_history(&self, entry: NewHistoryEntry) -> Result<()> {
        let query = r"
            INSERT INTO authentication_history
                (auth_history_id, user_id, login_at, login_status, ip_address, user_agent)
            VALUES ($1, $2, NOW(), $3, $4, $5)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(Uuid::new_v4())
            .bind(entry.user_id)
            .bind(entry.login_status)
            .bind(&entry.ip_address)
            .bind(&entry.user_agent)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to append authentication history")?;
        Ok(())
    }

    async fn update_last_login(&self, user_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let query = "UPDATE users SET last_login_at = $2 WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update last login")?;
        Ok(())
    }
}

/// `SessionIssuer` over a Postgres pool. Persistent (remember-me) sessions
/// get the longer TTL.
#[derive(Clone)]
pub struct PgSessionIssuer {
    pool: PgPool,
    session_ttl_seconds: i64,
    persistent_ttl_seconds: i64,
}

impl PgSessionIssuer {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            persistent_ttl_seconds: DEFAULT_PERSISTENT_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_ttl_seconds(mut self, session: i64, persistent: i64) -> Self {
        self.session_ttl_seconds = session;
        self.persistent_ttl_seconds = persistent;
        self
    }
}

#[async_trait]
impl SessionIssuer for PgSessionIssuer {
    async fn issue(&self, claims: &SessionClaims, persistent: bool) -> Result<SessionToken> {
        let ttl_seconds = if persistent {
            self.persistent_ttl_seconds
        } else {
            self.session_ttl_seconds
        };
        let query = r"
            INSERT INTO user_sessions (user_id, session_hash, persistent, expires_at)
            VALUES ($1, $2, $3, NOW() + ($4 * INTERVAL '1 second'))
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );

        // Token collisions are as good as impossible, but the hash column is
        // unique, so retry a couple of times rather than fail the login.
        for _ in 0..3 {
            let token = generate_session_token()?;
            let token_hash = hash_session_token(&token);
            let result = sqlx::query(query)
                .bind(claims.user_id)
                .bind(token_hash)
                .bind(persistent)
                .bind(ttl_seconds)
                .execute(&self.pool)
                .instrument(span.clone())
                .await;

            match result {
                Ok(_) => return Ok(SessionToken::from(token)),
                Err(err) if is_unique_violation(&err) => {}
                Err(err) => return Err(err).context("failed to insert session"),
            }
        }

        Err(anyhow!("failed to generate unique session token"))
    }

    async fn end(&self, token: &SessionToken) -> Result<()> {
        // Idempotent; it's fine if no rows are deleted.
        let query = "DELETE FROM user_sessions WHERE session_hash = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(hash_session_token(token.as_str()))
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete session")?;
        Ok(())
    }
}

/// Create a new session token. The raw value is only returned to the caller
/// that completed login; the database stores a hash.
fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a session token so raw values never touch the database.
fn hash_session_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[test]
    fn generate_session_token_round_trip() {
        let decoded_len = generate_session_token()
            .ok()
            .and_then(|token| URL_SAFE_NO_PAD.decode(token.as_bytes()).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(32));
    }

    #[test]
    fn hash_session_token_stable() {
        let first = hash_session_token("token");
        let second = hash_session_token("token");
        let different = hash_session_token("other");
        assert_eq!(first, second);
        assert_ne!(first, different);
    }

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn is_unique_violation_matches_sqlstate() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("99999"),
        }));
        assert!(!is_unique_violation(&err));

        let err = sqlx::Error::RowNotFound;
        assert!(!is_unique_violation(&err));
    }
}
