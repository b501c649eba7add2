//! User service
//!
//! Login, server-side sessions, remember-me cookies, member registration
//! and display profiles.

use crate::db::repositories::{ProfileRepository, SessionRepository, UserRepository};
use crate::db::DynDatabasePool;
use crate::models::{Profile, Session, User, ANONYMOUS_NICK};
use crate::services::password::{hash_password, tokens_match, verify_password};
use anyhow::Context;
use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::SqliteConnection;
use std::sync::Arc;
use uuid::Uuid;

/// Longest accepted login name, in characters
pub const MAX_NICK_LENGTH: usize = 80;

static LOGIN_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\p{L}[\p{L}\d_-]*$").expect("login name pattern is valid")
});

/// Error types for user service operations
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    /// Wrong password or refused login
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    /// No member with this nick
    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("User already exists: {0}")]
    UserExists(String),

    #[error("Access violation: {0}")]
    AccessViolation(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Whether `name` is acceptable as a login name
pub fn check_login_name(name: &str) -> bool {
    name.chars().count() <= MAX_NICK_LENGTH && LOGIN_NAME_RE.is_match(name)
}

/// Names nobody may register
pub fn is_reserved_name(name: &str) -> bool {
    name == ANONYMOUS_NICK || name.starts_with('_')
}

/// User service for logins and sessions
pub struct UserService {
    pool: DynDatabasePool,
    user_repo: Arc<dyn UserRepository>,
    session_repo: Arc<dyn SessionRepository>,
    profile_repo: Arc<dyn ProfileRepository>,
    session_days: i64,
    secret: String,
}

impl UserService {
    pub fn new(
        pool: DynDatabasePool,
        user_repo: Arc<dyn UserRepository>,
        session_repo: Arc<dyn SessionRepository>,
        profile_repo: Arc<dyn ProfileRepository>,
        session_days: i64,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            user_repo,
            session_repo,
            profile_repo,
            session_days,
            secret: secret.into(),
        }
    }

    /// Register a new member
    pub async fn register(
        &self,
        nick: &str,
        password: &str,
        email: Option<String>,
    ) -> Result<User, UserServiceError> {
        if !check_login_name(nick) {
            return Err(UserServiceError::ValidationError(format!(
                "Invalid login name: '{}'",
                nick
            )));
        }
        if is_reserved_name(nick) {
            return Err(UserServiceError::ValidationError(format!(
                "Reserved login name: '{}'",
                nick
            )));
        }
        if password.is_empty() {
            return Err(UserServiceError::ValidationError(
                "Password cannot be empty".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        if self.user_repo.get_by_nick(&mut tx, nick).await?.is_some() {
            return Err(UserServiceError::UserExists(nick.to_string()));
        }

        let mut user = User::new(nick.to_string(), hash_password(password)?);
        user.email = email;
        let user = self.user_repo.create(&mut tx, &user).await?;
        tx.commit().await.context("Failed to commit registration")?;

        tracing::info!("Registered user {} (id {})", user.nick, user.id);
        Ok(user)
    }

    /// Make an existing member a moderator
    pub async fn grant_moderator(&self, user_id: i64) -> Result<(), UserServiceError> {
        let mut conn = self.pool.acquire().await?;
        self.user_repo.set_moderator(&mut conn, user_id, true).await?;
        Ok(())
    }

    /// Verify credentials and open a session
    pub async fn login(&self, nick: &str, password: &str) -> Result<(User, Session), UserServiceError> {
        let mut tx = self.pool.begin().await?;

        let user = self.authenticate(&mut tx, nick, password).await?;
        if user.blocked {
            tracing::info!("Refused login of blocked user {}", user.nick);
            return Err(UserServiceError::AuthenticationError(
                "User is blocked".to_string(),
            ));
        }

        let session = self.start_session(&mut tx, &user).await?;
        tx.commit().await.context("Failed to commit login")?;

        Ok((user, session))
    }

    /// Look a member up and check the password, on the caller's connection
    pub async fn authenticate(
        &self,
        conn: &mut SqliteConnection,
        nick: &str,
        password: &str,
    ) -> Result<User, UserServiceError> {
        let user = self
            .user_repo
            .get_by_nick(conn, nick)
            .await?
            .ok_or_else(|| UserServiceError::UserNotFound(nick.to_string()))?;

        let valid = verify_password(password, &user.password_hash)
            .context("Failed to verify password")?;
        if !valid {
            return Err(UserServiceError::AuthenticationError(
                "Bad password".to_string(),
            ));
        }

        Ok(user)
    }

    /// Log in from the `profile` / `password` cookies.
    ///
    /// Returns `None` when the cookies do not match a non-blocked member.
    pub async fn restore_login(
        &self,
        nick: &str,
        token: &str,
    ) -> Result<Option<(User, Session)>, UserServiceError> {
        if nick.is_empty() || nick == ANONYMOUS_NICK {
            return Ok(None);
        }

        let mut tx = self.pool.begin().await?;

        let Some(user) = self.user_repo.get_by_nick(&mut tx, nick).await? else {
            tracing::warn!("Can't restore login for unknown user {}", nick);
            return Ok(None);
        };
        if user.blocked || !tokens_match(&user.remember_me_token(&self.secret), token) {
            return Ok(None);
        }

        let session = self.start_session(&mut tx, &user).await?;
        tx.commit().await.context("Failed to commit restored login")?;

        tracing::debug!("Restored login of {}", user.nick);
        Ok(Some((user, session)))
    }

    /// Token for the `password` remember-me cookie
    pub fn remember_me_token(&self, user: &User) -> String {
        user.remember_me_token(&self.secret)
    }

    /// Drop a session
    pub async fn logout(&self, session_id: &str) -> Result<(), UserServiceError> {
        let mut conn = self.pool.acquire().await?;
        self.session_repo
            .delete(&mut conn, session_id)
            .await
            .context("Failed to delete session")?;
        Ok(())
    }

    /// The member owning a live session; expired sessions are removed
    pub async fn validate_session(&self, token: &str) -> Result<Option<User>, UserServiceError> {
        let mut conn = self.pool.acquire().await?;

        let Some(session) = self.session_repo.get_by_id(&mut conn, token).await? else {
            return Ok(None);
        };

        if session.is_expired() {
            self.session_repo.delete(&mut conn, token).await?;
            return Ok(None);
        }

        let user = self.user_repo.get_by_id(&mut conn, session.user_id).await?;
        Ok(user.filter(|u| !u.blocked))
    }

    /// Look a member up by login name
    pub async fn get_by_nick(&self, nick: &str) -> Result<Option<User>, UserServiceError> {
        let mut conn = self.pool.acquire().await?;
        Ok(self.user_repo.get_by_nick(&mut conn, nick).await?)
    }

    /// Remove every expired session
    pub async fn cleanup_expired_sessions(&self) -> Result<u64, UserServiceError> {
        let mut conn = self.pool.acquire().await?;
        Ok(self.session_repo.delete_expired(&mut conn).await?)
    }

    /// Display profile of `nick`.
    ///
    /// Unknown members, the anonymous account and unreadable rows all get
    /// the default profile.
    pub async fn read_profile(&self, nick: &str) -> Profile {
        if nick == ANONYMOUS_NICK {
            return Profile::default();
        }

        let stored = match self.pool.acquire().await {
            Ok(mut conn) => self.profile_repo.get(&mut conn, nick).await,
            Err(e) => Err(e),
        };
        match stored {
            Ok(Some(profile)) => profile,
            Ok(None) => Profile::default(),
            Err(e) => {
                tracing::info!("Bad profile for user {}: {:#}", nick, e);
                Profile::default()
            }
        }
    }

    /// Store the display profile of `nick`
    pub async fn write_profile(&self, nick: &str, profile: &Profile) -> Result<(), UserServiceError> {
        if nick.starts_with('_') {
            return Err(UserServiceError::AccessViolation(
                "Can't change a special profile".to_string(),
            ));
        }
        if !check_login_name(nick) {
            return Err(UserServiceError::AccessViolation(format!(
                "Invalid user name: '{}'",
                nick
            )));
        }
        if nick == ANONYMOUS_NICK {
            return Err(UserServiceError::AccessViolation(
                "Can't change the default profile".to_string(),
            ));
        }
        if !profile.has_known_style() {
            return Err(UserServiceError::ValidationError(format!(
                "Unknown style: '{}'",
                profile.style
            )));
        }

        let mut conn = self.pool.acquire().await?;
        self.profile_repo.save(&mut conn, nick, profile).await?;
        tracing::debug!("Saved profile of {}", nick);
        Ok(())
    }

    async fn start_session(
        &self,
        conn: &mut SqliteConnection,
        user: &User,
    ) -> Result<Session, UserServiceError> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: user.id,
            expires_at: now + Duration::days(self.session_days),
            created_at: now,
        };

        let session = self.session_repo.create(conn, &session).await?;
        self.user_repo.update_last_login(conn, user.id, now).await?;
        Ok(session)
    }
}
