//! User repository
//!
//! Database operations for forum members.
//!
//! This module provides:
//! - `UserRepository` trait defining the interface for user data access
//! - `SqlxUserRepository` implementing the trait for SQLite
//!
//! Every method takes the connection to run on, so callers decide whether a
//! lookup happens inside their transaction or on a plain pooled connection.

use crate::models::User;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use std::sync::Arc;

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new user and return it with its assigned ID
    async fn create(&self, conn: &mut SqliteConnection, user: &User) -> Result<User>;

    /// Get user by ID
    async fn get_by_id(&self, conn: &mut SqliteConnection, id: i64) -> Result<Option<User>>;

    /// Get user by nick
    async fn get_by_nick(&self, conn: &mut SqliteConnection, nick: &str) -> Result<Option<User>>;

    /// Record a successful login
    async fn update_last_login(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Grant or revoke the moderator flag
    async fn set_moderator(&self, conn: &mut SqliteConnection, id: i64, moderator: bool)
        -> Result<()>;
}

/// SQLx-based user repository implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlxUserRepository;

impl SqlxUserRepository {
    pub fn new() -> Self {
        Self
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed() -> Arc<dyn UserRepository> {
        Arc::new(Self::new())
    }
}

const USER_COLUMNS: &str = "id, nick, email, password_hash, can_moderate, can_correct, blocked, score, last_login, created_at";

#[async_trait]
impl UserRepository for SqlxUserRepository {
    async fn create(&self, conn: &mut SqliteConnection, user: &User) -> Result<User> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (nick, email, password_hash, can_moderate, can_correct, blocked, score, last_login, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.nick)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.can_moderate)
        .bind(user.can_correct)
        .bind(user.blocked)
        .bind(user.score)
        .bind(user.last_login)
        .bind(user.created_at)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to create user {}", user.nick))?;

        Ok(User {
            id: result.last_insert_rowid(),
            ..user.clone()
        })
    }

    async fn get_by_id(&self, conn: &mut SqliteConnection, id: i64) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to get user by ID")?;

        row.map(|r| row_to_user(&r)).transpose()
    }

    async fn get_by_nick(&self, conn: &mut SqliteConnection, nick: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE nick = ?", USER_COLUMNS))
            .bind(nick)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to get user by nick")?;

        row.map(|r| row_to_user(&r)).transpose()
    }

    async fn update_last_login(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(at)
            .bind(id)
            .execute(&mut *conn)
            .await
            .context("Failed to update last login")?;
        Ok(())
    }

    async fn set_moderator(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
        moderator: bool,
    ) -> Result<()> {
        sqlx::query("UPDATE users SET can_moderate = ? WHERE id = ?")
            .bind(moderator)
            .bind(id)
            .execute(&mut *conn)
            .await
            .context("Failed to update moderator flag")?;
        Ok(())
    }
}

fn row_to_user(row: &SqliteRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        nick: row.try_get("nick")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        can_moderate: row.try_get("can_moderate")?,
        can_correct: row.try_get("can_correct")?,
        blocked: row.try_get("blocked")?,
        score: row.try_get("score")?,
        last_login: row.try_get("last_login")?,
        created_at: row.try_get("created_at")?,
    })
}
