//! Session repository
//!
//! Database operations for server-side login sessions.

use crate::models::Session;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use std::sync::Arc;

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Create a new session
    async fn create(&self, conn: &mut SqliteConnection, session: &Session) -> Result<Session>;

    /// Get session by ID (token)
    async fn get_by_id(&self, conn: &mut SqliteConnection, id: &str) -> Result<Option<Session>>;

    /// Delete a session
    async fn delete(&self, conn: &mut SqliteConnection, id: &str) -> Result<()>;

    /// Delete expired sessions, returning how many were removed
    async fn delete_expired(&self, conn: &mut SqliteConnection) -> Result<u64>;
}

/// SQLx-based session repository implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlxSessionRepository;

impl SqlxSessionRepository {
    pub fn new() -> Self {
        Self
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed() -> Arc<dyn SessionRepository> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn create(&self, conn: &mut SqliteConnection, session: &Session) -> Result<Session> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, expires_at, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(session.user_id)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(&mut *conn)
        .await
        .context("Failed to create session")?;

        Ok(session.clone())
    }

    async fn get_by_id(&self, conn: &mut SqliteConnection, id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(
            "SELECT id, user_id, expires_at, created_at FROM sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to get session")?;

        row.map(|r| row_to_session(&r)).transpose()
    }

    async fn delete(&self, conn: &mut SqliteConnection, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await
            .context("Failed to delete session")?;
        Ok(())
    }

    async fn delete_expired(&self, conn: &mut SqliteConnection) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
            .bind(Utc::now())
            .execute(&mut *conn)
            .await
            .context("Failed to delete expired sessions")?;
        Ok(result.rows_affected())
    }
}

fn row_to_session(row: &SqliteRow) -> Result<Session> {
    Ok(Session {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}
