//! Topic repository
//!
//! Database operations for forum topics (`topics` table).

use crate::models::{Message, NewMessage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use std::sync::Arc;

/// Topic repository trait
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Insert an uncommitted topic and return its ID
    async fn create(
        &self,
        conn: &mut SqliteConnection,
        message: &NewMessage,
        post_date: DateTime<Utc>,
    ) -> Result<i64>;

    /// Get a topic with its author's nick
    async fn get_by_id(&self, conn: &mut SqliteConnection, id: i64) -> Result<Option<Message>>;

    /// Mark a topic as committed. Returns `false` when it was already committed
    /// or does not exist.
    async fn commit(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
        commit_by: i64,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Uncommitted, non-deleted topics, oldest first
    async fn list_uncommitted(&self, conn: &mut SqliteConnection) -> Result<Vec<Message>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SqlxMessageRepository;

impl SqlxMessageRepository {
    pub fn new() -> Self {
        Self
    }

    pub fn boxed() -> Arc<dyn MessageRepository> {
        Arc::new(Self::new())
    }
}

const MESSAGE_SELECT: &str = r#"
    SELECT t.id, t.group_id, t.user_id, u.nick, t.title, t.message, t.url, t.linktext,
           t.image, t.committed, t.commit_date, t.deleted, t.comment_count, t.poster_ip,
           t.post_date
    FROM topics t
    JOIN users u ON u.id = t.user_id
"#;

#[async_trait]
impl MessageRepository for SqlxMessageRepository {
    async fn create(
        &self,
        conn: &mut SqliteConnection,
        message: &NewMessage,
        post_date: DateTime<Utc>,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO topics (group_id, user_id, title, message, url, linktext, image, poster_ip, post_date)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(message.group_id)
        .bind(message.author_id)
        .bind(&message.title)
        .bind(&message.message)
        .bind(&message.url)
        .bind(&message.linktext)
        .bind(&message.image)
        .bind(&message.poster_ip)
        .bind(post_date)
        .execute(&mut *conn)
        .await
        .context("Failed to create topic")?;

        Ok(result.last_insert_rowid())
    }

    async fn get_by_id(&self, conn: &mut SqliteConnection, id: i64) -> Result<Option<Message>> {
        let row = sqlx::query(&format!("{} WHERE t.id = ?", MESSAGE_SELECT))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to get topic")?;

        row.map(|r| row_to_message(&r)).transpose()
    }

    async fn commit(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
        commit_by: i64,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE topics SET committed = 1, commit_date = ?, commit_by = ? WHERE id = ? AND committed = 0",
        )
        .bind(at)
        .bind(commit_by)
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to commit topic")?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_uncommitted(&self, conn: &mut SqliteConnection) -> Result<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "{} WHERE t.committed = 0 AND t.deleted = 0 ORDER BY t.post_date, t.id",
            MESSAGE_SELECT
        ))
        .fetch_all(&mut *conn)
        .await
        .context("Failed to list uncommitted topics")?;

        rows.iter().map(row_to_message).collect()
    }
}

fn row_to_message(row: &SqliteRow) -> Result<Message> {
    Ok(Message {
        id: row.try_get("id")?,
        group_id: row.try_get("group_id")?,
        author_id: row.try_get("user_id")?,
        author_nick: row.try_get("nick")?,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        url: row.try_get("url")?,
        linktext: row.try_get("linktext")?,
        image: row.try_get("image")?,
        committed: row.try_get("committed")?,
        commit_date: row.try_get("commit_date")?,
        deleted: row.try_get("deleted")?,
        comment_count: row.try_get("comment_count")?,
        poster_ip: row.try_get("poster_ip")?,
        post_date: row.try_get("post_date")?,
    })
}
