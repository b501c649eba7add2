//! Tag repository
//!
//! Database operations for tag values (`tags_values`) and the topic/tag
//! associations (`tags`).
//!
//! Counter bookkeeping and the get-or-create critical section live in
//! `TagService`; this layer only runs single statements.

use crate::models::Tag;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use std::sync::Arc;

/// Tag repository trait
#[async_trait]
pub trait TagRepository: Send + Sync {
    /// Get the ID of a tag value
    async fn find_id(&self, conn: &mut SqliteConnection, value: &str) -> Result<Option<i64>>;

    /// Id of a tag value, inserting it with a zero counter when missing
    async fn insert_missing(&self, conn: &mut SqliteConnection, value: &str) -> Result<i64>;

    /// Tag values of a topic ordered by value
    async fn get_message_tags(&self, conn: &mut SqliteConnection, msgid: i64)
        -> Result<Vec<String>>;

    /// Associate a tag with a topic
    async fn add_to_message(&self, conn: &mut SqliteConnection, msgid: i64, tag_id: i64)
        -> Result<()>;

    /// Remove a tag from a topic
    async fn remove_from_message(
        &self,
        conn: &mut SqliteConnection,
        msgid: i64,
        tag_id: i64,
    ) -> Result<()>;

    /// Add `delta` to a tag's reference counter
    async fn adjust_counter(&self, conn: &mut SqliteConnection, tag_id: i64, delta: i64)
        -> Result<()>;

    /// Tags with `counter > 1`, most used first
    async fn get_top(&self, conn: &mut SqliteConnection, limit: i64) -> Result<Vec<Tag>>;

    /// Tags with `counter > 0` ordered by value
    async fn get_used(&self, conn: &mut SqliteConnection) -> Result<Vec<Tag>>;
}

/// SQLx-based tag repository implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlxTagRepository;

impl SqlxTagRepository {
    pub fn new() -> Self {
        Self
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed() -> Arc<dyn TagRepository> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl TagRepository for SqlxTagRepository {
    async fn find_id(&self, conn: &mut SqliteConnection, value: &str) -> Result<Option<i64>> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM tags_values WHERE value = ?")
            .bind(value)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to look up tag")?;
        Ok(id)
    }

    async fn insert_missing(&self, conn: &mut SqliteConnection, value: &str) -> Result<i64> {
        // Writing first takes SQLite's write lock before anything is read
        sqlx::query(
            "INSERT INTO tags_values (value, counter) VALUES (?, 0) ON CONFLICT(value) DO NOTHING",
        )
        .bind(value)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to create tag '{}'", value))?;

        self.find_id(conn, value)
            .await?
            .with_context(|| format!("Tag '{}' vanished after insert", value))
    }

    async fn get_message_tags(
        &self,
        conn: &mut SqliteConnection,
        msgid: i64,
    ) -> Result<Vec<String>> {
        let values: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT tv.value
            FROM tags t
            JOIN tags_values tv ON tv.id = t.tagid
            WHERE t.msgid = ?
            ORDER BY tv.value
            "#,
        )
        .bind(msgid)
        .fetch_all(&mut *conn)
        .await
        .context("Failed to get topic tags")?;
        Ok(values)
    }

    async fn add_to_message(
        &self,
        conn: &mut SqliteConnection,
        msgid: i64,
        tag_id: i64,
    ) -> Result<()> {
        sqlx::query("INSERT INTO tags (msgid, tagid) VALUES (?, ?)")
            .bind(msgid)
            .bind(tag_id)
            .execute(&mut *conn)
            .await
            .context("Failed to add tag to topic")?;
        Ok(())
    }

    async fn remove_from_message(
        &self,
        conn: &mut SqliteConnection,
        msgid: i64,
        tag_id: i64,
    ) -> Result<()> {
        sqlx::query("DELETE FROM tags WHERE msgid = ? AND tagid = ?")
            .bind(msgid)
            .bind(tag_id)
            .execute(&mut *conn)
            .await
            .context("Failed to remove tag from topic")?;
        Ok(())
    }

    async fn adjust_counter(
        &self,
        conn: &mut SqliteConnection,
        tag_id: i64,
        delta: i64,
    ) -> Result<()> {
        sqlx::query("UPDATE tags_values SET counter = counter + ? WHERE id = ?")
            .bind(delta)
            .bind(tag_id)
            .execute(&mut *conn)
            .await
            .context("Failed to update tag counter")?;
        Ok(())
    }

    async fn get_top(&self, conn: &mut SqliteConnection, limit: i64) -> Result<Vec<Tag>> {
        let rows = sqlx::query(
            "SELECT id, value, counter FROM tags_values WHERE counter > 1 ORDER BY counter DESC, value LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&mut *conn)
        .await
        .context("Failed to get top tags")?;

        rows.iter().map(row_to_tag).collect()
    }

    async fn get_used(&self, conn: &mut SqliteConnection) -> Result<Vec<Tag>> {
        let rows = sqlx::query(
            "SELECT id, value, counter FROM tags_values WHERE counter > 0 ORDER BY value",
        )
        .fetch_all(&mut *conn)
        .await
        .context("Failed to list tags")?;

        rows.iter().map(row_to_tag).collect()
    }
}

fn row_to_tag(row: &SqliteRow) -> Result<Tag> {
    Ok(Tag {
        id: row.try_get("id")?,
        value: row.try_get("value")?,
        counter: row.try_get("counter")?,
    })
}
