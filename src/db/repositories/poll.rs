//! Poll repository
//!
//! Polls (`polls`), their variants (`votes`) and the per-user vote records
//! (`vote_users`).

use crate::models::{Poll, PollVariant};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use std::sync::Arc;

#[async_trait]
pub trait PollRepository: Send + Sync {
    /// Insert a poll header and its variants, returning the poll ID
    async fn create(
        &self,
        conn: &mut SqliteConnection,
        title: &str,
        multiselect: bool,
        variants: &[String],
    ) -> Result<i64>;

    /// Point the poll at its topic
    async fn attach_to_topic(
        &self,
        conn: &mut SqliteConnection,
        poll_id: i64,
        topic_id: i64,
    ) -> Result<()>;

    async fn get_by_id(&self, conn: &mut SqliteConnection, id: i64) -> Result<Option<Poll>>;

    async fn get_by_topic(&self, conn: &mut SqliteConnection, topic_id: i64)
        -> Result<Option<Poll>>;

    /// The poll of the visible topic committed most recently
    async fn get_current(&self, conn: &mut SqliteConnection) -> Result<Option<Poll>>;

    /// Variants of a poll ordered by ID
    async fn variants(&self, conn: &mut SqliteConnection, poll_id: i64)
        -> Result<Vec<PollVariant>>;

    /// Record that `user_id` voted. Returns `false` if the user already had.
    async fn add_voter(
        &self,
        conn: &mut SqliteConnection,
        poll_id: i64,
        user_id: i64,
    ) -> Result<bool>;

    /// Add one vote to a variant. Returns `false` when the variant does not
    /// belong to the poll.
    async fn increment_variant(
        &self,
        conn: &mut SqliteConnection,
        poll_id: i64,
        variant_id: i64,
    ) -> Result<bool>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SqlxPollRepository;

impl SqlxPollRepository {
    pub fn new() -> Self {
        Self
    }

    pub fn boxed() -> Arc<dyn PollRepository> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl PollRepository for SqlxPollRepository {
    async fn create(
        &self,
        conn: &mut SqliteConnection,
        title: &str,
        multiselect: bool,
        variants: &[String],
    ) -> Result<i64> {
        let poll_id = sqlx::query("INSERT INTO polls (title, multiselect) VALUES (?, ?)")
            .bind(title)
            .bind(multiselect)
            .execute(&mut *conn)
            .await
            .context("Failed to create poll")?
            .last_insert_rowid();

        for label in variants {
            sqlx::query("INSERT INTO votes (vote, label) VALUES (?, ?)")
                .bind(poll_id)
                .bind(label)
                .execute(&mut *conn)
                .await
                .context("Failed to create poll variant")?;
        }

        Ok(poll_id)
    }

    async fn attach_to_topic(
        &self,
        conn: &mut SqliteConnection,
        poll_id: i64,
        topic_id: i64,
    ) -> Result<()> {
        sqlx::query("UPDATE polls SET topic_id = ? WHERE id = ?")
            .bind(topic_id)
            .bind(poll_id)
            .execute(&mut *conn)
            .await
            .context("Failed to attach poll to topic")?;
        Ok(())
    }

    async fn get_by_id(&self, conn: &mut SqliteConnection, id: i64) -> Result<Option<Poll>> {
        let row = sqlx::query("SELECT id, title, topic_id, multiselect FROM polls WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to get poll")?;

        row.map(|r| row_to_poll(&r)).transpose()
    }

    async fn get_by_topic(
        &self,
        conn: &mut SqliteConnection,
        topic_id: i64,
    ) -> Result<Option<Poll>> {
        let row =
            sqlx::query("SELECT id, title, topic_id, multiselect FROM polls WHERE topic_id = ?")
                .bind(topic_id)
                .fetch_optional(&mut *conn)
                .await
                .context("Failed to get poll by topic")?;

        row.map(|r| row_to_poll(&r)).transpose()
    }

    async fn get_current(&self, conn: &mut SqliteConnection) -> Result<Option<Poll>> {
        let row = sqlx::query(
            r#"
            SELECT p.id, p.title, p.topic_id, p.multiselect
            FROM polls p
            JOIN topics t ON t.id = p.topic_id
            WHERE t.committed = 1 AND t.deleted = 0
            ORDER BY t.commit_date DESC, t.id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to get current poll")?;

        row.map(|r| row_to_poll(&r)).transpose()
    }

    async fn variants(
        &self,
        conn: &mut SqliteConnection,
        poll_id: i64,
    ) -> Result<Vec<PollVariant>> {
        let rows = sqlx::query("SELECT id, vote, label, votes FROM votes WHERE vote = ? ORDER BY id")
            .bind(poll_id)
            .fetch_all(&mut *conn)
            .await
            .context("Failed to list poll variants")?;

        rows.iter()
            .map(|row| {
                Ok(PollVariant {
                    id: row.try_get("id")?,
                    poll_id: row.try_get("vote")?,
                    label: row.try_get("label")?,
                    votes: row.try_get("votes")?,
                })
            })
            .collect()
    }

    async fn add_voter(
        &self,
        conn: &mut SqliteConnection,
        poll_id: i64,
        user_id: i64,
    ) -> Result<bool> {
        let result = sqlx::query("INSERT OR IGNORE INTO vote_users (vote, userid) VALUES (?, ?)")
            .bind(poll_id)
            .bind(user_id)
            .execute(&mut *conn)
            .await
            .context("Failed to record voter")?;
        Ok(result.rows_affected() == 1)
    }

    async fn increment_variant(
        &self,
        conn: &mut SqliteConnection,
        poll_id: i64,
        variant_id: i64,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE votes SET votes = votes + 1 WHERE id = ? AND vote = ?")
            .bind(variant_id)
            .bind(poll_id)
            .execute(&mut *conn)
            .await
            .context("Failed to count vote")?;
        Ok(result.rows_affected() == 1)
    }
}

fn row_to_poll(row: &SqliteRow) -> Result<Poll> {
    Ok(Poll {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        topic_id: row.try_get("topic_id")?,
        multiselect: row.try_get("multiselect")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::message::tests::new_message;
    use crate::db::repositories::{
        MessageRepository, SqlxMessageRepository, SqlxUserRepository, UserRepository,
    };
    use crate::db::{create_test_pool, migrations};
    use crate::models::User;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_current_poll_follows_latest_commit() {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let user = SqlxUserRepository::new()
            .create(&mut conn, &User::new("alice".to_string(), "hash".to_string()))
            .await
            .unwrap();
        let topics = SqlxMessageRepository::new();
        let repo = SqlxPollRepository::new();

        assert!(repo.get_current(&mut conn).await.unwrap().is_none());

        let variants = vec!["yes".to_string(), "no".to_string()];
        let older = repo.create(&mut conn, "Old", false, &variants).await.unwrap();
        let newer = repo.create(&mut conn, "New", false, &variants).await.unwrap();
        let t1 = topics.create(&mut conn, &new_message(4, user.id), Utc::now()).await.unwrap();
        let t2 = topics.create(&mut conn, &new_message(4, user.id), Utc::now()).await.unwrap();
        repo.attach_to_topic(&mut conn, older, t1).await.unwrap();
        repo.attach_to_topic(&mut conn, newer, t2).await.unwrap();

        // Neither topic is committed yet
        assert!(repo.get_current(&mut conn).await.unwrap().is_none());

        let now = Utc::now();
        topics.commit(&mut conn, t2, user.id, now - Duration::hours(1)).await.unwrap();
        topics.commit(&mut conn, t1, user.id, now).await.unwrap();

        let current = repo.get_current(&mut conn).await.unwrap().unwrap();
        assert_eq!(current.id, older);
        assert_eq!(repo.get_by_topic(&mut conn, t2).await.unwrap().unwrap().id, newer);
    }

    #[tokio::test]
    async fn test_votes_and_voters() {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let user = SqlxUserRepository::new()
            .create(&mut conn, &User::new("alice".to_string(), "hash".to_string()))
            .await
            .unwrap();
        let repo = SqlxPollRepository::new();

        let poll_id = repo
            .create(&mut conn, "Q", true, &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        let other = repo.create(&mut conn, "Other", false, &["c".to_string()]).await.unwrap();
        let variants = repo.variants(&mut conn, poll_id).await.unwrap();
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0].label, "a");

        assert!(repo.add_voter(&mut conn, poll_id, user.id).await.unwrap());
        assert!(!repo.add_voter(&mut conn, poll_id, user.id).await.unwrap());

        assert!(repo.increment_variant(&mut conn, poll_id, variants[1].id).await.unwrap());
        let foreign = repo.variants(&mut conn, other).await.unwrap()[0].id;
        assert!(!repo.increment_variant(&mut conn, poll_id, foreign).await.unwrap());

        let variants = repo.variants(&mut conn, poll_id).await.unwrap();
        assert_eq!(variants[1].votes, 1);
        assert_eq!(variants[0].votes, 0);
    }
}
