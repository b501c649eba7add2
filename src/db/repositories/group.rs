//! Group repository

use crate::models::Group;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use std::sync::Arc;

#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn get_by_id(&self, conn: &mut SqliteConnection, id: i64) -> Result<Option<Group>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SqlxGroupRepository;

impl SqlxGroupRepository {
    pub fn new() -> Self {
        Self
    }

    pub fn boxed() -> Arc<dyn GroupRepository> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl GroupRepository for SqlxGroupRepository {
    async fn get_by_id(&self, conn: &mut SqliteConnection, id: i64) -> Result<Option<Group>> {
        let row = sqlx::query(
            "SELECT id, section, title, moderated, image_posts, restrict_topics FROM forum_groups WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to get group")?;

        row.map(|r| row_to_group(&r)).transpose()
    }
}

fn row_to_group(row: &SqliteRow) -> Result<Group> {
    Ok(Group {
        id: row.try_get("id")?,
        section: row.try_get("section")?,
        title: row.try_get("title")?,
        moderated: row.try_get("moderated")?,
        image_posts: row.try_get("image_posts")?,
        restrict_topics: row.try_get("restrict_topics")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    #[tokio::test]
    async fn test_seeded_groups() {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let repo = SqlxGroupRepository::new();

        let general = repo.get_by_id(&mut conn, 1).await.unwrap().unwrap();
        assert!(!general.moderated);

        let gallery = repo.get_by_id(&mut conn, 3).await.unwrap().unwrap();
        assert!(gallery.moderated && gallery.image_posts);

        assert!(repo.get_by_id(&mut conn, 999).await.unwrap().is_none());
    }
}
