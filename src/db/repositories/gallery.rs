//! Gallery repository
//!
//! Reads the latest visible topics of image groups.

use crate::models::GalleryItem;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqliteConnection};
use std::sync::Arc;

#[async_trait]
pub trait GalleryRepository: Send + Sync {
    /// Latest committed, non-deleted image topics, newest commit first
    async fn latest(&self, conn: &mut SqliteConnection, limit: i64) -> Result<Vec<GalleryItem>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SqlxGalleryRepository;

impl SqlxGalleryRepository {
    pub fn new() -> Self {
        Self
    }

    pub fn boxed() -> Arc<dyn GalleryRepository> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl GalleryRepository for SqlxGalleryRepository {
    async fn latest(&self, conn: &mut SqliteConnection, limit: i64) -> Result<Vec<GalleryItem>> {
        let rows = sqlx::query(
            r#"
            SELECT t.id, t.title, t.image, u.nick, t.comment_count
            FROM topics t
            JOIN forum_groups g ON g.id = t.group_id
            JOIN users u ON u.id = t.user_id
            WHERE g.image_posts = 1
              AND t.committed = 1
              AND t.deleted = 0
              AND t.image IS NOT NULL
            ORDER BY t.commit_date DESC, t.id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *conn)
        .await
        .context("Failed to load gallery items")?;

        rows.iter()
            .map(|row| {
                Ok(GalleryItem::new(
                    row.try_get("id")?,
                    row.try_get("title")?,
                    row.try_get("image")?,
                    row.try_get("nick")?,
                    row.try_get("comment_count")?,
                ))
            })
            .collect()
    }
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
    async fn test_latest_committed_images_only() {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let user = SqlxUserRepository::new()
            .create(&mut conn, &User::new("alice".to_string(), "hash".to_string()))
            .await
            .unwrap();
        let topics = SqlxMessageRepository::new();
        let start = Utc::now() - Duration::hours(10);

        let mut ids = Vec::new();
        for i in 0..5 {
            let mut msg = new_message(3, user.id);
            msg.image = Some(format!("gallery/{}.png", i));
            let id = topics.create(&mut conn, &msg, start).await.unwrap();
            ids.push(id);
        }
        // Committed in order, except the last one which stays pending
        for (i, id) in ids.iter().take(4).enumerate() {
            topics
                .commit(&mut conn, *id, user.id, start + Duration::minutes(i as i64))
                .await
                .unwrap();
        }
        // Committed topic outside of an image group
        let plain = topics.create(&mut conn, &new_message(1, user.id), start).await.unwrap();
        topics.commit(&mut conn, plain, user.id, Utc::now()).await.unwrap();

        let items = SqlxGalleryRepository::new().latest(&mut conn, 3).await.unwrap();
        let got: Vec<i64> = items.iter().map(|i| i.msgid).collect();
        assert_eq!(got, vec![ids[3], ids[2], ids[1]]);
        assert_eq!(items[0].icon, "gallery/3-med.png");
        assert_eq!(items[0].nick, "alice");
    }
}
