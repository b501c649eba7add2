//! Profile repository
//!
//! Display settings keyed by login name.

use crate::models::Profile;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqliteConnection};
use std::sync::Arc;

/// Profile repository trait
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// Stored profile of `nick`
    async fn get(&self, conn: &mut SqliteConnection, nick: &str) -> Result<Option<Profile>>;

    /// Insert or replace the profile of `nick`
    async fn save(&self, conn: &mut SqliteConnection, nick: &str, profile: &Profile) -> Result<()>;
}

/// SQLx-based profile repository implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct SqlxProfileRepository;

impl SqlxProfileRepository {
    pub fn new() -> Self {
        Self
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed() -> Arc<dyn ProfileRepository> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl ProfileRepository for SqlxProfileRepository {
    async fn get(&self, conn: &mut SqliteConnection, nick: &str) -> Result<Option<Profile>> {
        let row = sqlx::query("SELECT style FROM profiles WHERE nick = ?")
            .bind(nick)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to get profile")?;

        row.map(|r| -> Result<Profile> {
            Ok(Profile {
                style: r.try_get("style")?,
                stored: true,
            })
        })
        .transpose()
    }

    async fn save(&self, conn: &mut SqliteConnection, nick: &str, profile: &Profile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO profiles (nick, style, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(nick) DO UPDATE SET style = excluded.style, updated_at = excluded.updated_at
            "#,
        )
        .bind(nick)
        .bind(&profile.style)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await
        .context("Failed to save profile")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    #[tokio::test]
    async fn test_save_replaces_profile() {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let repo = SqlxProfileRepository::new();

        assert!(repo.get(&mut conn, "alice").await.unwrap().is_none());

        repo.save(&mut conn, "alice", &Profile::with_style("black")).await.unwrap();
        repo.save(&mut conn, "alice", &Profile::with_style("white")).await.unwrap();

        let loaded = repo.get(&mut conn, "alice").await.unwrap().unwrap();
        assert_eq!(loaded.style, "white");
        assert!(!loaded.is_default());
    }
}
