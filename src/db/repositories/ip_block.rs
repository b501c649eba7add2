//! Banned address repository (`b_ips`)

use crate::models::IpBlockInfo;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use std::sync::Arc;

#[async_trait]
pub trait IpBlockRepository: Send + Sync {
    /// Ban record for an address, with the banning moderator's nick
    async fn get(&self, conn: &mut SqliteConnection, ip: &str) -> Result<Option<IpBlockInfo>>;

    /// Create or replace the ban record of an address
    async fn upsert(
        &self,
        conn: &mut SqliteConnection,
        ip: &str,
        reason: &str,
        until: Option<DateTime<Utc>>,
        moderator_id: i64,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Remove a ban. Returns whether a record existed.
    async fn delete(&self, conn: &mut SqliteConnection, ip: &str) -> Result<bool>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SqlxIpBlockRepository;

impl SqlxIpBlockRepository {
    pub fn new() -> Self {
        Self
    }

    pub fn boxed() -> Arc<dyn IpBlockRepository> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl IpBlockRepository for SqlxIpBlockRepository {
    async fn get(&self, conn: &mut SqliteConnection, ip: &str) -> Result<Option<IpBlockInfo>> {
        let row = sqlx::query(
            r#"
            SELECT b.ip, b.reason, b.ban_date, b.date, b.mod_id, u.nick
            FROM b_ips b
            JOIN users u ON u.id = b.mod_id
            WHERE b.ip = ?
            "#,
        )
        .bind(ip)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to get ban record")?;

        row.map(|r| row_to_block(&r)).transpose()
    }

    async fn upsert(
        &self,
        conn: &mut SqliteConnection,
        ip: &str,
        reason: &str,
        until: Option<DateTime<Utc>>,
        moderator_id: i64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO b_ips (ip, reason, ban_date, date, mod_id)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(ip) DO UPDATE SET
                reason = excluded.reason,
                ban_date = excluded.ban_date,
                date = excluded.date,
                mod_id = excluded.mod_id
            "#,
        )
        .bind(ip)
        .bind(reason)
        .bind(until)
        .bind(at)
        .bind(moderator_id)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to ban {}", ip))?;
        Ok(())
    }

    async fn delete(&self, conn: &mut SqliteConnection, ip: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM b_ips WHERE ip = ?")
            .bind(ip)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to unban {}", ip))?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_block(row: &SqliteRow) -> Result<IpBlockInfo> {
    Ok(IpBlockInfo {
        ip: row.try_get("ip")?,
        reason: row.try_get("reason")?,
        ban_date: row.try_get("ban_date")?,
        original_date: row.try_get("date")?,
        moderator_id: row.try_get("mod_id")?,
        moderator_nick: row.try_get("nick")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{SqlxUserRepository, UserRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::User;
    use chrono::Duration;

    #[tokio::test]
    async fn test_ban_update_and_unban() {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let moderator = SqlxUserRepository::new()
            .create(&mut conn, &User::new("mod".to_string(), "hash".to_string()))
            .await
            .unwrap();
        let repo = SqlxIpBlockRepository::new();

        assert!(repo.get(&mut conn, "10.0.0.1").await.unwrap().is_none());

        repo.upsert(&mut conn, "10.0.0.1", "spam", None, moderator.id, Utc::now())
            .await
            .unwrap();
        let info = repo.get(&mut conn, "10.0.0.1").await.unwrap().unwrap();
        assert_eq!(info.reason, "spam");
        assert_eq!(info.moderator_nick, "mod");
        assert!(info.ban_date.is_none());

        let until = Utc::now() + Duration::days(1);
        repo.upsert(&mut conn, "10.0.0.1", "flood", Some(until), moderator.id, Utc::now())
            .await
            .unwrap();
        let info = repo.get(&mut conn, "10.0.0.1").await.unwrap().unwrap();
        assert_eq!(info.reason, "flood");
        assert!(info.ban_date.is_some());

        assert!(repo.delete(&mut conn, "10.0.0.1").await.unwrap());
        assert!(!repo.delete(&mut conn, "10.0.0.1").await.unwrap());
    }
}
