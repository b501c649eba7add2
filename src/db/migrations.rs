//! Database migrations module
//!
//! Code-based migrations for the Agora forum schema. Every migration is an
//! embedded SQL string applied once and recorded in `_migrations`.
//!
//! # Usage
//!
//! ```ignore
//! use agora::db::{create_pool, migrations};
//!
//! let pool = create_pool(&config).await?;
//! migrations::run_migrations(&pool).await?;
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use super::DynDatabasePool;

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Migration version number (must be unique and sequential)
    pub version: i32,
    /// Human-readable migration name
    pub name: &'static str,
    /// SQL statements
    pub up: &'static str,
}

/// Migration record stored in the database
#[derive(Debug, Clone)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// All migrations, embedded in the binary.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_users",
        up: r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                nick VARCHAR(80) NOT NULL UNIQUE,
                email VARCHAR(255),
                password_hash VARCHAR(255) NOT NULL,
                can_moderate BOOLEAN NOT NULL DEFAULT 0,
                can_correct BOOLEAN NOT NULL DEFAULT 0,
                blocked BOOLEAN NOT NULL DEFAULT 0,
                score INTEGER NOT NULL DEFAULT 0,
                last_login TIMESTAMP,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_users_nick ON users(nick);
        "#,
    },
    Migration {
        version: 2,
        name: "create_sessions",
        up: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id VARCHAR(64) PRIMARY KEY,
                user_id INTEGER NOT NULL,
                expires_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);
        "#,
    },
    // `restrict_topics` is the minimum score needed to start a topic; NULL means anyone.
    Migration {
        version: 3,
        name: "create_forum_groups",
        up: r#"
            CREATE TABLE IF NOT EXISTS forum_groups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                section INTEGER NOT NULL,
                title VARCHAR(255) NOT NULL,
                moderated BOOLEAN NOT NULL DEFAULT 0,
                image_posts BOOLEAN NOT NULL DEFAULT 0,
                restrict_topics INTEGER
            );
            INSERT OR IGNORE INTO forum_groups (id, section, title, moderated, image_posts, restrict_topics)
            VALUES (1, 2, 'General', 0, 0, NULL);
            INSERT OR IGNORE INTO forum_groups (id, section, title, moderated, image_posts, restrict_topics)
            VALUES (2, 1, 'News', 1, 0, NULL);
            INSERT OR IGNORE INTO forum_groups (id, section, title, moderated, image_posts, restrict_topics)
            VALUES (3, 3, 'Gallery', 1, 1, NULL);
            INSERT OR IGNORE INTO forum_groups (id, section, title, moderated, image_posts, restrict_topics)
            VALUES (4, 5, 'Polls', 1, 0, NULL);
        "#,
    },
    Migration {
        version: 4,
        name: "create_topics",
        up: r#"
            CREATE TABLE IF NOT EXISTS topics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                group_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                title VARCHAR(255) NOT NULL,
                message TEXT NOT NULL,
                url VARCHAR(255),
                linktext VARCHAR(255),
                image VARCHAR(255),
                committed BOOLEAN NOT NULL DEFAULT 0,
                commit_date TIMESTAMP,
                commit_by INTEGER,
                deleted BOOLEAN NOT NULL DEFAULT 0,
                comment_count INTEGER NOT NULL DEFAULT 0,
                poster_ip VARCHAR(45) NOT NULL,
                post_date TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (group_id) REFERENCES forum_groups(id),
                FOREIGN KEY (user_id) REFERENCES users(id),
                FOREIGN KEY (commit_by) REFERENCES users(id)
            );
            CREATE INDEX IF NOT EXISTS idx_topics_group_id ON topics(group_id);
            CREATE INDEX IF NOT EXISTS idx_topics_commit_date ON topics(commit_date);
        "#,
    },
    Migration {
        version: 5,
        name: "create_polls",
        up: r#"
            CREATE TABLE IF NOT EXISTS polls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title VARCHAR(255) NOT NULL,
                topic_id INTEGER UNIQUE,
                multiselect BOOLEAN NOT NULL DEFAULT 0,
                FOREIGN KEY (topic_id) REFERENCES topics(id) ON DELETE SET NULL
            );
            CREATE TABLE IF NOT EXISTS votes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                vote INTEGER NOT NULL,
                label VARCHAR(255) NOT NULL,
                votes INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (vote) REFERENCES polls(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_votes_vote ON votes(vote);
            CREATE TABLE IF NOT EXISTS vote_users (
                vote INTEGER NOT NULL,
                userid INTEGER NOT NULL,
                PRIMARY KEY (vote, userid),
                FOREIGN KEY (vote) REFERENCES polls(id) ON DELETE CASCADE,
                FOREIGN KEY (userid) REFERENCES users(id) ON DELETE CASCADE
            );
        "#,
    },
    Migration {
        version: 6,
        name: "create_tags",
        up: r#"
            CREATE TABLE IF NOT EXISTS tags_values (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                value VARCHAR(255) NOT NULL UNIQUE,
                counter INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS tags (
                msgid INTEGER NOT NULL,
                tagid INTEGER NOT NULL,
                PRIMARY KEY (msgid, tagid),
                FOREIGN KEY (msgid) REFERENCES topics(id) ON DELETE CASCADE,
                FOREIGN KEY (tagid) REFERENCES tags_values(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_tags_tagid ON tags(tagid);
        "#,
    },
    // `ban_date` is when the ban ends; NULL bans forever.
    Migration {
        version: 7,
        name: "create_b_ips",
        up: r#"
            CREATE TABLE IF NOT EXISTS b_ips (
                ip VARCHAR(45) PRIMARY KEY,
                reason TEXT NOT NULL,
                ban_date TIMESTAMP,
                date TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                mod_id INTEGER NOT NULL,
                FOREIGN KEY (mod_id) REFERENCES users(id)
            );
        "#,
    },
    Migration {
        version: 8,
        name: "create_profiles",
        up: r#"
            CREATE TABLE IF NOT EXISTS profiles (
                nick VARCHAR(80) PRIMARY KEY,
                style VARCHAR(32) NOT NULL,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
        "#,
    },
];

/// Run all pending migrations
///
/// Returns the number of migrations applied.
pub async fn run_migrations(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied = get_applied_migrations(pool.pool()).await?;
    let applied_versions: Vec<i32> = applied.iter().map(|m| m.version as i32).collect();

    let mut count = 0;

    for migration in MIGRATIONS {
        if !applied_versions.contains(&migration.version) {
            tracing::info!(
                "Applying migration {}: {}",
                migration.version,
                migration.name
            );
            apply_migration(pool.pool(), migration)
                .await
                .with_context(|| format!("Failed to apply migration: {}", migration.name))?;
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!("Applied {} migration(s)", count);
    } else {
        tracing::debug!("No pending migrations");
    }

    Ok(count)
}

async fn create_migrations_table(pool: &DynDatabasePool) -> Result<()> {
    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL UNIQUE,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .await?;
    Ok(())
}

async fn get_applied_migrations(pool: &SqlitePool) -> Result<Vec<MigrationRecord>> {
    let rows =
        sqlx::query("SELECT version, name, applied_at FROM _migrations ORDER BY version")
            .fetch_all(pool)
            .await?;

    let mut records = Vec::new();
    for row in rows {
        records.push(MigrationRecord {
            version: row.get("version"),
            name: row.get("name"),
            applied_at: row.get("applied_at"),
        });
    }

    Ok(records)
}

/// Apply a single migration atomically
async fn apply_migration(pool: &SqlitePool, migration: &Migration) -> Result<()> {
    let mut tx = pool.begin().await?;

    for statement in split_sql_statements(migration.up) {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
    }

    sqlx::query("INSERT INTO _migrations (version, name, applied_at) VALUES (?, ?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Truncate SQL for error messages
fn truncate_sql(sql: &str) -> String {
    match sql.char_indices().nth(100) {
        Some((idx, _)) => format!("{}...", &sql[..idx]),
        None => sql.to_string(),
    }
}

/// Split SQL into individual statements, skipping comment-only fragments
fn split_sql_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty() && !is_comment_only(stmt))
        .collect()
}

/// Check if a string contains only SQL comments
fn is_comment_only(s: &str) -> bool {
    s.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

/// Get pending migrations count
pub async fn pending_count(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied = get_applied_migrations(pool.pool()).await?;
    Ok(MIGRATIONS.len().saturating_sub(applied.len()))
}
