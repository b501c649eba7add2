//! Tag service
//!
//! Parses user-entered tag lists and keeps the topic/tag associations and the
//! per-tag reference counters in sync.
//!
//! The counter of a tag counts the visible (committed) topics carrying it:
//! - `update_tags` only changes associations;
//! - `update_counters` applies the two-set diff to the counters and is called
//!   whenever the set of tags of a visible topic changes, or a topic becomes
//!   visible.
//!
//! All database work runs on the caller's connection, so it joins the
//! caller's transaction.

use crate::db::repositories::TagRepository;
use crate::db::DynDatabasePool;
use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::SqliteConnection;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Number of tags offered on the topic form
pub const TOP_TAGS_COUNT: i64 = 50;

static TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\p{L}\d +-]+$").expect("tag pattern is valid")
});

/// Error types for tag service operations
#[derive(Debug, thiserror::Error)]
pub enum TagServiceError {
    #[error("Invalid tag: '{0}'")]
    InvalidTag(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Validate a single, already normalized tag
pub fn check_tag(tag: &str) -> Result<(), TagServiceError> {
    if TAG_RE.is_match(tag) {
        Ok(())
    } else {
        Err(TagServiceError::InvalidTag(tag.to_string()))
    }
}

/// Parse a comma (or pipe) separated tag list.
///
/// Pieces are lowercased and trimmed, empty pieces are skipped and
/// duplicates collapse. The result is sorted.
pub fn parse_tags(input: &str) -> Result<Vec<String>, TagServiceError> {
    let mut tags = BTreeSet::new();

    for piece in input.split([',', '|']) {
        let tag = piece.to_lowercase();
        let tag = tag.trim();
        if tag.is_empty() {
            continue;
        }

        check_tag(tag)?;
        tags.insert(tag.to_string());
    }

    Ok(tags.into_iter().collect())
}

/// Render tags the way the topic form expects them back
pub fn tags_to_string(tags: &[String]) -> String {
    tags.join(",")
}

/// Tag service
pub struct TagService {
    pool: DynDatabasePool,
    repo: Arc<dyn TagRepository>,
}

impl TagService {
    pub fn new(pool: DynDatabasePool, repo: Arc<dyn TagRepository>) -> Self {
        Self { pool, repo }
    }

    /// Tag values of a topic ordered by value
    pub async fn get_message_tags(
        &self,
        conn: &mut SqliteConnection,
        msgid: i64,
    ) -> Result<Vec<String>, TagServiceError> {
        Ok(self.repo.get_message_tags(conn, msgid).await?)
    }

    /// The most used tags (counter above one), as a sorted set
    pub async fn get_top_tags(
        &self,
        conn: &mut SqliteConnection,
    ) -> Result<BTreeSet<String>, TagServiceError> {
        let tags = self.repo.get_top(conn, TOP_TAGS_COUNT).await?;
        Ok(tags.into_iter().map(|t| t.value).collect())
    }

    /// Every tag in use with its counter
    pub async fn get_all_tags(
        &self,
        conn: &mut SqliteConnection,
    ) -> Result<BTreeMap<String, i64>, TagServiceError> {
        let tags = self.repo.get_used(conn).await?;
        Ok(tags.into_iter().map(|t| (t.value, t.counter)).collect())
    }

    /// Tag cloud on a connection of its own
    pub async fn tag_cloud(&self) -> Result<BTreeMap<String, i64>, TagServiceError> {
        let mut conn = self.pool.acquire().await?;
        self.get_all_tags(&mut conn).await
    }

    /// Look a tag value up, inserting it when missing.
    ///
    /// The insert is a single statement against the unique `value` index and
    /// runs under SQLite's write lock, so concurrent callers never create a
    /// second row for the same value.
    pub async fn get_or_create_tag(
        &self,
        conn: &mut SqliteConnection,
        value: &str,
    ) -> Result<i64, TagServiceError> {
        let id = self
            .repo
            .insert_missing(conn, value)
            .await
            .context("Failed to create tag value")?;
        tracing::debug!("Tag '{}' has id {}", value, id);
        Ok(id)
    }

    /// Make the topic carry exactly `tags`. Returns whether anything changed.
    ///
    /// Counters are left alone; see [`TagService::update_counters`].
    pub async fn update_tags(
        &self,
        conn: &mut SqliteConnection,
        msgid: i64,
        tags: &[String],
    ) -> Result<bool, TagServiceError> {
        let old_tags = self.repo.get_message_tags(conn, msgid).await?;
        let mut modified = false;

        for tag in tags.iter().filter(|t| !old_tags.contains(t)) {
            let id = self.get_or_create_tag(conn, tag).await?;
            self.repo.add_to_message(conn, msgid, id).await?;
            modified = true;
        }

        for tag in old_tags.iter().filter(|t| !tags.contains(t)) {
            let id = self.get_or_create_tag(conn, tag).await?;
            self.repo.remove_from_message(conn, msgid, id).await?;
            modified = true;
        }

        Ok(modified)
    }

    /// Increment counters of tags only in `new_tags`, decrement those only in
    /// `old_tags`
    pub async fn update_counters(
        &self,
        conn: &mut SqliteConnection,
        old_tags: &[String],
        new_tags: &[String],
    ) -> Result<(), TagServiceError> {
        for tag in new_tags.iter().filter(|t| !old_tags.contains(t)) {
            let id = self.get_or_create_tag(conn, tag).await?;
            self.repo.adjust_counter(conn, id, 1).await?;
        }

        for tag in old_tags.iter().filter(|t| !new_tags.contains(t)) {
            let id = self.get_or_create_tag(conn, tag).await?;
            self.repo.adjust_counter(conn, id, -1).await?;
        }

        Ok(())
    }

    /// Replace the tags of an existing topic.
    ///
    /// Counters follow only when the topic is visible.
    pub async fn edit_tags(
        &self,
        conn: &mut SqliteConnection,
        msgid: i64,
        new_tags: &[String],
        visible: bool,
    ) -> Result<bool, TagServiceError> {
        let old_tags = self.repo.get_message_tags(conn, msgid).await?;
        let modified = self.update_tags(conn, msgid, new_tags).await?;

        if modified && visible {
            self.update_counters(conn, &old_tags, new_tags).await?;
        }

        Ok(modified)
    }
}
