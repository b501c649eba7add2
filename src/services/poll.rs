//! Poll service
//!
//! Creating polls for new topics, voting in the current poll and loading
//! results for the topic page.
//!
//! Only the current poll accepts votes: the poll attached to the visible
//! topic committed most recently.

use crate::db::repositories::{MessageRepository, PollRepository};
use crate::db::DynDatabasePool;
use crate::models::{Message, Poll, PollResults, PollVariant};
use anyhow::Context;
use sqlx::SqliteConnection;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum PollServiceError {
    /// A vote that cannot be accepted; the message is shown to the member
    #[error("{0}")]
    BadVote(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl PollServiceError {
    fn not_current() -> Self {
        Self::BadVote("You can only vote in the current poll".to_string())
    }
}

/// What the voting form needs
#[derive(Debug, Clone)]
pub struct VoteForm {
    pub message: Message,
    pub poll: Poll,
    pub variants: Vec<PollVariant>,
}

pub struct PollService {
    pool: DynDatabasePool,
    repo: Arc<dyn PollRepository>,
    messages: Arc<dyn MessageRepository>,
}

impl PollService {
    pub fn new(
        pool: DynDatabasePool,
        repo: Arc<dyn PollRepository>,
        messages: Arc<dyn MessageRepository>,
    ) -> Self {
        Self {
            pool,
            repo,
            messages,
        }
    }

    /// Create a poll with its variants; it is not attached to a topic yet
    pub async fn create_poll(
        &self,
        conn: &mut SqliteConnection,
        title: &str,
        variants: &[String],
        multiselect: bool,
    ) -> Result<i64, PollServiceError> {
        Ok(self.repo.create(conn, title, multiselect, variants).await?)
    }

    pub async fn attach_to_topic(
        &self,
        conn: &mut SqliteConnection,
        poll_id: i64,
        topic_id: i64,
    ) -> Result<(), PollServiceError> {
        Ok(self.repo.attach_to_topic(conn, poll_id, topic_id).await?)
    }

    /// The poll of the most recently committed visible topic
    pub async fn current_poll(
        &self,
        conn: &mut SqliteConnection,
    ) -> Result<Option<Poll>, PollServiceError> {
        Ok(self.repo.get_current(conn).await?)
    }

    /// Cast `user_id`'s vote for `variants` of poll `poll_id`.
    ///
    /// Voting twice in the same poll is accepted and changes nothing.
    /// Returns the topic the poll belongs to.
    pub async fn vote(
        &self,
        user_id: i64,
        poll_id: i64,
        variants: &[i64],
    ) -> Result<Message, PollServiceError> {
        let mut tx = self.pool.begin().await?;

        let poll = self
            .current_poll(&mut tx)
            .await?
            .ok_or_else(PollServiceError::not_current)?;
        if poll.id != poll_id {
            return Err(PollServiceError::not_current());
        }

        let mut chosen: Vec<i64> = Vec::with_capacity(variants.len());
        for id in variants {
            if !chosen.contains(id) {
                chosen.push(*id);
            }
        }

        if chosen.is_empty() {
            return Err(PollServiceError::BadVote("Nothing selected".to_string()));
        }
        if !poll.multiselect && chosen.len() != 1 {
            return Err(PollServiceError::BadVote(
                "This poll allows only one answer".to_string(),
            ));
        }

        let topic_id = poll.topic_id.ok_or_else(PollServiceError::not_current)?;
        let message = self
            .messages
            .get_by_id(&mut tx, topic_id)
            .await?
            .ok_or_else(|| PollServiceError::NotFound(format!("topic {}", topic_id)))?;

        if self.repo.add_voter(&mut tx, poll.id, user_id).await? {
            for variant in &chosen {
                if !self.repo.increment_variant(&mut tx, poll.id, *variant).await? {
                    return Err(PollServiceError::BadVote(format!(
                        "Unknown poll variant: {}",
                        variant
                    )));
                }
            }
            tracing::debug!("User {} voted in poll {}: {:?}", user_id, poll.id, chosen);
        }

        tx.commit().await.context("Failed to commit vote")?;
        Ok(message)
    }

    /// Data for the voting form of topic `msgid`
    pub async fn vote_form(&self, msgid: i64) -> Result<VoteForm, PollServiceError> {
        let mut conn = self.pool.acquire().await?;

        let message = self
            .messages
            .get_by_id(&mut conn, msgid)
            .await?
            .ok_or_else(|| PollServiceError::NotFound(format!("topic {}", msgid)))?;
        let poll = self
            .repo
            .get_by_topic(&mut conn, msgid)
            .await?
            .ok_or_else(|| PollServiceError::NotFound(format!("poll of topic {}", msgid)))?;

        let current = self.current_poll(&mut conn).await?;
        if current.map(|c| c.id) != Some(poll.id) {
            return Err(PollServiceError::not_current());
        }

        let variants = self.repo.variants(&mut conn, poll.id).await?;
        Ok(VoteForm {
            message,
            poll,
            variants,
        })
    }

    /// Topic a poll is attached to
    pub async fn topic_of_poll(&self, poll_id: i64) -> Result<i64, PollServiceError> {
        let mut conn = self.pool.acquire().await?;

        self.repo
            .get_by_id(&mut conn, poll_id)
            .await?
            .and_then(|p| p.topic_id)
            .ok_or_else(|| PollServiceError::NotFound(format!("poll {}", poll_id)))
    }

    /// Results of the poll attached to a topic, if it has one
    pub async fn results(
        &self,
        conn: &mut SqliteConnection,
        topic_id: i64,
        highlight: Vec<i64>,
    ) -> Result<Option<PollResults>, PollServiceError> {
        let Some(poll) = self.repo.get_by_topic(conn, topic_id).await? else {
            return Ok(None);
        };

        let variants = self.repo.variants(conn, poll.id).await?;
        let current = self.current_poll(conn).await?.map(|c| c.id) == Some(poll.id);
        Ok(Some(PollResults::new(poll, variants, highlight, current)))
    }
}
