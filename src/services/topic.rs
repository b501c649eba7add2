//! Topic service
//!
//! Starting topics (with optional poll and tags), showing them, approving
//! them in moderated groups and editing their tags.
//!
//! A submission runs in one transaction: validation, flood and ban checks,
//! the topic row, its poll and its tags. Topics of unmoderated groups are
//! committed right away and count towards their tags immediately; topics of
//! moderated groups count once a moderator commits them.

use crate::db::repositories::{GroupRepository, MessageRepository};
use crate::db::DynDatabasePool;
use crate::models::{Group, Message, NewMessage, PollResults, User, ANONYMOUS_NICK};
use crate::services::flood::FloodProtection;
use crate::services::gallery::{GalleryError, GalleryService};
use crate::services::ip_block::{BlockError, IpBlockService};
use crate::services::markdown::MarkdownRenderer;
use crate::services::poll::{PollService, PollServiceError};
use crate::services::tag::{parse_tags, TagService, TagServiceError};
use crate::services::user::{UserService, UserServiceError};
use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

pub const MAX_TITLE_LENGTH: usize = 255;
pub const MAX_MESSAGE_LENGTH: usize = 65_536;
pub const MAX_POLL_VARIANTS: usize = 15;

#[derive(Debug, thiserror::Error)]
pub enum TopicServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    BadInput(String),

    #[error("{0}")]
    AccessViolation(String),

    #[error("Bad URL: {0}")]
    BadUrl(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error(transparent)]
    InvalidTag(TagServiceError),

    #[error("Group not found: {0}")]
    GroupNotFound(i64),

    #[error("Topic not found: {0}")]
    NotFound(i64),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl TopicServiceError {
    /// Mistakes in the submitted form; the form is shown again with the message
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::BadInput(_)
                | Self::BadUrl(_)
                | Self::UserNotFound(_)
                | Self::InvalidTag(_)
        )
    }
}

impl From<TagServiceError> for TopicServiceError {
    fn from(e: TagServiceError) -> Self {
        match e {
            TagServiceError::InvalidTag(_) => Self::InvalidTag(e),
            TagServiceError::InternalError(inner) => Self::InternalError(inner),
        }
    }
}

impl From<UserServiceError> for TopicServiceError {
    fn from(e: UserServiceError) -> Self {
        match e {
            UserServiceError::UserNotFound(nick) => Self::UserNotFound(nick),
            UserServiceError::AuthenticationError(msg) | UserServiceError::AccessViolation(msg) => {
                Self::AccessViolation(msg)
            }
            UserServiceError::ValidationError(msg) | UserServiceError::UserExists(msg) => {
                Self::Validation(msg)
            }
            UserServiceError::InternalError(inner) => Self::InternalError(inner),
        }
    }
}

impl From<BlockError> for TopicServiceError {
    fn from(e: BlockError) -> Self {
        match e {
            BlockError::Blocked(_) => Self::AccessViolation(e.to_string()),
            BlockError::InvalidAddress(_) | BlockError::ValidationError(_) => {
                Self::BadInput(e.to_string())
            }
            BlockError::InternalError(inner) => Self::InternalError(inner),
        }
    }
}

impl From<PollServiceError> for TopicServiceError {
    fn from(e: PollServiceError) -> Self {
        match e {
            PollServiceError::BadVote(msg) => Self::Validation(msg),
            PollServiceError::NotFound(msg) => Self::Validation(msg),
            PollServiceError::InternalError(inner) => Self::InternalError(inner),
        }
    }
}

impl From<GalleryError> for TopicServiceError {
    fn from(e: GalleryError) -> Self {
        match e {
            GalleryError::InternalError(inner) => Self::InternalError(inner),
        }
    }
}

/// The topic form as submitted
#[derive(Debug, Clone, Default, Serialize)]
pub struct AddMessageForm {
    pub group: i64,
    pub title: String,
    pub msg: String,
    pub url: String,
    pub linktext: String,
    pub image: String,
    pub tags: String,
    /// Poll variants; only non-blank ones count
    pub poll: Vec<String>,
    pub multiselect: bool,
    pub preview: bool,
    #[serde(skip_serializing)]
    pub flood_token: String,
    pub nick: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl AddMessageForm {
    /// Non-blank, trimmed poll variants
    pub fn poll_variants(&self) -> Vec<String> {
        self.poll
            .iter()
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn has_poll(&self) -> bool {
        !self.poll_variants().is_empty()
    }
}

/// Who is posting and from where
#[derive(Debug, Clone)]
pub struct PostingContext {
    /// Member of the current session, if any
    pub session_user: Option<User>,
    pub client_ip: String,
    /// Key the flood token was issued for
    pub flood_key: String,
}

/// Result of a submission
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Nothing was stored; the validated topic is shown back
    Preview {
        group: Group,
        message: NewMessage,
        body_html: String,
    },
    Posted {
        group: Group,
        msgid: i64,
    },
}

/// Data for an empty topic form
#[derive(Debug, Clone)]
pub struct AddForm {
    pub group: Group,
    pub top_tags: BTreeSet<String>,
}

/// Everything the topic page shows
#[derive(Debug, Clone, Serialize)]
pub struct TopicView {
    pub message: Message,
    pub group: Group,
    pub tags: Vec<String>,
    pub body_html: String,
    pub poll: Option<PollResults>,
}

/// Check a submitted form and turn it into a topic ready to be stored
pub fn validate(
    form: &AddMessageForm,
    group: &Group,
    user: &User,
    client_ip: &str,
) -> Result<NewMessage, TopicServiceError> {
    if user.blocked {
        return Err(TopicServiceError::AccessViolation(
            "User is blocked".to_string(),
        ));
    }
    if !group.is_topic_posting_allowed(Some(user)) {
        return Err(TopicServiceError::AccessViolation(
            "You are not allowed to start topics in this group".to_string(),
        ));
    }

    let title = form.title.trim();
    if title.is_empty() {
        return Err(TopicServiceError::Validation("Title is empty".to_string()));
    }
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(TopicServiceError::Validation(format!(
            "Title is longer than {} characters",
            MAX_TITLE_LENGTH
        )));
    }

    if form.msg.trim().is_empty() {
        return Err(TopicServiceError::Validation("Message is empty".to_string()));
    }
    if form.msg.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(TopicServiceError::Validation(format!(
            "Message is longer than {} characters",
            MAX_MESSAGE_LENGTH
        )));
    }

    let url = non_blank(&form.url);
    if let Some(url) = &url {
        check_url(url)?;
    }
    let linktext = if url.is_some() {
        non_blank(&form.linktext).or_else(|| url.clone())
    } else {
        None
    };

    let image = if group.image_posts {
        let image = non_blank(&form.image).ok_or_else(|| {
            TopicServiceError::Validation("An image is required in this group".to_string())
        })?;
        check_image_path(&image)?;
        Some(image)
    } else {
        None
    };

    let poll_variants = form.poll_variants();
    if poll_variants.len() == 1 {
        return Err(TopicServiceError::Validation(
            "A poll needs at least two variants".to_string(),
        ));
    }
    if poll_variants.len() > MAX_POLL_VARIANTS {
        return Err(TopicServiceError::Validation(format!(
            "A poll can have at most {} variants",
            MAX_POLL_VARIANTS
        )));
    }

    let tags = parse_tags(&form.tags)?;

    Ok(NewMessage {
        group_id: group.id,
        author_id: user.id,
        author_nick: user.nick.clone(),
        title: title.to_string(),
        message: form.msg.clone(),
        url,
        linktext,
        image,
        tags,
        poll_variants,
        multiselect: form.multiselect,
        poster_ip: client_ip.to_string(),
    })
}

fn non_blank(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn check_url(url: &str) -> Result<(), TopicServiceError> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| TopicServiceError::BadUrl(url.to_string()))?;

    if rest.is_empty() || rest.starts_with('/') || rest.chars().any(char::is_whitespace) {
        return Err(TopicServiceError::BadUrl(url.to_string()));
    }
    Ok(())
}

/// Images are referenced by a relative path inside the site's image store
fn check_image_path(path: &str) -> Result<(), TopicServiceError> {
    let bad = path.starts_with('/')
        || path.contains('\\')
        || path.contains("://")
        || path.split('/').any(|part| part == "..");
    if bad {
        return Err(TopicServiceError::Validation(format!(
            "Invalid image path: {}",
            path
        )));
    }
    Ok(())
}

pub struct TopicService {
    pool: DynDatabasePool,
    groups: Arc<dyn GroupRepository>,
    messages: Arc<dyn MessageRepository>,
    users: Arc<UserService>,
    tags: Arc<TagService>,
    polls: Arc<PollService>,
    ip_blocks: Arc<IpBlockService>,
    gallery: Arc<GalleryService>,
    flood: FloodProtection,
    markdown: MarkdownRenderer,
}

impl TopicService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: DynDatabasePool,
        groups: Arc<dyn GroupRepository>,
        messages: Arc<dyn MessageRepository>,
        users: Arc<UserService>,
        tags: Arc<TagService>,
        polls: Arc<PollService>,
        ip_blocks: Arc<IpBlockService>,
        gallery: Arc<GalleryService>,
        flood: FloodProtection,
    ) -> Self {
        Self {
            pool,
            groups,
            messages,
            users,
            tags,
            polls,
            ip_blocks,
            gallery,
            flood,
            markdown: MarkdownRenderer::new(),
        }
    }

    pub fn flood_token(&self, key: &str) -> String {
        self.flood.token(key)
    }

    pub async fn group(&self, id: i64) -> Result<Group, TopicServiceError> {
        let mut conn = self.pool.acquire().await?;
        self.groups
            .get_by_id(&mut conn, id)
            .await?
            .ok_or(TopicServiceError::GroupNotFound(id))
    }

    /// Data for an empty form, if `user` may start topics in the group
    pub async fn add_form(
        &self,
        group_id: i64,
        user: Option<&User>,
    ) -> Result<AddForm, TopicServiceError> {
        let mut conn = self.pool.acquire().await?;

        let group = self
            .groups
            .get_by_id(&mut conn, group_id)
            .await?
            .ok_or(TopicServiceError::GroupNotFound(group_id))?;
        if !group.is_topic_posting_allowed(user) {
            return Err(TopicServiceError::AccessViolation(
                "You are not allowed to start topics in this group".to_string(),
            ));
        }

        let top_tags = self.tags.get_top_tags(&mut conn).await?;
        Ok(AddForm { group, top_tags })
    }

    /// The most used tags, for re-rendering the form
    pub async fn top_tags(&self) -> Result<BTreeSet<String>, TopicServiceError> {
        let mut conn = self.pool.acquire().await?;
        Ok(self.tags.get_top_tags(&mut conn).await?)
    }

    /// Validate, preview or store a submitted topic
    pub async fn submit(
        &self,
        form: &AddMessageForm,
        ctx: &PostingContext,
    ) -> Result<SubmitOutcome, TopicServiceError> {
        let mut tx = self.pool.begin().await?;

        let group = self
            .groups
            .get_by_id(&mut tx, form.group)
            .await?
            .ok_or(TopicServiceError::GroupNotFound(form.group))?;

        let user = match &ctx.session_user {
            Some(user) => user.clone(),
            None if !form.nick.trim().is_empty() => {
                self.users
                    .authenticate(&mut tx, form.nick.trim(), &form.password)
                    .await?
            }
            None => return Err(TopicServiceError::UserNotFound(ANONYMOUS_NICK.to_string())),
        };

        let message = validate(form, &group, &user, &ctx.client_ip)?;

        if form.preview {
            let body_html = self.markdown.render(&message.message);
            return Ok(SubmitOutcome::Preview {
                group,
                message,
                body_html,
            });
        }

        if !self.flood.verify(&ctx.flood_key, &form.flood_token) {
            tracing::info!("Flood protection (token differs) {}", ctx.client_ip);
            return Err(TopicServiceError::BadInput("Flood protection".to_string()));
        }

        self.ip_blocks.check_block_ip(&mut tx, &ctx.client_ip).await?;

        let now = Utc::now();
        let msgid = self.messages.create(&mut tx, &message, now).await?;

        if message.has_poll() {
            let poll_id = self
                .polls
                .create_poll(&mut tx, &message.title, &message.poll_variants, message.multiselect)
                .await?;
            self.polls.attach_to_topic(&mut tx, poll_id, msgid).await?;
        }

        self.tags.update_tags(&mut tx, msgid, &message.tags).await?;

        if !group.moderated {
            self.messages.commit(&mut tx, msgid, user.id, now).await?;
            self.tags.update_counters(&mut tx, &[], &message.tags).await?;
        }

        tx.commit().await.context("Failed to commit new topic")?;

        tracing::info!(
            "New topic {} in group {} by {} from {}",
            msgid,
            group.id,
            user.nick,
            ctx.client_ip
        );

        if !group.moderated && group.image_posts {
            self.gallery.invalidate().await?;
        }

        Ok(SubmitOutcome::Posted { group, msgid })
    }

    /// The topic page. Deleted topics are not shown.
    pub async fn view(&self, msgid: i64, highlight: Vec<i64>) -> Result<TopicView, TopicServiceError> {
        let mut conn = self.pool.acquire().await?;

        let message = self
            .messages
            .get_by_id(&mut conn, msgid)
            .await?
            .filter(|m| !m.deleted)
            .ok_or(TopicServiceError::NotFound(msgid))?;
        let group = self
            .groups
            .get_by_id(&mut conn, message.group_id)
            .await?
            .ok_or(TopicServiceError::GroupNotFound(message.group_id))?;
        let tags = self.tags.get_message_tags(&mut conn, msgid).await?;
        let poll = self.polls.results(&mut conn, msgid, highlight).await?;
        let body_html = self.markdown.render(&message.message);

        Ok(TopicView {
            message,
            group,
            tags,
            body_html,
            poll,
        })
    }

    /// Canonical link of an existing topic
    pub async fn link(&self, msgid: i64) -> Result<String, TopicServiceError> {
        let mut conn = self.pool.acquire().await?;
        let message = self
            .messages
            .get_by_id(&mut conn, msgid)
            .await?
            .ok_or(TopicServiceError::NotFound(msgid))?;
        Ok(message.link())
    }

    /// Topics waiting for a moderator
    pub async fn pending(&self) -> Result<Vec<Message>, TopicServiceError> {
        let mut conn = self.pool.acquire().await?;
        Ok(self.messages.list_uncommitted(&mut conn).await?)
    }

    /// Approve a topic of a moderated group and count its tags
    pub async fn commit_topic(&self, msgid: i64, moderator: &User) -> Result<Message, TopicServiceError> {
        if !moderator.can_moderate {
            return Err(TopicServiceError::AccessViolation(
                "Not a moderator".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let message = self
            .messages
            .get_by_id(&mut tx, msgid)
            .await?
            .filter(|m| !m.deleted)
            .ok_or(TopicServiceError::NotFound(msgid))?;
        let group = self
            .groups
            .get_by_id(&mut tx, message.group_id)
            .await?
            .ok_or(TopicServiceError::GroupNotFound(message.group_id))?;

        if !group.moderated {
            return Err(TopicServiceError::Validation(
                "Topics of this group need no approval".to_string(),
            ));
        }
        if !self.messages.commit(&mut tx, msgid, moderator.id, Utc::now()).await? {
            return Err(TopicServiceError::Validation(
                "Topic is already committed".to_string(),
            ));
        }

        let tags = self.tags.get_message_tags(&mut tx, msgid).await?;
        self.tags.update_counters(&mut tx, &[], &tags).await?;

        tx.commit().await.context("Failed to commit topic approval")?;
        tracing::info!("Topic {} committed by {}", msgid, moderator.nick);

        if group.image_posts {
            self.gallery.invalidate().await?;
        }

        Ok(Message {
            committed: true,
            ..message
        })
    }

    /// Replace the tags of a topic; allowed for its author, correctors and
    /// moderators. Returns whether anything changed.
    pub async fn edit_tags(
        &self,
        msgid: i64,
        input: &str,
        editor: &User,
    ) -> Result<bool, TopicServiceError> {
        let tags = parse_tags(input)?;

        let mut tx = self.pool.begin().await?;
        let message = self
            .messages
            .get_by_id(&mut tx, msgid)
            .await?
            .ok_or(TopicServiceError::NotFound(msgid))?;

        let allowed = editor.can_moderate || editor.can_correct || editor.id == message.author_id;
        if !allowed {
            return Err(TopicServiceError::AccessViolation(
                "You may not edit the tags of this topic".to_string(),
            ));
        }

        let visible = message.committed && !message.deleted;
        let modified = self.tags.edit_tags(&mut tx, msgid, &tags, visible).await?;
        tx.commit().await.context("Failed to commit tag edit")?;

        Ok(modified)
    }
}
