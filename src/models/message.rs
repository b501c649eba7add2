//! Message model
//!
//! A message is a forum topic. New topics are first built as a [`NewMessage`]
//! (which doubles as the preview shown before posting) and become a stored
//! [`Message`] once the submission transaction commits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub group_id: i64,
    pub author_id: i64,
    pub author_nick: String,
    pub title: String,
    /// Raw body as typed by the author
    pub message: String,
    pub url: Option<String>,
    pub linktext: Option<String>,
    /// Image path for gallery topics
    pub image: Option<String>,
    /// Approved (or posted into an unmoderated group) and therefore visible
    pub committed: bool,
    pub commit_date: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub comment_count: i64,
    pub poster_ip: String,
    pub post_date: DateTime<Utc>,
}

impl Message {
    /// Canonical site-relative link to the topic page
    pub fn link(&self) -> String {
        message_link(self.id)
    }

    /// Topic link that highlights the given poll variants
    pub fn link_with_highlight(&self, variants: &[i64]) -> String {
        let mut url = self.link();
        for variant in variants {
            url.push_str("&highlight=");
            url.push_str(&variant.to_string());
        }
        url
    }
}

/// Site-relative link to a topic page
pub fn message_link(msgid: i64) -> String {
    format!("/view-message.jsp?msgid={}", msgid)
}

/// A validated topic that has not been stored yet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewMessage {
    pub group_id: i64,
    pub author_id: i64,
    pub author_nick: String,
    pub title: String,
    pub message: String,
    pub url: Option<String>,
    pub linktext: Option<String>,
    pub image: Option<String>,
    /// Parsed, normalized tag values
    pub tags: Vec<String>,
    /// Poll variants; empty when the topic has no poll
    pub poll_variants: Vec<String>,
    pub multiselect: bool,
    pub poster_ip: String,
}

impl NewMessage {
    /// Whether the topic carries a poll
    pub fn has_poll(&self) -> bool {
        !self.poll_variants.is_empty()
    }
}
