//! Group model
//!
//! A group is a forum board. Topics in moderated groups stay invisible until
//! a moderator commits them; image groups feed the gallery.

use serde::{Deserialize, Serialize};

use super::User;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub id: i64,
    /// Site section the group belongs to
    pub section: i64,
    pub title: String,
    /// Topics need a moderator's approval before they are shown
    pub moderated: bool,
    /// Topics carry an image and show up in the gallery
    pub image_posts: bool,
    /// Minimum score required to start a topic; `None` lets anyone post
    pub restrict_topics: Option<i32>,
}

impl Group {
    /// Whether `user` (or an anonymous visitor, for `None`) may start topics here
    pub fn is_topic_posting_allowed(&self, user: Option<&User>) -> bool {
        let Some(min_score) = self.restrict_topics else {
            return true;
        };

        match user {
            Some(user) if user.blocked || user.is_anonymous() => false,
            Some(user) => user.can_moderate || user.score >= min_score,
            None => false,
        }
    }
}
