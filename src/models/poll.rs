//! Poll model
//!
//! A poll belongs to one topic and owns a list of variants, each with its own
//! vote counter.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Poll {
    pub id: i64,
    pub title: String,
    /// Topic the poll is attached to; `None` right after creation
    pub topic_id: Option<i64>,
    /// Whether more than one variant may be chosen
    pub multiselect: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollVariant {
    pub id: i64,
    pub poll_id: i64,
    pub label: String,
    pub votes: i64,
}

/// Poll with its variants, as shown under a topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResults {
    pub poll: Poll,
    pub variants: Vec<PollVariant>,
    pub total_votes: i64,
    /// Variants the viewer just voted for
    pub highlight: Vec<i64>,
    /// Whether this is the poll members can currently vote in
    pub current: bool,
}

impl PollResults {
    pub fn new(poll: Poll, variants: Vec<PollVariant>, highlight: Vec<i64>, current: bool) -> Self {
        let total_votes = variants.iter().map(|v| v.votes).sum();
        Self {
            poll,
            variants,
            total_votes,
            highlight,
            current,
        }
    }

    /// Share of the votes a variant received, in whole percent
    pub fn percent(&self, variant: &PollVariant) -> i64 {
        if self.total_votes == 0 {
            0
        } else {
            variant.votes * 100 / self.total_votes
        }
    }
}
