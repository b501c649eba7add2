//! Banned address model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ban record for one IP address
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpBlockInfo {
    pub ip: String,
    pub reason: String,
    /// End of the ban; `None` bans forever
    pub ban_date: Option<DateTime<Utc>>,
    /// When the ban was issued
    pub original_date: DateTime<Utc>,
    pub moderator_id: i64,
    pub moderator_nick: String,
}

impl IpBlockInfo {
    /// Whether the ban is still in force
    pub fn is_blocked(&self) -> bool {
        self.is_blocked_at(Utc::now())
    }

    /// Whether the ban is in force at `now`
    pub fn is_blocked_at(&self, now: DateTime<Utc>) -> bool {
        match self.ban_date {
            None => true,
            Some(until) => until > now,
        }
    }
}
