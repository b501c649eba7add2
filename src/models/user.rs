//! User model
//!
//! Registered forum members. Moderators approve topics and ban addresses,
//! correctors may edit other people's topics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Nick of the shared account used for anonymous posting
pub const ANONYMOUS_NICK: &str = "anonymous";

/// User entity representing a registered forum member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier
    pub id: i64,
    /// Login name (unique)
    pub nick: String,
    /// Optional contact address
    pub email: Option<String>,
    /// Password hash (argon2)
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// May approve topics and ban addresses
    pub can_moderate: bool,
    /// May correct other members' topics
    pub can_correct: bool,
    /// Blocked members can neither log in nor post
    pub blocked: bool,
    /// Reputation score, used by restricted groups
    pub score: i32,
    /// Last successful login
    pub last_login: Option<DateTime<Utc>>,
    /// Registration timestamp
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a new User with the given nick and an already hashed password.
    ///
    /// The ID will be set to 0 and should be assigned by the database.
    pub fn new(nick: String, password_hash: String) -> Self {
        Self {
            id: 0,
            nick,
            email: None,
            password_hash,
            can_moderate: false,
            can_correct: false,
            blocked: false,
            score: 0,
            last_login: None,
            created_at: Utc::now(),
        }
    }

    /// Whether this is the shared anonymous account
    pub fn is_anonymous(&self) -> bool {
        self.nick == ANONYMOUS_NICK
    }

    /// Remember-me token stored in the `password` cookie.
    ///
    /// The token changes whenever the password (and therefore its hash) or
    /// the site secret changes, which invalidates old cookies.
    pub fn remember_me_token(&self, secret: &str) -> String {
        format!("{:x}", md5::compute(format!("{}{}", secret, self.password_hash)))
    }
}

/// The logged-in member as exposed to views
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CurrentUser {
    pub id: i64,
    pub nick: String,
    pub moderator: bool,
    pub corrector: bool,
}

impl From<&User> for CurrentUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            nick: user.nick.clone(),
            moderator: user.can_moderate,
            corrector: user.can_correct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_new_defaults() {
        let user = User::new("alice".to_string(), "hash".to_string());

        assert_eq!(user.id, 0);
        assert!(!user.can_moderate);
        assert!(!user.blocked);
        assert!(!user.is_anonymous());
    }

    #[test]
    fn test_remember_me_token_depends_on_secret_and_hash() {
        let user = User::new("alice".to_string(), "hash".to_string());
        let token = user.remember_me_token("secret");

        assert_eq!(token.len(), 32);
        assert_eq!(token, format!("{:x}", md5::compute("secrethash")));
        assert_ne!(token, user.remember_me_token("other"));

        let mut changed = user.clone();
        changed.password_hash = "new-hash".to_string();
        assert_ne!(token, changed.remember_me_token("secret"));
    }

    #[test]
    fn test_current_user_from_user() {
        let mut user = User::new("bob".to_string(), "hash".to_string());
        user.id = 7;
        user.can_moderate = true;

        let current = CurrentUser::from(&user);
        assert_eq!(current.id, 7);
        assert_eq!(current.nick, "bob");
        assert!(current.moderator);
        assert!(!current.corrector);
    }
}
