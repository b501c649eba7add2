//! Profile model
//!
//! Per-member display settings. Visitors without a stored profile, and the
//! anonymous account, get the default one.

use serde::{Deserialize, Serialize};

/// Style used when nothing else is chosen
pub const DEFAULT_STYLE: &str = "tango";

/// Styles a member may pick
pub const STYLES: &[&str] = &["tango", "black", "white", "white2"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Stylesheet name
    pub style: String,
    /// False until the member saves their own settings
    #[serde(skip)]
    pub stored: bool,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            style: DEFAULT_STYLE.to_string(),
            stored: false,
        }
    }
}

impl Profile {
    pub fn with_style(style: impl Into<String>) -> Self {
        Self {
            style: style.into(),
            stored: false,
        }
    }

    pub fn is_default(&self) -> bool {
        !self.stored
    }

    pub fn has_known_style(&self) -> bool {
        STYLES.contains(&self.style.as_str())
    }
}
