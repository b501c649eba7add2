//! Tag model

use serde::{Deserialize, Serialize};

/// A tag value and the number of visible topics carrying it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag {
    /// Unique identifier
    pub id: i64,
    /// Normalized tag text (unique)
    pub value: String,
    /// Reference count maintained by the tag service
    pub counter: i64,
}
