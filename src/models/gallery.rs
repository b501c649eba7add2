//! Gallery item model

use serde::{Deserialize, Serialize};

use super::message_link;

/// A committed image topic as shown in the gallery boxlet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GalleryItem {
    pub msgid: i64,
    pub title: String,
    /// Full-size image path
    pub image: String,
    /// Thumbnail path derived from the image
    pub icon: String,
    pub nick: String,
    pub link: String,
    /// Number of comments under the topic
    pub stat: i64,
}

impl GalleryItem {
    pub fn new(msgid: i64, title: String, image: String, nick: String, stat: i64) -> Self {
        Self {
            msgid,
            icon: thumbnail_path(&image),
            link: message_link(msgid),
            title,
            image,
            nick,
            stat,
        }
    }
}

/// `gallery/cat.png` → `gallery/cat-med.png`
pub fn thumbnail_path(image: &str) -> String {
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind('.') {
        Some(dot) if dot > 0 => {
            let dot = name_start + dot;
            format!("{}-med{}", &image[..dot], &image[dot..])
        }
        _ => format!("{}-med", image),
    }
}
