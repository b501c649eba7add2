//! Data models
//!
//! Value objects surfaced from forum rows:
//! - Database entities (User, Session, Profile, Group, Message, Poll, Tag, IpBlockInfo)
//! - Derived views (GalleryItem, PollResults)
//! - Form input for new topics

mod gallery;
mod group;
mod ip_block;
mod message;
mod poll;
mod profile;
mod session;
mod tag;
mod user;

pub use gallery::GalleryItem;
pub use group::Group;
pub use ip_block::IpBlockInfo;
pub use message::{message_link, Message, NewMessage};
pub use poll::{Poll, PollResults, PollVariant};
pub use profile::{Profile, DEFAULT_STYLE, STYLES};
pub use session::Session;
pub use tag::Tag;
pub use user::{CurrentUser, User, ANONYMOUS_NICK};
