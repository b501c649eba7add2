//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository handles the statements for one table (or a small family
//! of tables) and runs on a connection handed in by the caller, which makes
//! it usable both inside a transaction and on a plain pooled connection.

pub mod gallery;
pub mod group;
pub mod ip_block;
pub mod message;
pub mod poll;
pub mod profile;
pub mod session;
pub mod tag;
pub mod user;

pub use gallery::{GalleryRepository, SqlxGalleryRepository};
pub use group::{GroupRepository, SqlxGroupRepository};
pub use ip_block::{IpBlockRepository, SqlxIpBlockRepository};
pub use message::{MessageRepository, SqlxMessageRepository};
pub use poll::{PollRepository, SqlxPollRepository};
pub use profile::{ProfileRepository, SqlxProfileRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
pub use tag::{SqlxTagRepository, TagRepository};
pub use user::{SqlxUserRepository, UserRepository};
