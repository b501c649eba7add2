//! Services layer - Business logic
//!
//! Services own the forum rules: who may post where, how topics, polls and
//! tags change together, and which addresses are refused. They coordinate
//! repositories inside transactions and keep the cache in step.

pub mod flood;
pub mod gallery;
pub mod ip_block;
pub mod markdown;
pub mod password;
pub mod poll;
pub mod tag;
pub mod topic;
pub mod user;

pub use flood::FloodProtection;
pub use gallery::{GalleryError, GalleryService};
pub use ip_block::{BlockError, HostResolver, IpBlockService, SystemResolver};
pub use markdown::MarkdownRenderer;
pub use password::{hash_password, verify_password};
pub use poll::{PollService, PollServiceError, VoteForm};
pub use tag::{parse_tags, tags_to_string, TagService, TagServiceError};
pub use topic::{
    AddForm, AddMessageForm, PostingContext, SubmitOutcome, TopicService, TopicServiceError,
    TopicView,
};
pub use user::{UserService, UserServiceError};
