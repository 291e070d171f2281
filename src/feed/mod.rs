// Feed storage model — per-user inbox/outbox collections of feed items.

pub mod item;
pub mod store;

pub use item::{ItemType, UserFeedItem};
pub use store::{FeedStore, Mailbox};
