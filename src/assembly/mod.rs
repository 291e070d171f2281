// Feed assembly — answering "what should this user see".

pub mod render;
pub mod service;
pub mod trim;

pub use render::{RenderedFeedItem, Renderer};
pub use service::{merge_by_recency, FeedService, MAX_PAGE_SIZE};
pub use trim::{Scheduled, TrimQueue};
