// Collaborator interfaces — the narrow views of other subsystems this core
// depends on: the follow graph, articles, and user profiles.
//
// The SQLite database implements all three for local use; real deployments
// can put any service behind these traits.

pub mod cache;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use cache::CachedUserDirectory;

/// An article as needed for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub author_id: i64,
}

/// A user as needed for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub display_name: String,
}

#[async_trait]
pub trait FollowGraph: Send + Sync {
    /// How many users follow `user_id`. Decides push vs. pull.
    async fn follower_count(&self, user_id: i64) -> Result<i64>;

    /// Users following `user_id`, in a stable order.
    async fn list_followers(&self, user_id: i64, offset: usize, limit: usize) -> Result<Vec<i64>>;

    /// Users `user_id` follows, in a stable order.
    async fn list_followees(&self, user_id: i64, offset: usize, limit: usize) -> Result<Vec<i64>>;
}

#[async_trait]
pub trait ArticleDirectory: Send + Sync {
    /// Look up an article on behalf of `requesting_user`.
    async fn get_article(&self, id: i64, requesting_user: i64) -> Result<Option<Article>>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, id: i64) -> Result<Option<UserProfile>>;
}
