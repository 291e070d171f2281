// Feed Store — score-ordered per-owner collections in two keyspaces.
//
// Each collection is addressed as `inbox:<uid>` or `outbox:<uid>` and is an
// independent unit: no operation spans owners, so concurrent writers to
// different owners never contend.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;

use super::item::UserFeedItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mailbox {
    /// Items pushed to the owner by others.
    Inbox,
    /// Items the owner produced; a pull source for big-V followers.
    Outbox,
}

impl Mailbox {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mailbox::Inbox => "inbox",
            Mailbox::Outbox => "outbox",
        }
    }

    /// Storage key of `owner`'s collection, e.g. `inbox:42`.
    pub fn key(&self, owner: i64) -> String {
        format!("{}:{}", self.as_str(), owner)
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Insert scored by the item's timestamp. An item with the same ID in the
    /// same collection is replaced.
    async fn push(&self, mailbox: Mailbox, owner: i64, item: &UserFeedItem) -> Result<()>;

    /// Items newest first.
    async fn page(
        &self,
        mailbox: Mailbox,
        owner: i64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<UserFeedItem>>;

    /// Drop the oldest entries until at most `max_len` remain. Returns how
    /// many were removed.
    async fn trim(&self, mailbox: Mailbox, owner: i64, max_len: usize) -> Result<usize>;

    /// Number of items in the collection.
    async fn count(&self, mailbox: Mailbox, owner: i64) -> Result<usize>;

    /// Remove every item from the collection.
    async fn clear(&self, mailbox: Mailbox, owner: i64) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyspace_layout() {
        assert_eq!(Mailbox::Inbox.key(7), "inbox:7");
        assert_eq!(Mailbox::Outbox.key(7), "outbox:7");
    }
}
