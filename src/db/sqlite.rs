// SqliteDatabase — one rusqlite connection behind every storage seam.
//
// Implements the event log, the feed store, the message bus, and the three
// collaborator lookups, so a single file is enough to run the whole
// pipeline locally.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Send.
// Trait methods lock the mutex, do synchronous rusqlite work, and return.
// The lock is never held across .await points.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::Mutex;

use super::{queries, schema};
use crate::bus::{partition_for, BusMessage, BusReceipt, EventBus};
use crate::collab::{Article, ArticleDirectory, FollowGraph, UserDirectory, UserProfile};
use crate::events::{EventLog, FeedEvent};
use crate::feed::{FeedStore, Mailbox, UserFeedItem};

/// Bus partitions when none are configured.
const DEFAULT_PARTITIONS: u32 = 4;

pub struct SqliteDatabase {
    conn: Mutex<Connection>,
    partitions: u32,
}

impl SqliteDatabase {
    /// Wrap an already-opened rusqlite Connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            partitions: DEFAULT_PARTITIONS,
        }
    }

    /// Set how many bus partitions messages are spread across.
    pub fn with_partitions(mut self, partitions: u32) -> Self {
        self.partitions = partitions.max(1);
        self
    }

    /// A fresh, fully migrated in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::create_tables(&conn)?;
        Ok(Self::new(conn))
    }

    pub async fn table_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        schema::table_count(&conn)
    }

    pub async fn upsert_user(&self, id: i64, display_name: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::upsert_user(&conn, id, display_name)
    }

    pub async fn upsert_article(&self, article: &Article) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::upsert_article(&conn, article)
    }

    /// Record a follow edge. Returns false if it already existed.
    pub async fn add_follow(&self, follower_id: i64, followee_id: i64) -> Result<bool> {
        let conn = self.conn.lock().await;
        queries::add_follow(&conn, follower_id, followee_id)
    }
}

#[async_trait]
impl EventLog for SqliteDatabase {
    async fn append(&self, event: &FeedEvent) -> Result<i64> {
        let conn = self.conn.lock().await;
        queries::insert_event(&conn, event)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<FeedEvent>> {
        let conn = self.conn.lock().await;
        queries::get_event(&conn, id)
    }

    async fn list_since(
        &self,
        since: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<FeedEvent>> {
        let conn = self.conn.lock().await;
        queries::list_events_since(&conn, &since, offset, limit)
    }

    async fn list_by_actor(
        &self,
        actor_id: i64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<FeedEvent>> {
        let conn = self.conn.lock().await;
        queries::list_events_by_actor(&conn, actor_id, offset, limit)
    }

    async fn count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        queries::event_count(&conn)
    }
}

#[async_trait]
impl FeedStore for SqliteDatabase {
    async fn push(&self, mailbox: Mailbox, owner: i64, item: &UserFeedItem) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::upsert_feed_item(&conn, &mailbox.key(owner), item)
    }

    async fn page(
        &self,
        mailbox: Mailbox,
        owner: i64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<UserFeedItem>> {
        let conn = self.conn.lock().await;
        queries::page_feed_items(&conn, &mailbox.key(owner), offset, limit)
    }

    async fn trim(&self, mailbox: Mailbox, owner: i64, max_len: usize) -> Result<usize> {
        let conn = self.conn.lock().await;
        queries::trim_feed_items(&conn, &mailbox.key(owner), max_len)
    }

    async fn count(&self, mailbox: Mailbox, owner: i64) -> Result<usize> {
        let conn = self.conn.lock().await;
        queries::count_feed_items(&conn, &mailbox.key(owner))
    }

    async fn clear(&self, mailbox: Mailbox, owner: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::clear_feed_items(&conn, &mailbox.key(owner))
    }
}

#[async_trait]
impl EventBus for SqliteDatabase {
    fn partitions(&self) -> u32 {
        self.partitions
    }

    async fn publish(&self, key: &str, payload: &str) -> Result<BusReceipt> {
        let partition = partition_for(key, self.partitions);
        let conn = self.conn.lock().await;
        let offset = queries::insert_bus_message(&conn, partition, key, payload)?;
        Ok(BusReceipt { partition, offset })
    }

    async fn fetch(&self, group: &str, partition: u32, max: usize) -> Result<Vec<BusMessage>> {
        let conn = self.conn.lock().await;
        queries::fetch_bus_messages(&conn, group, partition, max)
    }

    async fn commit(&self, group: &str, partition: u32, offset: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::commit_offset(&conn, group, partition, offset)
    }

    async fn lag(&self, group: &str, partition: u32) -> Result<i64> {
        let conn = self.conn.lock().await;
        queries::consumer_lag(&conn, group, partition)
    }
}

#[async_trait]
impl FollowGraph for SqliteDatabase {
    async fn follower_count(&self, user_id: i64) -> Result<i64> {
        let conn = self.conn.lock().await;
        queries::follower_count(&conn, user_id)
    }

    async fn list_followers(&self, user_id: i64, offset: usize, limit: usize) -> Result<Vec<i64>> {
        let conn = self.conn.lock().await;
        queries::list_followers(&conn, user_id, offset, limit)
    }

    async fn list_followees(&self, user_id: i64, offset: usize, limit: usize) -> Result<Vec<i64>> {
        let conn = self.conn.lock().await;
        queries::list_followees(&conn, user_id, offset, limit)
    }
}

#[async_trait]
impl ArticleDirectory for SqliteDatabase {
    // No per-viewer visibility rules locally; every article is readable.
    async fn get_article(&self, id: i64, _requesting_user: i64) -> Result<Option<Article>> {
        let conn = self.conn.lock().await;
        queries::get_article(&conn, id)
    }
}

#[async_trait]
impl UserDirectory for SqliteDatabase {
    async fn get_user(&self, id: i64) -> Result<Option<UserProfile>> {
        let conn = self.conn.lock().await;
        queries::get_user(&conn, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPayload;

    async fn test_db() -> SqliteDatabase {
        SqliteDatabase::in_memory().unwrap()
    }

    #[tokio::test]
    async fn test_trait_table_count() {
        let db = test_db().await;
        assert_eq!(db.table_count().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_event_log_assigns_increasing_ids() {
        let db = test_db().await;
        let event = FeedEvent::new(1, EventPayload::Followed { followee_id: 2 });
        let first = db.append(&event).await.unwrap();
        let second = db.append(&event).await.unwrap();
        assert!(second > first);
        assert_eq!(EventLog::count(&db).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_bus_routes_same_key_to_same_partition() {
        let db = test_db().await.with_partitions(3);
        let a = db.publish("article_liked", "a").await.unwrap();
        let b = db.publish("article_liked", "b").await.unwrap();
        assert_eq!(a.partition, b.partition);
        assert!(b.offset > a.offset);

        let fetched = db.fetch("g", a.partition, 10).await.unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].key, "article_liked");
    }

    #[tokio::test]
    async fn test_mailboxes_are_separate_keyspaces() {
        let db = test_db().await;
        let event = FeedEvent::new(1, EventPayload::Followed { followee_id: 2 });
        let item = UserFeedItem::from_event(&event).unwrap();
        db.push(Mailbox::Outbox, 1, &item).await.unwrap();
        assert_eq!(FeedStore::count(&db, Mailbox::Outbox, 1).await.unwrap(), 1);
        assert_eq!(FeedStore::count(&db, Mailbox::Inbox, 1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_collaborator_lookups() {
        let db = test_db().await;
        db.upsert_user(1, "alice").await.unwrap();
        db.add_follow(2, 1).await.unwrap();
        assert_eq!(db.follower_count(1).await.unwrap(), 1);
        assert_eq!(db.get_user(1).await.unwrap().unwrap().display_name, "alice");
        assert!(db.get_article(5, 1).await.unwrap().is_none());
    }
}
