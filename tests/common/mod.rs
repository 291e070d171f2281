// Shared fixtures for the integration tests: an in-memory database and
// fakes that inject failures at the storage and follow-graph seams.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use fanout::bus::{BusMessage, BusReceipt, EventBus};
use fanout::collab::{Article, FollowGraph};
use fanout::db::SqliteDatabase;
use fanout::events::{EventLog, EventPayload, FeedEvent};
use fanout::feed::{FeedStore, Mailbox, UserFeedItem};

pub fn db() -> Arc<SqliteDatabase> {
    Arc::new(SqliteDatabase::in_memory().unwrap())
}

pub async fn seed_users(db: &SqliteDatabase, users: &[(i64, &str)]) {
    for (id, name) in users {
        db.upsert_user(*id, name).await.unwrap();
    }
}

pub async fn seed_article(db: &SqliteDatabase, id: i64, author_id: i64, title: &str) {
    db.upsert_article(&Article {
        id,
        title: title.to_string(),
        content: format!("Body of {title}"),
        author_id,
    })
    .await
    .unwrap();
}

/// A logged event with a fixed timestamp.
pub fn event_at(user_id: i64, payload: EventPayload, at: DateTime<Utc>) -> FeedEvent {
    let mut event = FeedEvent::new(user_id, payload);
    event.created_at = at;
    event
}

pub fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    Utc::now() - Duration::minutes(minutes)
}

pub fn published(author: i64, article: i64) -> EventPayload {
    EventPayload::Published {
        article_id: article,
        title: format!("Article {article}"),
        author_id: author,
    }
}

/// Item IDs of a collection, newest first.
pub async fn item_ids(store: &dyn FeedStore, mailbox: Mailbox, owner: i64) -> Vec<String> {
    store
        .page(mailbox, owner, 0, 10_000)
        .await
        .unwrap()
        .into_iter()
        .map(|item| item.item_id)
        .collect()
}

// --- Follow graph ---

/// In-memory follow graph whose follower counts can be overridden (to make
/// big-V actors without materializing thousands of edges) or broken.
#[derive(Default)]
pub struct FakeGraph {
    edges: Mutex<Vec<(i64, i64)>>,
    counts: Mutex<HashMap<i64, i64>>,
    broken: Mutex<HashSet<i64>>,
    broken_followees: Mutex<HashSet<i64>>,
}

impl FakeGraph {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn follow(&self, follower: i64, followee: i64) {
        self.edges.lock().unwrap().push((follower, followee));
    }

    pub fn set_follower_count(&self, user: i64, count: i64) {
        self.counts.lock().unwrap().insert(user, count);
    }

    /// Make `follower_count(user)` fail.
    pub fn break_count(&self, user: i64) {
        self.broken.lock().unwrap().insert(user);
    }

    /// Make `list_followees(user)` fail.
    pub fn break_followees(&self, user: i64) {
        self.broken_followees.lock().unwrap().insert(user);
    }
}

#[async_trait]
impl FollowGraph for FakeGraph {
    async fn follower_count(&self, user_id: i64) -> Result<i64> {
        if self.broken.lock().unwrap().contains(&user_id) {
            anyhow::bail!("follow service unavailable");
        }
        if let Some(count) = self.counts.lock().unwrap().get(&user_id) {
            return Ok(*count);
        }
        let edges = self.edges.lock().unwrap();
        Ok(edges.iter().filter(|(_, followee)| *followee == user_id).count() as i64)
    }

    async fn list_followers(&self, user_id: i64, offset: usize, limit: usize) -> Result<Vec<i64>> {
        let mut followers: Vec<i64> = self
            .edges
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, followee)| *followee == user_id)
            .map(|(follower, _)| *follower)
            .collect();
        followers.sort_unstable();
        Ok(followers.into_iter().skip(offset).take(limit).collect())
    }

    async fn list_followees(&self, user_id: i64, offset: usize, limit: usize) -> Result<Vec<i64>> {
        if self.broken_followees.lock().unwrap().contains(&user_id) {
            anyhow::bail!("follow service unavailable");
        }
        let mut followees: Vec<i64> = self
            .edges
            .lock()
            .unwrap()
            .iter()
            .filter(|(follower, _)| *follower == user_id)
            .map(|(_, followee)| *followee)
            .collect();
        followees.sort_unstable();
        Ok(followees.into_iter().skip(offset).take(limit).collect())
    }
}

// --- Feed store ---

/// Feed store that fails inbox writes for chosen owners and otherwise
/// delegates to the real database.
pub struct FlakyStore {
    inner: Arc<SqliteDatabase>,
    failing_inboxes: HashSet<i64>,
}

impl FlakyStore {
    pub fn new(inner: Arc<SqliteDatabase>, failing_inboxes: &[i64]) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failing_inboxes: failing_inboxes.iter().copied().collect(),
        })
    }
}

#[async_trait]
impl FeedStore for FlakyStore {
    async fn push(&self, mailbox: Mailbox, owner: i64, item: &UserFeedItem) -> Result<()> {
        if mailbox == Mailbox::Inbox && self.failing_inboxes.contains(&owner) {
            anyhow::bail!("inbox:{owner} unreachable");
        }
        self.inner.push(mailbox, owner, item).await
    }

    async fn page(
        &self,
        mailbox: Mailbox,
        owner: i64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<UserFeedItem>> {
        self.inner.page(mailbox, owner, offset, limit).await
    }

    async fn trim(&self, mailbox: Mailbox, owner: i64, max_len: usize) -> Result<usize> {
        self.inner.trim(mailbox, owner, max_len).await
    }

    async fn count(&self, mailbox: Mailbox, owner: i64) -> Result<usize> {
        FeedStore::count(self.inner.as_ref(), mailbox, owner).await
    }

    async fn clear(&self, mailbox: Mailbox, owner: i64) -> Result<()> {
        self.inner.clear(mailbox, owner).await
    }
}

// --- Event log and bus ---

/// Event log that refuses every write.
pub struct FailingLog;

#[async_trait]
impl EventLog for FailingLog {
    async fn append(&self, _event: &FeedEvent) -> Result<i64> {
        anyhow::bail!("database is locked")
    }

    async fn get_by_id(&self, _id: i64) -> Result<Option<FeedEvent>> {
        Ok(None)
    }

    async fn list_since(
        &self,
        _since: DateTime<Utc>,
        _offset: usize,
        _limit: usize,
    ) -> Result<Vec<FeedEvent>> {
        Ok(Vec::new())
    }

    async fn list_by_actor(
        &self,
        _actor_id: i64,
        _offset: usize,
        _limit: usize,
    ) -> Result<Vec<FeedEvent>> {
        Ok(Vec::new())
    }

    async fn count(&self) -> Result<i64> {
        Ok(0)
    }
}

/// Bus that is always down.
pub struct FailingBus;

#[async_trait]
impl EventBus for FailingBus {
    fn partitions(&self) -> u32 {
        1
    }

    async fn publish(&self, _key: &str, _payload: &str) -> Result<BusReceipt> {
        anyhow::bail!("broker unreachable")
    }

    async fn fetch(&self, _group: &str, _partition: u32, _max: usize) -> Result<Vec<BusMessage>> {
        anyhow::bail!("broker unreachable")
    }

    async fn commit(&self, _group: &str, _partition: u32, _offset: i64) -> Result<()> {
        anyhow::bail!("broker unreachable")
    }

    async fn lag(&self, _group: &str, _partition: u32) -> Result<i64> {
        anyhow::bail!("broker unreachable")
    }
}
