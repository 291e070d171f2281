// Event Log Store — append-only, replayable record of every feed event.
//
// The dispatcher never reads from here on the normal path (it is fed by the
// bus). Only the producer writes, and only the rebuild procedure replays.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::model::FeedEvent;

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Persist an event and return its newly assigned, monotonically
    /// increasing ID. Any `id` already on the event is ignored.
    async fn append(&self, event: &FeedEvent) -> Result<i64>;

    /// Look up one event by ID.
    async fn get_by_id(&self, id: i64) -> Result<Option<FeedEvent>>;

    /// Events created at or after `since`, oldest first (ties by ID).
    async fn list_since(
        &self,
        since: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<FeedEvent>>;

    /// One actor's events, newest first.
    async fn list_by_actor(&self, actor_id: i64, offset: usize, limit: usize)
        -> Result<Vec<FeedEvent>>;

    /// Total number of logged events.
    async fn count(&self) -> Result<i64>;
}
