// Producer — turns a user action into a durable, published feed event.
//
// Order matters: the event is persisted first to obtain its ID, then
// published keyed by event type. A failed persist aborts (nothing goes on
// the bus). A failed publish after a successful persist is only logged,
// since the event can still be recovered by a rebuild.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::log::EventLog;
use super::model::{EventPayload, FeedEvent};
use crate::bus::EventBus;

pub struct Producer {
    log: Arc<dyn EventLog>,
    bus: Arc<dyn EventBus>,
}

impl Producer {
    pub fn new(log: Arc<dyn EventLog>, bus: Arc<dyn EventBus>) -> Self {
        Self { log, bus }
    }

    /// Record an action by `actor_id` and hand it to the bus.
    ///
    /// Returns as soon as the event is durable; fan-out happens later on the
    /// consumer side.
    pub async fn publish_action_event(&self, actor_id: i64, payload: EventPayload) -> Result<i64> {
        self.publish(FeedEvent::new(actor_id, payload)).await
    }

    /// Publish a fully built event (its `created_at` is kept as given).
    pub async fn publish(&self, mut event: FeedEvent) -> Result<i64> {
        event
            .payload
            .validate(event.user_id)
            .with_context(|| format!("Rejected {} event", event.event_type()))?;

        debug!(
            event_type = %event.event_type(),
            actor = event.user_id,
            "Producing feed event"
        );

        let id = self
            .log
            .append(&event)
            .await
            .context("Failed to persist feed event")?;
        event.id = id;

        let published = match event.to_json() {
            Ok(json) => self.bus.publish(event.event_type().as_str(), &json).await,
            Err(e) => Err(e),
        };

        match published {
            Ok(receipt) => {
                info!(
                    event_id = id,
                    event_type = %event.event_type(),
                    partition = receipt.partition,
                    offset = receipt.offset,
                    "Feed event published"
                );
            }
            Err(e) => {
                warn!(
                    event_id = id,
                    error = %e,
                    "Feed event persisted but not published; recoverable by rebuild"
                );
            }
        }

        Ok(id)
    }

    pub async fn publish_article(&self, author_id: i64, article_id: i64, title: &str) -> Result<i64> {
        self.publish_action_event(
            author_id,
            EventPayload::Published {
                article_id,
                title: title.to_string(),
                author_id,
            },
        )
        .await
    }

    pub async fn like_article(&self, user_id: i64, article_id: i64, author_id: i64) -> Result<i64> {
        self.publish_action_event(
            user_id,
            EventPayload::Liked {
                article_id,
                author_id,
            },
        )
        .await
    }

    pub async fn follow_user(&self, follower_id: i64, followee_id: i64) -> Result<i64> {
        self.publish_action_event(follower_id, EventPayload::Followed { followee_id })
            .await
    }

    pub async fn comment_article(
        &self,
        user_id: i64,
        article_id: i64,
        author_id: i64,
        comment_id: i64,
        comment_content: &str,
    ) -> Result<i64> {
        self.publish_action_event(
            user_id,
            EventPayload::Commented {
                article_id,
                author_id,
                comment_id,
                comment_content: comment_content.to_string(),
            },
        )
        .await
    }

    pub async fn collect_article(&self, user_id: i64, article_id: i64, author_id: i64) -> Result<i64> {
        self.publish_action_event(
            user_id,
            EventPayload::Collected {
                article_id,
                author_id,
            },
        )
        .await
    }
}
