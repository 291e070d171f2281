// UserFeedItem — the lightweight pointer stored in inboxes and outboxes.
//
// Items are keyed by a composite ID `"<itemType>:<subjectID>"`, so pushing
// the same logical item again overwrites rather than duplicates. The content
// blob is the event payload (with long comment text cut down) serialized as
// compact JSON; the renderer decodes it back into the typed payload.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{EventPayload, FeedEvent};
use crate::output::truncate_chars;

/// Comment text kept in a feed item, in characters.
pub const COMMENT_SNIPPET_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Article,
    Like,
    Follow,
    Comment,
    Collect,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Article => "article",
            ItemType::Like => "like",
            ItemType::Follow => "follow",
            ItemType::Comment => "comment",
            ItemType::Collect => "collect",
        }
    }
}

impl FromStr for ItemType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "article" => Ok(ItemType::Article),
            "like" => Ok(ItemType::Like),
            "follow" => Ok(ItemType::Follow),
            "comment" => Ok(ItemType::Comment),
            "collect" => Ok(ItemType::Collect),
            other => anyhow::bail!("unknown feed item type: {other}"),
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFeedItem {
    pub item_id: String,
    pub item_type: ItemType,
    pub actor_id: i64,
    /// Sort key. Stored as a nanosecond score.
    pub timestamp: DateTime<Utc>,
    /// Compact JSON of the payload summary.
    pub content: String,
}

impl UserFeedItem {
    /// Build the item an event turns into.
    pub fn from_event(event: &FeedEvent) -> Result<Self> {
        let item_type = event.event_type().item_type();
        let summary = summarize(&event.payload);
        let content =
            serde_json::to_string(&summary).context("Failed to serialize feed item content")?;

        Ok(Self {
            item_id: compose_item_id(item_type, event.payload.subject_id()),
            item_type,
            actor_id: event.user_id,
            timestamp: event.created_at,
            content,
        })
    }

    /// Nanoseconds since the epoch; the ordering score in a collection.
    pub fn score(&self) -> i64 {
        self.timestamp.timestamp_nanos_opt().unwrap_or(i64::MAX)
    }

    /// Decode the stored content back into a typed payload.
    pub fn payload(&self) -> Result<EventPayload> {
        serde_json::from_str(&self.content)
            .with_context(|| format!("Corrupt content on feed item {}", self.item_id))
    }
}

/// `"<itemType>:<subjectID>"`.
pub fn compose_item_id(item_type: ItemType, subject_id: i64) -> String {
    format!("{}:{}", item_type.as_str(), subject_id)
}

fn summarize(payload: &EventPayload) -> EventPayload {
    match payload {
        EventPayload::Commented {
            article_id,
            author_id,
            comment_id,
            comment_content,
        } => EventPayload::Commented {
            article_id: *article_id,
            author_id: *author_id,
            comment_id: *comment_id,
            comment_content: truncate_chars(comment_content, COMMENT_SNIPPET_CHARS),
        },
        other => other.clone(),
    }
}
