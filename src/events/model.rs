// Event data model — the typed payload union and the JSON wire format.
//
// On the wire (bus messages and the event log) an event looks like
// `{id, user_id, event_type, content, created_at}` where the keys inside
// `content` are fixed per event type. In memory the payload is an enum with
// one variant per event type, so the dispatcher and renderer match on it
// exhaustively instead of probing a loose map.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::feed::ItemType;

/// The kinds of action that produce feed events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Published,
    Liked,
    Followed,
    Commented,
    Collected,
}

impl EventType {
    pub const ALL: [EventType; 5] = [
        EventType::Published,
        EventType::Liked,
        EventType::Followed,
        EventType::Commented,
        EventType::Collected,
    ];

    /// Wire name; also the bus partition key.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Published => "article_published",
            EventType::Liked => "article_liked",
            EventType::Followed => "user_followed",
            EventType::Commented => "article_commented",
            EventType::Collected => "article_collected",
        }
    }

    /// The verb shown for this action in a rendered feed.
    pub fn verb(&self) -> &'static str {
        match self {
            EventType::Published => "published",
            EventType::Liked => "liked",
            EventType::Followed => "followed",
            EventType::Commented => "commented",
            EventType::Collected => "collected",
        }
    }

    /// The feed item type this event becomes.
    pub fn item_type(&self) -> ItemType {
        match self {
            EventType::Published => ItemType::Article,
            EventType::Liked => ItemType::Like,
            EventType::Followed => ItemType::Follow,
            EventType::Commented => ItemType::Comment,
            EventType::Collected => ItemType::Collect,
        }
    }
}

impl FromStr for EventType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown event type: {s}"))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Type-specific event content. The actor is not repeated here; it lives on
/// the enclosing [`FeedEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "content")]
pub enum EventPayload {
    #[serde(rename = "article_published")]
    Published {
        article_id: i64,
        title: String,
        author_id: i64,
    },
    #[serde(rename = "article_liked")]
    Liked { article_id: i64, author_id: i64 },
    #[serde(rename = "user_followed")]
    Followed { followee_id: i64 },
    #[serde(rename = "article_commented")]
    Commented {
        article_id: i64,
        author_id: i64,
        comment_id: i64,
        comment_content: String,
    },
    #[serde(rename = "article_collected")]
    Collected { article_id: i64, author_id: i64 },
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::Published { .. } => EventType::Published,
            EventPayload::Liked { .. } => EventType::Liked,
            EventPayload::Followed { .. } => EventType::Followed,
            EventPayload::Commented { .. } => EventType::Commented,
            EventPayload::Collected { .. } => EventType::Collected,
        }
    }

    /// The ID half of the composite feed item ID (`"<itemType>:<subjectID>"`).
    pub fn subject_id(&self) -> i64 {
        match self {
            EventPayload::Published { article_id, .. }
            | EventPayload::Liked { article_id, .. }
            | EventPayload::Collected { article_id, .. } => *article_id,
            EventPayload::Followed { followee_id } => *followee_id,
            EventPayload::Commented { comment_id, .. } => *comment_id,
        }
    }

    /// The user who owns whatever this event reacts to, if anyone.
    ///
    /// Feedback (likes, comments, collects) targets the article author and
    /// follows target the followee. Publishing targets nobody.
    pub fn notify_target(&self) -> Option<i64> {
        match self {
            EventPayload::Published { .. } => None,
            EventPayload::Liked { author_id, .. }
            | EventPayload::Commented { author_id, .. }
            | EventPayload::Collected { author_id, .. } => Some(*author_id),
            EventPayload::Followed { followee_id } => Some(*followee_id),
        }
    }

    /// Check the payload against the acting user before it is recorded.
    pub fn validate(&self, actor_id: i64) -> Result<()> {
        if actor_id <= 0 {
            anyhow::bail!("actor id must be positive, got {actor_id}");
        }
        match self {
            EventPayload::Published {
                article_id,
                author_id,
                ..
            } => {
                require_id("article_id", *article_id)?;
                if *author_id != actor_id {
                    anyhow::bail!(
                        "published event author_id {author_id} does not match actor {actor_id}"
                    );
                }
            }
            EventPayload::Liked {
                article_id,
                author_id,
            }
            | EventPayload::Collected {
                article_id,
                author_id,
            } => {
                require_id("article_id", *article_id)?;
                require_id("author_id", *author_id)?;
            }
            EventPayload::Followed { followee_id } => {
                require_id("followee_id", *followee_id)?;
                if *followee_id == actor_id {
                    anyhow::bail!("user {actor_id} cannot follow themselves");
                }
            }
            EventPayload::Commented {
                article_id,
                author_id,
                comment_id,
                ..
            } => {
                require_id("article_id", *article_id)?;
                require_id("author_id", *author_id)?;
                require_id("comment_id", *comment_id)?;
            }
        }
        Ok(())
    }

    /// Rebuild a payload from a wire event type name and its content object.
    pub fn from_parts(event_type: &str, content: Value) -> Result<Self> {
        let tagged = serde_json::json!({ "event_type": event_type, "content": content });
        serde_json::from_value(tagged)
            .with_context(|| format!("malformed content for event type {event_type}"))
    }

    /// The `content` object as it appears on the wire.
    pub fn content(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => map.remove("content").unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}

fn require_id(field: &str, value: i64) -> Result<()> {
    if value <= 0 {
        anyhow::bail!("{field} must be positive, got {value}");
    }
    Ok(())
}

/// A recorded user action. `id` is 0 until the event log assigns one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireEvent", into = "WireEvent")]
pub struct FeedEvent {
    pub id: i64,
    pub user_id: i64,
    pub payload: EventPayload,
    pub created_at: DateTime<Utc>,
}

impl FeedEvent {
    /// A not-yet-persisted event stamped with the current time.
    pub fn new(user_id: i64, payload: EventPayload) -> Self {
        Self {
            id: 0,
            user_id,
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// Serialize to the JSON wire format.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize feed event")
    }

    /// Parse the JSON wire format, rejecting unknown types and missing keys.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Failed to parse feed event")
    }
}

/// Flat wire shape of a [`FeedEvent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireEvent {
    id: i64,
    user_id: i64,
    event_type: String,
    content: Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<WireEvent> for FeedEvent {
    type Error = anyhow::Error;

    fn try_from(wire: WireEvent) -> Result<Self> {
        let payload = EventPayload::from_parts(&wire.event_type, wire.content)?;
        Ok(Self {
            id: wire.id,
            user_id: wire.user_id,
            payload,
            created_at: wire.created_at,
        })
    }
}

impl From<FeedEvent> for WireEvent {
    fn from(event: FeedEvent) -> Self {
        Self {
            id: event.id,
            user_id: event.user_id,
            event_type: event.payload.event_type().as_str().to_string(),
            content: event.payload.content(),
            created_at: event.created_at,
        }
    }
}
