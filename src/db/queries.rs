// Database queries — SQL for every table.
//
// Every database interaction goes through this module. This keeps SQL
// contained in one place and gives the rest of the app clean Rust interfaces.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use crate::bus::BusMessage;
use crate::collab::{Article, UserProfile};
use crate::events::{EventPayload, FeedEvent};
use crate::feed::UserFeedItem;

/// Fixed-width RFC 3339, so text order matches time order.
fn format_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid timestamp in database: {raw}"))?;
    Ok(parsed.with_timezone(&Utc))
}

// --- Event log ---

/// Raw columns of a feed_events row, decoded outside the rusqlite closure.
type EventRow = (i64, i64, String, String, String);

fn read_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode_event((id, user_id, event_type, content, created_at): EventRow) -> Result<FeedEvent> {
    let content: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Corrupt content JSON on event {id}"))?;
    Ok(FeedEvent {
        id,
        user_id,
        payload: EventPayload::from_parts(&event_type, content)?,
        created_at: parse_time(&created_at)?,
    })
}

/// Decode rows, logging and skipping any that no longer parse.
fn decode_events(rows: Vec<EventRow>) -> Vec<FeedEvent> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.0;
            match decode_event(row) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(event_id = id, error = %e, "Skipping unreadable feed event");
                    None
                }
            }
        })
        .collect()
}

/// Append an event and return its assigned ID.
pub fn insert_event(conn: &Connection, event: &FeedEvent) -> Result<i64> {
    let content = serde_json::to_string(&event.payload.content())?;
    conn.execute(
        "INSERT INTO feed_events (user_id, event_type, content, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            event.user_id,
            event.event_type().as_str(),
            content,
            format_time(&event.created_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_event(conn: &Connection, id: i64) -> Result<Option<FeedEvent>> {
    let row = conn
        .query_row(
            "SELECT id, user_id, event_type, content, created_at FROM feed_events WHERE id = ?1",
            params![id],
            read_event_row,
        )
        .optional()?;
    row.map(decode_event).transpose()
}

/// Events created at or after `since`, oldest first.
pub fn list_events_since(
    conn: &Connection,
    since: &DateTime<Utc>,
    offset: usize,
    limit: usize,
) -> Result<Vec<FeedEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, event_type, content, created_at
         FROM feed_events
         WHERE created_at >= ?1
         ORDER BY created_at ASC, id ASC
         LIMIT ?2 OFFSET ?3",
    )?;
    let rows = stmt
        .query_map(
            params![format_time(since), limit as i64, offset as i64],
            read_event_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(decode_events(rows))
}

/// One actor's events, newest first.
pub fn list_events_by_actor(
    conn: &Connection,
    actor_id: i64,
    offset: usize,
    limit: usize,
) -> Result<Vec<FeedEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, event_type, content, created_at
         FROM feed_events
         WHERE user_id = ?1
         ORDER BY created_at DESC, id DESC
         LIMIT ?2 OFFSET ?3",
    )?;
    let rows = stmt
        .query_map(
            params![actor_id, limit as i64, offset as i64],
            read_event_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(decode_events(rows))
}

pub fn event_count(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM feed_events", [], |row| row.get(0))?;
    Ok(count)
}

// --- Feed items ---

/// Insert or replace an item in a collection.
pub fn upsert_feed_item(conn: &Connection, feed_key: &str, item: &UserFeedItem) -> Result<()> {
    let item_json = serde_json::to_string(item)?;
    conn.execute(
        "INSERT INTO feed_items (feed_key, item_id, score, item_json)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(feed_key, item_id) DO UPDATE SET
            score = ?3,
            item_json = ?4",
        params![feed_key, item.item_id, item.score(), item_json],
    )?;
    Ok(())
}

/// Items in a collection, highest score first.
pub fn page_feed_items(
    conn: &Connection,
    feed_key: &str,
    offset: usize,
    limit: usize,
) -> Result<Vec<UserFeedItem>> {
    let mut stmt = conn.prepare(
        "SELECT item_id, item_json FROM feed_items
         WHERE feed_key = ?1
         ORDER BY score DESC, item_id DESC
         LIMIT ?2 OFFSET ?3",
    )?;
    let rows = stmt
        .query_map(params![feed_key, limit as i64, offset as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let items = rows
        .into_iter()
        .filter_map(
            |(item_id, json)| match serde_json::from_str::<UserFeedItem>(&json) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(feed_key, item_id = %item_id, error = %e, "Skipping unreadable feed item");
                    None
                }
            },
        )
        .collect();
    Ok(items)
}

/// Keep the `max_len` highest-scored items; returns how many were deleted.
pub fn trim_feed_items(conn: &Connection, feed_key: &str, max_len: usize) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM feed_items
         WHERE feed_key = ?1
           AND item_id NOT IN (
               SELECT item_id FROM feed_items
               WHERE feed_key = ?1
               ORDER BY score DESC, item_id DESC
               LIMIT ?2
           )",
        params![feed_key, max_len as i64],
    )?;
    Ok(removed)
}

pub fn count_feed_items(conn: &Connection, feed_key: &str) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM feed_items WHERE feed_key = ?1",
        params![feed_key],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as usize)
}

pub fn clear_feed_items(conn: &Connection, feed_key: &str) -> Result<()> {
    conn.execute("DELETE FROM feed_items WHERE feed_key = ?1", params![feed_key])?;
    Ok(())
}

// --- Bus ---

/// Append a message and return its offset.
pub fn insert_bus_message(conn: &Connection, partition: u32, key: &str, payload: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO bus_messages (partition_id, msg_key, payload) VALUES (?1, ?2, ?3)",
        params![partition, key, payload],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Messages past the group's committed offset, oldest first.
pub fn fetch_bus_messages(
    conn: &Connection,
    group: &str,
    partition: u32,
    max: usize,
) -> Result<Vec<BusMessage>> {
    let mut stmt = conn.prepare(
        "SELECT msg_offset, partition_id, msg_key, payload
         FROM bus_messages
         WHERE partition_id = ?1
           AND msg_offset > COALESCE(
               (SELECT committed_offset FROM consumer_offsets
                WHERE group_name = ?2 AND partition_id = ?1), 0)
         ORDER BY msg_offset ASC
         LIMIT ?3",
    )?;
    let messages = stmt
        .query_map(params![partition, group, max as i64], |row| {
            Ok(BusMessage {
                offset: row.get(0)?,
                partition: row.get(1)?,
                key: row.get(2)?,
                payload: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(messages)
}

/// Record an acknowledged offset. Never moves backwards.
pub fn commit_offset(conn: &Connection, group: &str, partition: u32, offset: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO consumer_offsets (group_name, partition_id, committed_offset)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(group_name, partition_id) DO UPDATE SET
            committed_offset = MAX(committed_offset, ?3)",
        params![group, partition, offset],
    )?;
    Ok(())
}

/// Messages in the partition the group has not acknowledged.
pub fn consumer_lag(conn: &Connection, group: &str, partition: u32) -> Result<i64> {
    let lag = conn.query_row(
        "SELECT COUNT(*) FROM bus_messages
         WHERE partition_id = ?1
           AND msg_offset > COALESCE(
               (SELECT committed_offset FROM consumer_offsets
                WHERE group_name = ?2 AND partition_id = ?1), 0)",
        params![partition, group],
        |row| row.get(0),
    )?;
    Ok(lag)
}

// --- Users, articles, follows ---

pub fn upsert_user(conn: &Connection, id: i64, display_name: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO users (id, display_name) VALUES (?1, ?2)
         ON CONFLICT(id) DO UPDATE SET display_name = ?2",
        params![id, display_name],
    )?;
    Ok(())
}

pub fn get_user(conn: &Connection, id: i64) -> Result<Option<UserProfile>> {
    let user = conn
        .query_row(
            "SELECT id, display_name FROM users WHERE id = ?1",
            params![id],
            |row| {
                Ok(UserProfile {
                    id: row.get(0)?,
                    display_name: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(user)
}

pub fn upsert_article(conn: &Connection, article: &Article) -> Result<()> {
    conn.execute(
        "INSERT INTO articles (id, author_id, title, content) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET author_id = ?2, title = ?3, content = ?4",
        params![article.id, article.author_id, article.title, article.content],
    )?;
    Ok(())
}

pub fn get_article(conn: &Connection, id: i64) -> Result<Option<Article>> {
    let article = conn
        .query_row(
            "SELECT id, title, content, author_id FROM articles WHERE id = ?1",
            params![id],
            |row| {
                Ok(Article {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    content: row.get(2)?,
                    author_id: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(article)
}

/// Record a follow edge. Returns false if it already existed.
pub fn add_follow(conn: &Connection, follower_id: i64, followee_id: i64) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO follows (follower_id, followee_id) VALUES (?1, ?2)",
        params![follower_id, followee_id],
    )?;
    Ok(inserted > 0)
}

pub fn follower_count(conn: &Connection, user_id: i64) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM follows WHERE followee_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn list_followers(
    conn: &Connection,
    user_id: i64,
    offset: usize,
    limit: usize,
) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT follower_id FROM follows
         WHERE followee_id = ?1
         ORDER BY follower_id ASC
         LIMIT ?2 OFFSET ?3",
    )?;
    let ids = stmt
        .query_map(params![user_id, limit as i64, offset as i64], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

pub fn list_followees(
    conn: &Connection,
    user_id: i64,
    offset: usize,
    limit: usize,
) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT followee_id FROM follows
         WHERE follower_id = ?1
         ORDER BY followee_id ASC
         LIMIT ?2 OFFSET ?3",
    )?;
    let ids = stmt
        .query_map(params![user_id, limit as i64, offset as i64], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use chrono::Duration;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        conn
    }

    fn like(user_id: i64, article_id: i64, minutes_ago: i64) -> FeedEvent {
        let mut event = FeedEvent::new(
            user_id,
            EventPayload::Liked {
                article_id,
                author_id: 99,
            },
        );
        event.created_at = Utc::now() - Duration::minutes(minutes_ago);
        event
    }

    #[test]
    fn test_event_roundtrip() {
        let conn = test_db();
        let event = like(1, 10, 0);
        let id = insert_event(&conn, &event).unwrap();
        assert!(id > 0);

        let loaded = get_event(&conn, id).unwrap().unwrap();
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.user_id, 1);
        assert_eq!(loaded.payload, event.payload);
        assert_eq!(loaded.created_at, event.created_at);
        assert!(get_event(&conn, id + 100).unwrap().is_none());
    }

    #[test]
    fn test_list_since_is_ascending_and_windowed() {
        let conn = test_db();
        insert_event(&conn, &like(1, 1, 60 * 24 * 40)).unwrap();
        insert_event(&conn, &like(1, 2, 30)).unwrap();
        insert_event(&conn, &like(1, 3, 10)).unwrap();

        let since = Utc::now() - Duration::days(30);
        let events = list_events_since(&conn, &since, 0, 100).unwrap();
        let subjects: Vec<i64> = events.iter().map(|e| e.payload.subject_id()).collect();
        assert_eq!(subjects, vec![2, 3]);

        let second_page = list_events_since(&conn, &since, 1, 100).unwrap();
        assert_eq!(second_page.len(), 1);
    }

    #[test]
    fn test_list_by_actor_newest_first() {
        let conn = test_db();
        insert_event(&conn, &like(1, 1, 20)).unwrap();
        insert_event(&conn, &like(2, 2, 15)).unwrap();
        insert_event(&conn, &like(1, 3, 5)).unwrap();

        let events = list_events_by_actor(&conn, 1, 0, 10).unwrap();
        let subjects: Vec<i64> = events.iter().map(|e| e.payload.subject_id()).collect();
        assert_eq!(subjects, vec![3, 1]);
    }

    #[test]
    fn test_corrupt_event_row_is_skipped() {
        let conn = test_db();
        insert_event(&conn, &like(1, 1, 5)).unwrap();
        conn.execute(
            "INSERT INTO feed_events (user_id, event_type, content, created_at)
             VALUES (1, 'article_shared', '{}', ?1)",
            params![format_time(&Utc::now())],
        )
        .unwrap();

        let since = Utc::now() - Duration::days(1);
        assert_eq!(list_events_since(&conn, &since, 0, 10).unwrap().len(), 1);
        assert_eq!(event_count(&conn).unwrap(), 2);
    }

    #[test]
    fn test_feed_item_upsert_replaces() {
        let conn = test_db();
        let mut item = UserFeedItem::from_event(&like(1, 10, 10)).unwrap();
        upsert_feed_item(&conn, "inbox:5", &item).unwrap();
        item.timestamp = Utc::now();
        upsert_feed_item(&conn, "inbox:5", &item).unwrap();

        let items = page_feed_items(&conn, "inbox:5", 0, 10).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].timestamp, item.timestamp);
    }

    #[test]
    fn test_trim_keeps_newest() {
        let conn = test_db();
        for minutes in 0..5 {
            let item = UserFeedItem::from_event(&like(1, minutes + 1, minutes)).unwrap();
            upsert_feed_item(&conn, "inbox:5", &item).unwrap();
        }

        assert_eq!(trim_feed_items(&conn, "inbox:5", 3).unwrap(), 2);
        assert_eq!(count_feed_items(&conn, "inbox:5").unwrap(), 3);

        let ids: Vec<String> = page_feed_items(&conn, "inbox:5", 0, 10)
            .unwrap()
            .into_iter()
            .map(|i| i.item_id)
            .collect();
        assert_eq!(ids, vec!["like:1", "like:2", "like:3"]);

        assert_eq!(trim_feed_items(&conn, "inbox:5", 3).unwrap(), 0);
    }

    #[test]
    fn test_clear_only_touches_one_collection() {
        let conn = test_db();
        let item = UserFeedItem::from_event(&like(1, 10, 0)).unwrap();
        upsert_feed_item(&conn, "inbox:5", &item).unwrap();
        upsert_feed_item(&conn, "outbox:5", &item).unwrap();
        clear_feed_items(&conn, "inbox:5").unwrap();
        assert_eq!(count_feed_items(&conn, "inbox:5").unwrap(), 0);
        assert_eq!(count_feed_items(&conn, "outbox:5").unwrap(), 1);
    }

    #[test]
    fn test_bus_fetch_commit_lag() {
        let conn = test_db();
        let first = insert_bus_message(&conn, 0, "article_liked", "a").unwrap();
        let second = insert_bus_message(&conn, 0, "article_liked", "b").unwrap();
        insert_bus_message(&conn, 1, "user_followed", "c").unwrap();

        assert_eq!(consumer_lag(&conn, "g", 0).unwrap(), 2);
        let batch = fetch_bus_messages(&conn, "g", 0, 10).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].payload, "a");

        commit_offset(&conn, "g", 0, first).unwrap();
        let batch = fetch_bus_messages(&conn, "g", 0, 10).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].offset, second);

        // Stale commits never rewind
        commit_offset(&conn, "g", 0, second).unwrap();
        commit_offset(&conn, "g", 0, first).unwrap();
        assert_eq!(consumer_lag(&conn, "g", 0).unwrap(), 0);

        // Other groups keep their own position
        assert_eq!(consumer_lag(&conn, "other", 0).unwrap(), 2);
    }

    #[test]
    fn test_follow_graph_queries() {
        let conn = test_db();
        assert!(add_follow(&conn, 2, 1).unwrap());
        assert!(add_follow(&conn, 3, 1).unwrap());
        assert!(!add_follow(&conn, 3, 1).unwrap());
        add_follow(&conn, 2, 4).unwrap();

        assert_eq!(follower_count(&conn, 1).unwrap(), 2);
        assert_eq!(list_followers(&conn, 1, 0, 10).unwrap(), vec![2, 3]);
        assert_eq!(list_followers(&conn, 1, 1, 10).unwrap(), vec![3]);
        assert_eq!(list_followees(&conn, 2, 0, 10).unwrap(), vec![1, 4]);
    }

    #[test]
    fn test_user_and_article_lookup() {
        let conn = test_db();
        upsert_user(&conn, 1, "alice").unwrap();
        upsert_user(&conn, 1, "alice2").unwrap();
        assert_eq!(get_user(&conn, 1).unwrap().unwrap().display_name, "alice2");
        assert!(get_user(&conn, 2).unwrap().is_none());

        let article = Article {
            id: 7,
            title: "Rust".to_string(),
            content: "body".to_string(),
            author_id: 1,
        };
        upsert_article(&conn, &article).unwrap();
        assert_eq!(get_article(&conn, 7).unwrap(), Some(article));
    }
}
