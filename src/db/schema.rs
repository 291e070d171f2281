// Database schema — table creation and migrations.
//
// Same versioned approach throughout: a `schema_version` table records which
// migrations have run, and each migration is a closure executing SQL.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all tables if they don't exist yet.
///
/// This is idempotent — safe to call on every startup.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Durable log of user actions, the source of truth for rebuilds
        CREATE TABLE IF NOT EXISTS feed_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            event_type TEXT NOT NULL,          -- wire name, e.g. 'article_liked'
            content TEXT NOT NULL,             -- JSON object, keys depend on type
            created_at TEXT NOT NULL           -- RFC 3339, nanosecond precision
        );

        -- Inbox and outbox collections; feed_key is 'inbox:<uid>' / 'outbox:<uid>'
        CREATE TABLE IF NOT EXISTS feed_items (
            feed_key TEXT NOT NULL,
            item_id TEXT NOT NULL,             -- '<itemType>:<subjectID>'
            score INTEGER NOT NULL,            -- item timestamp in nanoseconds
            item_json TEXT NOT NULL,
            PRIMARY KEY (feed_key, item_id)
        );

        -- Partitioned message bus
        CREATE TABLE IF NOT EXISTS bus_messages (
            msg_offset INTEGER PRIMARY KEY AUTOINCREMENT,
            partition_id INTEGER NOT NULL,
            msg_key TEXT NOT NULL,
            payload TEXT NOT NULL,
            published_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS consumer_offsets (
            group_name TEXT NOT NULL,
            partition_id INTEGER NOT NULL,
            committed_offset INTEGER NOT NULL,
            PRIMARY KEY (group_name, partition_id)
        );

        -- Local stand-ins for the user, article, and follow services
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            display_name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS articles (
            id INTEGER PRIMARY KEY,
            author_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS follows (
            follower_id INTEGER NOT NULL,
            followee_id INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (follower_id, followee_id)
        );

        CREATE INDEX IF NOT EXISTS idx_events_created
            ON feed_events(created_at);

        CREATE INDEX IF NOT EXISTS idx_items_score
            ON feed_items(feed_key, score);

        CREATE INDEX IF NOT EXISTS idx_bus_partition
            ON bus_messages(partition_id, msg_offset);

        CREATE INDEX IF NOT EXISTS idx_follows_followee
            ON follows(followee_id);
        ",
    )
    .context("Failed to create database tables")?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [1],
    )?;

    // Migration v2: per-actor index for the activity listing
    // (`list_by_actor`), which filters on user_id and sorts newest first.
    run_migration(conn, 2, |c| {
        c.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_events_actor
                ON feed_events(user_id, created_at);",
        )
    })?;

    Ok(())
}

/// Run a migration if it hasn't been applied yet.
fn run_migration<F>(conn: &Connection, version: i64, migrate: F) -> Result<()>
where
    F: FnOnce(&Connection) -> rusqlite::Result<()>,
{
    let already_applied: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM schema_version WHERE version = ?1",
        [version],
        |row| row.get(0),
    )?;

    if !already_applied {
        migrate(conn).with_context(|| format!("Migration v{version} failed"))?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [version],
        )?;
    }

    Ok(())
}

/// Count the number of tables in the database (useful for init confirmation).
pub fn table_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_tables_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();
    }

    #[test]
    fn test_table_count() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        // schema_version, feed_events, feed_items, bus_messages,
        // consumer_offsets, users, articles, follows
        assert_eq!(table_count(&conn).unwrap(), 8);
    }

    #[test]
    fn test_migrations_recorded_once() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();
        create_tables(&conn).unwrap();

        let versions: Vec<i64> = conn
            .prepare("SELECT version FROM schema_version ORDER BY version")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[test]
    fn test_actor_index_exists() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        let found: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name='idx_events_actor'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(found, 1);
    }
}
