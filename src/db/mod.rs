// Database layer — SQLite storage for the event log, feed collections, the
// message bus, and the local user/article/follow tables.
//
// We use rusqlite with the "bundled" feature so there's no system SQLite
// dependency. The database file lives wherever FANOUT_DB_PATH points
// (defaults to ./fanout.db).

pub mod queries;
pub mod schema;
pub mod sqlite;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;

pub use sqlite::SqliteDatabase;

/// Open (or create) the database and run migrations.
///
/// Called by `fanout init` and by any command that needs database access.
pub fn initialize(db_path: &str) -> Result<Connection> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for database: {}", db_path))?;
        }
    }

    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database at {}", db_path))?;

    // WAL lets the consumer and CLI readers share the file
    conn.pragma_update(None, "journal_mode", "WAL")?;

    schema::create_tables(&conn)?;

    Ok(conn)
}

/// Open an existing database (fails if it doesn't exist yet).
pub fn open(db_path: &str) -> Result<Connection> {
    if !Path::new(db_path).exists() {
        anyhow::bail!(
            "Database not found at {}. Run `fanout init` first.",
            db_path
        );
    }

    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database at {}", db_path))?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    // Pick up migrations added since the file was created
    schema::create_tables(&conn)?;

    Ok(conn)
}
