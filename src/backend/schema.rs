// Local database schema: table creation and migrations.
//
// We use a simple version-based migration approach: a `schema_version` table
// tracks which migrations have run. Documents are stored as JSON text so the
// document shapes can evolve without migrations.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all tables if they don't exist yet.
///
/// This is idempotent and safe to call on every startup.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Tracks schema version for future migrations
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Every document of every collection
        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,          -- slash path, e.g. posts/<id>/comments
            id TEXT NOT NULL,
            data TEXT NOT NULL,                -- JSON object
            version INTEGER NOT NULL,          -- bumped on every write
            PRIMARY KEY (collection, id)
        );

        -- Named counters. `document_version` stamps every document write,
        -- shared by all connections to this file.
        CREATE TABLE IF NOT EXISTS counters (
            name TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        );
        INSERT OR IGNORE INTO counters (name, value)
            VALUES ('document_version', (SELECT COALESCE(MAX(version), 0) FROM documents));

        -- Accounts for the local identity provider
        CREATE TABLE IF NOT EXISTS accounts (
            uid TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,       -- bcrypt
            display_name TEXT,
            photo_url TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- The signed-in account, persisted across runs
        CREATE TABLE IF NOT EXISTS current_session (
            id INTEGER PRIMARY KEY CHECK (id = 1),  -- singleton row
            uid TEXT NOT NULL,
            signed_in_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);
        ",
    )
    .context("Failed to create database tables")?;

    Ok(())
}

/// Count the number of user-created tables in the database.
pub fn table_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}
