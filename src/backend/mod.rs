// Backend collaborators: identity provider, document store, blob store.
//
// The traits in `traits.rs` are the only way the rest of the crate talks to
// the hosted platform. Two implementations ship with the crate:
//
// - `memory`: everything in-process, with connectivity fault injection.
//   Used by tests and demos.
// - `sqlite` + `fs_blob`: a local persistent backend. Documents and
//   accounts live in one SQLite file (rusqlite "bundled", so there's no
//   system SQLite dependency); blobs live in a directory tree.

pub mod accounts;
pub mod clock;
pub mod error;
pub mod fs_blob;
pub mod memory;
pub mod query;
pub mod schema;
pub mod sqlite;
pub mod subscribers;
pub mod traits;

pub use error::{BackendError, BackendResult};
pub use traits::{
    document, BlobStore, Cursor, Direction, Document, DocumentStore, IdentityProvider,
    Precondition, ProfileChanges, Query, Snapshot, Subscription, SubscriptionEvent, Transaction,
    Write,
};

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// How long a write waits for another connection's lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) the local database and run migrations.
///
/// Both the SQLite document store and the SQLite identity provider go
/// through here, so whichever opens first creates the schema.
pub fn initialize(db_path: &str) -> Result<Connection> {
    // Create parent directories if needed
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for database: {}", db_path))?;
        }
    }

    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database at {}", db_path))?;

    // WAL lets the store and identity connections share the file
    conn.pragma_update(None, "journal_mode", "WAL")?;
    // Other processes may hold the write lock briefly; wait instead of failing
    conn.busy_timeout(BUSY_TIMEOUT)?;

    schema::create_tables(&conn)?;

    Ok(conn)
}
