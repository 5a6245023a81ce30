// Local persistent backend: SQLite document store and identity provider.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is
// !Sync. Trait methods lock the mutex, do synchronous rusqlite work, and
// return. Live listeners only see writes made through this process.
//
// Several processes may share one database file. Every write runs in a
// `BEGIN IMMEDIATE` transaction and takes its version from the `counters`
// table inside that transaction, so versions are unique across processes
// and read-modify-write operations can't interleave.
//
// The free functions at the bottom hold all the SQL, so the trait impls
// read as plain store semantics.

use std::sync::Mutex as StdMutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use super::clock::MonotonicClock;
use super::error::{BackendError, BackendResult};
use super::accounts::{refresh_current, validate_email, validate_password};
use super::query;
use super::subscribers::SubscriberSet;
use super::traits::{
    Document, DocumentStore, IdentityProvider, Precondition, ProfileChanges, Query, Snapshot,
    Subscription, Write,
};
use crate::models::Identity;
use crate::sync::lock;

// ============================================================
// Document store
// ============================================================

pub struct SqliteStore {
    conn: Mutex<Connection>,
    subscribers: StdMutex<SubscriberSet>,
    clock: MonotonicClock,
}

impl SqliteStore {
    /// Wrap an already-opened connection, creating tables if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        super::schema::create_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            subscribers: StdMutex::new(SubscriberSet::new()),
            clock: MonotonicClock::new(),
        })
    }

    pub fn open(db_path: &str) -> Result<Self> {
        Self::new(super::initialize(db_path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    /// Re-deliver listeners on `collection`. Called with the connection
    /// still locked so listeners observe writes in commit order.
    fn publish(&self, conn: &Connection, collection: &str) {
        let mut subscribers = lock(&self.subscribers);
        if subscribers.is_empty() {
            return;
        }
        subscribers.publish(collection, |q| match load_collection(conn, &q.collection) {
            Ok(docs) => Some(query::run(q, docs)),
            Err(e) => {
                warn!(error = %e, collection = %q.collection, "Failed to evaluate live query");
                None
            }
        });
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    fn server_timestamp(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn create(&self, collection: &str, data: Document) -> BackendResult<String> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let mut conn = self.conn.lock().await;
        let tx = begin_write(&mut conn)?;
        write_doc(&tx, collection, &id, &data)?;
        tx.commit()?;
        self.publish(&conn, collection);
        Ok(id)
    }

    async fn set(&self, collection: &str, id: &str, data: Document) -> BackendResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = begin_write(&mut conn)?;
        write_doc(&tx, collection, id, &data)?;
        tx.commit()?;
        self.publish(&conn, collection);
        Ok(())
    }

    async fn read(&self, collection: &str, id: &str) -> BackendResult<Option<Snapshot>> {
        let conn = self.conn.lock().await;
        read_doc(&conn, collection, id)
    }

    async fn update(&self, collection: &str, id: &str, fields: Document) -> BackendResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = begin_write(&mut conn)?;
        let Some(mut current) = read_doc(&tx, collection, id)? else {
            return Err(BackendError::NotFound(format!("{collection}/{id}")));
        };
        current.data.extend(fields);
        write_doc(&tx, collection, id, &current.data)?;
        tx.commit()?;
        self.publish(&conn, collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> BackendResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = begin_write(&mut conn)?;
        let removed = delete_doc(&tx, collection, id)?;
        tx.commit()?;
        if removed {
            self.publish(&conn, collection);
        }
        Ok(())
    }

    async fn increment(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> BackendResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = begin_write(&mut conn)?;
        let Some(mut current) = read_doc(&tx, collection, id)? else {
            return Err(BackendError::NotFound(format!("{collection}/{id}")));
        };
        let value = current.data.get(field).and_then(Value::as_i64).unwrap_or(0);
        current
            .data
            .insert(field.to_string(), Value::from(value.saturating_add(delta)));
        write_doc(&tx, collection, id, &current.data)?;
        tx.commit()?;
        self.publish(&conn, collection);
        Ok(())
    }

    async fn query(&self, query: &Query) -> BackendResult<Vec<Snapshot>> {
        let conn = self.conn.lock().await;
        let docs = load_collection(&conn, &query.collection)?;
        Ok(query::run(query, docs))
    }

    async fn subscribe(&self, query: Query) -> BackendResult<Subscription> {
        let conn = self.conn.lock().await;
        let initial = query::run(&query, load_collection(&conn, &query.collection)?);
        Ok(lock(&self.subscribers).add(query, initial))
    }

    async fn commit(
        &self,
        preconditions: Vec<Precondition>,
        writes: Vec<Write>,
    ) -> BackendResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = begin_write(&mut conn)?;

        for pre in &preconditions {
            let current = read_doc(&tx, &pre.collection, &pre.id)?.map(|s| s.version);
            if current != pre.version {
                return Err(BackendError::Conflict(format!(
                    "{}/{} changed during transaction",
                    pre.collection, pre.id
                )));
            }
        }

        // Any early return drops `tx`, which rolls back
        let mut touched = Vec::new();
        for write in writes {
            match write {
                Write::Update {
                    collection,
                    id,
                    fields,
                } => {
                    let Some(mut current) = read_doc(&tx, &collection, &id)? else {
                        return Err(BackendError::NotFound(format!("{collection}/{id}")));
                    };
                    current.data.extend(fields);
                    write_doc(&tx, &collection, &id, &current.data)?;
                    touched.push(collection);
                }
                Write::Delete { collection, id } => {
                    delete_doc(&tx, &collection, &id)?;
                    touched.push(collection);
                }
            }
        }
        tx.commit()?;

        touched.sort();
        touched.dedup();
        for collection in touched {
            self.publish(&conn, &collection);
        }
        Ok(())
    }
}

// ============================================================
// Identity provider
// ============================================================

/// Identity provider backed by the `accounts` and `current_session` tables.
///
/// The signed-in account survives restarts, the way a hosted SDK persists
/// its auth state locally.
pub struct SqliteIdentity {
    conn: Mutex<Connection>,
    current: watch::Sender<Option<Identity>>,
    cost: u32,
}

impl SqliteIdentity {
    pub fn new(conn: Connection) -> Result<Self> {
        super::schema::create_tables(&conn)?;
        let signed_in = load_session(&conn)?;
        if let Some(identity) = &signed_in {
            debug!(uid = %identity.uid, "Restored persisted session");
        }
        let (current, _) = watch::channel(signed_in);
        Ok(Self {
            conn: Mutex::new(conn),
            current,
            cost: bcrypt::DEFAULT_COST,
        })
    }

    pub fn open(db_path: &str) -> Result<Self> {
        Self::new(super::initialize(db_path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    /// Override the bcrypt cost (tests use the minimum).
    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    /// Check `password` against a looked-up account, off the async runtime.
    async fn verify(
        &self,
        account: Option<(Identity, String)>,
        password: &str,
    ) -> BackendResult<Identity> {
        let (identity, hash) =
            account.ok_or_else(|| BackendError::Credentials("unknown account".to_string()))?;
        let password = password.to_string();
        let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| BackendError::Internal(format!("password check panicked: {e}")))??;
        if !matches {
            return Err(BackendError::Credentials("wrong password".to_string()));
        }
        Ok(identity)
    }

    async fn hash(&self, password: &str) -> BackendResult<String> {
        let password = password.to_string();
        let cost = self.cost;
        let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| BackendError::Internal(format!("password hashing panicked: {e}")))??;
        Ok(hash)
    }
}

#[async_trait]
impl IdentityProvider for SqliteIdentity {
    async fn create_account(&self, email: &str, password: &str) -> BackendResult<Identity> {
        validate_email(email)?;
        validate_password(password)?;
        let password_hash = self.hash(password).await?;

        let identity = Identity {
            uid: uuid::Uuid::new_v4().simple().to_string(),
            email: email.to_string(),
            display_name: None,
            photo_url: None,
        };

        {
            let conn = self.conn.lock().await;
            if find_account(&conn, "email", email)?.is_some() {
                return Err(BackendError::InvalidArgument(
                    "email already in use".to_string(),
                ));
            }
            conn.execute(
                "INSERT INTO accounts (uid, email, password_hash) VALUES (?1, ?2, ?3)",
                params![identity.uid, identity.email, password_hash],
            )?;
            save_session(&conn, &identity.uid)?;
        }

        self.current.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Identity> {
        let account = {
            let conn = self.conn.lock().await;
            find_account(&conn, "email", email)?
        };
        let identity = self.verify(account, password).await?;

        save_session(&*self.conn.lock().await, &identity.uid)?;
        self.current.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        self.conn
            .lock()
            .await
            .execute("DELETE FROM current_session", [])?;
        self.current.send_replace(None);
        Ok(())
    }

    async fn update_profile(
        &self,
        identity: &Identity,
        changes: ProfileChanges,
    ) -> BackendResult<Identity> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE accounts
             SET display_name = COALESCE(?2, display_name),
                 photo_url = COALESCE(?3, photo_url)
             WHERE uid = ?1",
            params![identity.uid, changes.display_name, changes.photo_url],
        )?;
        if changed == 0 {
            return Err(BackendError::NotFound(format!("account {}", identity.uid)));
        }
        let updated = find_account(&conn, "uid", &identity.uid)?
            .map(|(identity, _)| identity)
            .ok_or_else(|| BackendError::NotFound(format!("account {}", identity.uid)))?;
        refresh_current(&self.current, &updated);
        Ok(updated)
    }

    async fn change_email(
        &self,
        identity: &Identity,
        new_email: &str,
        current_password: &str,
    ) -> BackendResult<Identity> {
        validate_email(new_email)?;
        let account = {
            let conn = self.conn.lock().await;
            find_account(&conn, "uid", &identity.uid)?
        };
        let mut verified = self.verify(account, current_password).await?;

        let conn = self.conn.lock().await;
        if find_account(&conn, "email", new_email)?.is_some() {
            return Err(BackendError::InvalidArgument(
                "email already in use".to_string(),
            ));
        }
        conn.execute(
            "UPDATE accounts SET email = ?2 WHERE uid = ?1",
            params![identity.uid, new_email],
        )?;
        verified.email = new_email.to_string();
        refresh_current(&self.current, &verified);
        Ok(verified)
    }

    async fn change_password(
        &self,
        identity: &Identity,
        current_password: &str,
        new_password: &str,
    ) -> BackendResult<()> {
        validate_password(new_password)?;
        let account = {
            let conn = self.conn.lock().await;
            find_account(&conn, "uid", &identity.uid)?
        };
        self.verify(account, current_password).await?;
        let password_hash = self.hash(new_password).await?;

        self.conn.lock().await.execute(
            "UPDATE accounts SET password_hash = ?2 WHERE uid = ?1",
            params![identity.uid, password_hash],
        )?;
        Ok(())
    }

    fn watch(&self) -> watch::Receiver<Option<Identity>> {
        self.current.subscribe()
    }
}

// ============================================================
// SQL
// ============================================================

fn read_doc(conn: &Connection, collection: &str, id: &str) -> BackendResult<Option<Snapshot>> {
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT data, version FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    row.map(|(data, version)| -> BackendResult<Snapshot> {
        Ok(Snapshot {
            id: id.to_string(),
            data: serde_json::from_str(&data)?,
            version: version as u64,
        })
    })
    .transpose()
}

/// Start a write transaction holding the database write lock from the
/// first statement, so reads inside it see the latest committed state.
fn begin_write(conn: &mut Connection) -> BackendResult<rusqlite::Transaction<'_>> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

/// Take the next document version. Must run inside a write transaction.
fn next_version(conn: &Connection) -> BackendResult<u64> {
    conn.execute(
        "UPDATE counters SET value = value + 1 WHERE name = 'document_version'",
        [],
    )?;
    let version: i64 = conn.query_row(
        "SELECT value FROM counters WHERE name = 'document_version'",
        [],
        |row| row.get(0),
    )?;
    Ok(version as u64)
}

/// Upsert a document under a fresh version. Must run inside a write
/// transaction.
fn write_doc(conn: &Connection, collection: &str, id: &str, data: &Document) -> BackendResult<()> {
    let json = serde_json::to_string(data)?;
    let version = next_version(conn)?;
    conn.execute(
        "INSERT INTO documents (collection, id, data, version)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(collection, id) DO UPDATE SET data = ?3, version = ?4",
        params![collection, id, json, version as i64],
    )?;
    Ok(())
}

/// Returns whether a document was actually removed.
fn delete_doc(conn: &Connection, collection: &str, id: &str) -> BackendResult<bool> {
    let removed = conn.execute(
        "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
        params![collection, id],
    )?;
    Ok(removed > 0)
}

fn load_collection(conn: &Connection, collection: &str) -> BackendResult<Vec<Snapshot>> {
    let mut stmt = conn.prepare("SELECT id, data, version FROM documents WHERE collection = ?1")?;
    let rows = stmt.query_map(params![collection], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;

    let mut docs = Vec::new();
    for row in rows {
        let (id, data, version) = row?;
        docs.push(Snapshot {
            id,
            data: serde_json::from_str(&data)?,
            version: version as u64,
        });
    }
    Ok(docs)
}

/// Find an account by `uid` or `email`, returning it with its password hash.
fn find_account(
    conn: &Connection,
    column: &'static str,
    value: &str,
) -> BackendResult<Option<(Identity, String)>> {
    let sql = format!(
        "SELECT uid, email, display_name, photo_url, password_hash FROM accounts WHERE {column} = ?1"
    );
    let account = conn
        .query_row(&sql, params![value], |row| {
            Ok((
                Identity {
                    uid: row.get(0)?,
                    email: row.get(1)?,
                    display_name: row.get(2)?,
                    photo_url: row.get(3)?,
                },
                row.get(4)?,
            ))
        })
        .optional()?;
    Ok(account)
}

fn save_session(conn: &Connection, uid: &str) -> BackendResult<()> {
    conn.execute(
        "INSERT INTO current_session (id, uid, signed_in_at)
         VALUES (1, ?1, datetime('now'))
         ON CONFLICT(id) DO UPDATE SET uid = ?1, signed_in_at = datetime('now')",
        params![uid],
    )?;
    Ok(())
}

fn load_session(conn: &Connection) -> BackendResult<Option<Identity>> {
    let uid: Option<String> = conn
        .query_row("SELECT uid FROM current_session WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    match uid {
        Some(uid) => Ok(find_account(conn, "uid", &uid)?.map(|(identity, _)| identity)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::traits::{document, Direction, Transaction};
    use serde_json::json;

    #[tokio::test]
    async fn test_documents_roundtrip_through_sqlite() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .create("posts", document(json!({ "content": "hi", "created_at": 1 })))
            .await
            .unwrap();

        store.increment("posts", &id, "likes_count", 1).await.unwrap();
        let snap = store.read("posts", &id).await.unwrap().unwrap();
        assert_eq!(snap.data["likes_count"], json!(1));
        assert_eq!(snap.data["content"], json!("hi"));

        store.delete("posts", &id).await.unwrap();
        assert!(store.read("posts", &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_transaction_commit_and_conflict() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .set("posts", "p", document(json!({ "content": "v1", "created_at": 1 })))
            .await
            .unwrap();

        let mut tx = Transaction::begin(&store);
        tx.get("posts", "p").await.unwrap();
        tx.update("posts", "p", document(json!({ "content": "v2" })));
        tx.commit().await.unwrap();
        let snap = store.read("posts", "p").await.unwrap().unwrap();
        assert_eq!(snap.data["content"], json!("v2"));

        let mut stale = Transaction::begin(&store);
        stale.get("posts", "p").await.unwrap();
        stale.delete("posts", "p");
        store
            .update("posts", "p", document(json!({ "content": "v3" })))
            .await
            .unwrap();
        assert!(matches!(
            stale.commit().await,
            Err(BackendError::Conflict(_))
        ));
        assert!(store.read("posts", "p").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_two_stores_on_one_file_detect_each_others_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let path = path.to_str().unwrap();
        let a = SqliteStore::open(path).unwrap();
        let c = SqliteStore::open(path).unwrap();

        let id = a
            .create("posts", document(json!({ "content": "hi", "likes_count": 5 })))
            .await
            .unwrap();

        let mut tx = Transaction::begin(&a);
        let seen = tx.get("posts", &id).await.unwrap().unwrap();
        assert_eq!(seen.data["likes_count"], json!(5));

        c.increment("posts", &id, "likes_count", 1).await.unwrap();

        tx.update("posts", &id, document(json!({ "likes_count": 4 })));
        assert!(matches!(tx.commit().await, Err(BackendError::Conflict(_))));

        let snap = a.read("posts", &id).await.unwrap().unwrap();
        assert_eq!(snap.data["likes_count"], json!(6));
    }

    #[tokio::test]
    async fn test_versions_are_unique_across_stores() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let path = path.to_str().unwrap();
        let a = SqliteStore::open(path).unwrap();
        let c = SqliteStore::open(path).unwrap();

        a.set("posts", "p", document(json!({ "likes_count": 0 })))
            .await
            .unwrap();
        let first = a.read("posts", "p").await.unwrap().unwrap().version;

        // Deleting the newest document must not let a version be reused
        c.set("posts", "q", document(json!({ "likes_count": 0 })))
            .await
            .unwrap();
        let deleted = c.read("posts", "q").await.unwrap().unwrap().version;
        c.delete("posts", "q").await.unwrap();

        c.increment("posts", "p", "likes_count", 1).await.unwrap();
        a.increment("posts", "p", "likes_count", 1).await.unwrap();

        let last = c.read("posts", "p").await.unwrap().unwrap();
        assert_eq!(last.data["likes_count"], json!(2));
        assert!(deleted > first);
        assert!(last.version > deleted + 1);
    }

    #[tokio::test]
    async fn test_sqlite_subscription_sees_local_writes() {
        let store = SqliteStore::open_in_memory().unwrap();
        let query = Query::new("posts", "created_at", Direction::Descending).limit(10);
        let mut sub = store.subscribe(query).await.unwrap();
        assert!(sub.next().await.unwrap().unwrap().is_empty());

        store
            .set("posts", "a", document(json!({ "created_at": 5 })))
            .await
            .unwrap();
        let window = sub.next().await.unwrap().unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].id, "a");
    }

    #[tokio::test]
    async fn test_sqlite_identity_persists_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("murmur.db");
        let path = path.to_str().unwrap();

        let created = {
            let provider = SqliteIdentity::open(path).unwrap().with_cost(4);
            provider.create_account("ana@example.com", "secret1").await.unwrap()
        };

        // A fresh provider on the same file starts signed in
        let provider = SqliteIdentity::open(path).unwrap().with_cost(4);
        assert_eq!(provider.watch().borrow().as_ref(), Some(&created));

        provider.sign_out().await.unwrap();
        let provider = SqliteIdentity::open(path).unwrap().with_cost(4);
        assert!(provider.watch().borrow().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_identity_credentials() {
        let provider = SqliteIdentity::open_in_memory().unwrap().with_cost(4);
        let me = provider.create_account("ana@example.com", "secret1").await.unwrap();

        assert!(matches!(
            provider.sign_in("ana@example.com", "nope-nope").await,
            Err(BackendError::Credentials(_))
        ));

        let renamed = provider
            .update_profile(
                &me,
                ProfileChanges {
                    display_name: Some("Ana".to_string()),
                    photo_url: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.display_name.as_deref(), Some("Ana"));

        provider
            .change_password(&me, "secret1", "secret2")
            .await
            .unwrap();
        assert!(provider.sign_in("ana@example.com", "secret1").await.is_err());
        let signed_in = provider.sign_in("ana@example.com", "secret2").await.unwrap();
        assert_eq!(signed_in.display_name.as_deref(), Some("Ana"));
    }
}
