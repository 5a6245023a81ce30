// Collaborator traits: the backend-agnostic interface to the hosted platform.
//
// Implementors: the in-memory backend (memory.rs) and the local persistent
// backend (sqlite.rs + fs_blob.rs). All methods are async so a remote SDK,
// a SQLite connection behind a mutex, or plain in-process maps all fit
// behind the same interface.
//
// Documents are schemaless JSON objects addressed by (collection, id).
// Collections are slash-separated paths, so "posts/abc/comments" is the
// comment collection of post "abc".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use super::error::{BackendError, BackendResult};
use crate::models::Identity;

/// A stored document's fields.
pub type Document = serde_json::Map<String, Value>;

/// Turn a `json!({...})` object literal into a `Document`.
/// Anything that isn't an object yields an empty document.
pub fn document(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

/// A point-in-time read of one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: String,
    pub data: Document,
    /// Store-assigned write version; changes on every write to the document.
    pub version: u64,
}

impl Snapshot {
    /// Decode the document into a typed model. The document id is exposed
    /// to the model as an `id` field.
    pub fn decode<T: DeserializeOwned>(&self) -> BackendResult<T> {
        let mut data = self.data.clone();
        data.insert("id".to_string(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(data)).map_err(|e| {
            BackendError::Internal(format!("malformed document {}: {e}", self.id))
        })
    }

    /// Pagination cursor positioned at this document for the given order field.
    pub fn cursor(&self, order_by: &str) -> Cursor {
        Cursor {
            value: self.data.get(order_by).cloned().unwrap_or(Value::Null),
            id: self.id.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Position in an ordered result set: the order field's value plus the
/// document id, which breaks ties between equal values.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub value: Value,
    pub id: String,
}

/// An ordered, optionally limited query over one collection.
///
/// Documents without the `order_by` field are excluded from results.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub order_by: String,
    pub direction: Direction,
    pub limit: Option<usize>,
    /// Only return documents strictly after this position.
    pub start_after: Option<Cursor>,
}

impl Query {
    pub fn new(collection: impl Into<String>, order_by: impl Into<String>, direction: Direction) -> Self {
        Self {
            collection: collection.into(),
            order_by: order_by.into(),
            direction,
            limit: None,
            start_after: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, cursor: Cursor) -> Self {
        self.start_after = Some(cursor);
        self
    }
}

/// One delivery on a subscription: the full current result set, or the
/// error that terminated the listener.
pub type SubscriptionEvent = BackendResult<Vec<Snapshot>>;

/// A live query listener.
///
/// The store delivers the complete result set once on subscribe and again
/// after every change that affects it, never a diff. Dropping the
/// subscription unsubscribes; the store prunes closed listeners on its
/// next write.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<SubscriptionEvent>,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<SubscriptionEvent>) -> Self {
        Self { rx }
    }

    /// Wait for the next delivery. `None` once the store has dropped the listener.
    pub async fn next(&mut self) -> Option<SubscriptionEvent> {
        self.rx.recv().await
    }
}

/// A transaction read: commit fails with `Conflict` unless the document
/// is still at `version` (`None` = the document must still be absent).
#[derive(Debug, Clone, PartialEq)]
pub struct Precondition {
    pub collection: String,
    pub id: String,
    pub version: Option<u64>,
}

/// A buffered transaction write.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Partial merge; fails the whole commit with `NotFound` if the document is gone.
    Update {
        collection: String,
        id: String,
        fields: Document,
    },
    Delete {
        collection: String,
        id: String,
    },
}

/// The document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Current server time. Strictly increasing across calls on one store,
    /// so it doubles as a total order for `created_at` fields.
    fn server_timestamp(&self) -> DateTime<Utc>;

    /// Create a document with a store-assigned id and return the id.
    async fn create(&self, collection: &str, data: Document) -> BackendResult<String>;

    /// Create or overwrite the document at a caller-chosen id.
    async fn set(&self, collection: &str, id: &str, data: Document) -> BackendResult<()>;

    async fn read(&self, collection: &str, id: &str) -> BackendResult<Option<Snapshot>>;

    /// Merge `fields` into an existing document. `NotFound` if it doesn't exist.
    async fn update(&self, collection: &str, id: &str, fields: Document) -> BackendResult<()>;

    /// Delete a document. Deleting a missing document succeeds.
    async fn delete(&self, collection: &str, id: &str) -> BackendResult<()>;

    /// Atomically add `delta` to a numeric field (missing fields count as 0).
    async fn increment(&self, collection: &str, id: &str, field: &str, delta: i64)
        -> BackendResult<()>;

    /// One-shot ordered read.
    async fn query(&self, query: &Query) -> BackendResult<Vec<Snapshot>>;

    /// Live ordered read; see `Subscription`.
    async fn subscribe(&self, query: Query) -> BackendResult<Subscription>;

    /// Apply `writes` all-or-nothing, provided every precondition still holds.
    /// Use `Transaction` rather than calling this directly.
    async fn commit(&self, preconditions: Vec<Precondition>, writes: Vec<Write>)
        -> BackendResult<()>;
}

/// A read-then-write transaction over any `DocumentStore`.
///
/// Reads go straight to the store and record the version they saw; writes
/// are buffered and applied by `commit` only if none of the read documents
/// changed in the meantime.
pub struct Transaction<'a> {
    store: &'a dyn DocumentStore,
    reads: Vec<Precondition>,
    writes: Vec<Write>,
}

impl<'a> Transaction<'a> {
    pub fn begin(store: &'a dyn DocumentStore) -> Self {
        Self {
            store,
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    pub async fn get(&mut self, collection: &str, id: &str) -> BackendResult<Option<Snapshot>> {
        let snapshot = self.store.read(collection, id).await?;
        self.reads.push(Precondition {
            collection: collection.to_string(),
            id: id.to_string(),
            version: snapshot.as_ref().map(|s| s.version),
        });
        Ok(snapshot)
    }

    pub fn update(&mut self, collection: &str, id: &str, fields: Document) {
        self.writes.push(Write::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
        });
    }

    pub fn delete(&mut self, collection: &str, id: &str) {
        self.writes.push(Write::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        });
    }

    pub async fn commit(self) -> BackendResult<()> {
        self.store.commit(self.reads, self.writes).await
    }
}

/// Object storage for media.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` at `path`, returning the path to use for later deletion.
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> BackendResult<String>;

    /// A dereferenceable URL for a stored blob.
    async fn url(&self, path: &str) -> BackendResult<String>;

    async fn delete(&self, path: &str) -> BackendResult<()>;
}

/// Profile fields to change; `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileChanges {
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

/// The identity provider (accounts, sign-in state, credential changes).
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create an account and sign it in.
    async fn create_account(&self, email: &str, password: &str) -> BackendResult<Identity>;

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Identity>;

    async fn sign_out(&self) -> BackendResult<()>;

    async fn update_profile(&self, identity: &Identity, changes: ProfileChanges)
        -> BackendResult<Identity>;

    /// Reauthenticate with `current_password`, then change the account email.
    async fn change_email(
        &self,
        identity: &Identity,
        new_email: &str,
        current_password: &str,
    ) -> BackendResult<Identity>;

    /// Reauthenticate with `current_password`, then change the password.
    async fn change_password(
        &self,
        identity: &Identity,
        current_password: &str,
        new_password: &str,
    ) -> BackendResult<()>;

    /// Sign-in state changes. The receiver's initial value is the state at
    /// startup; a new value is published on every sign-in and sign-out.
    fn watch(&self) -> watch::Receiver<Option<Identity>>;
}
