// Remote data gateway: typed operations over the backend collaborators.
//
// The gateway owns no state of its own beyond the collaborator handles and
// the shared session, which it overwrites after account mutations. All
// document paths are built here:
//
//   posts/{post_id}
//   posts/{post_id}/comments/{comment_id}
//   posts/{post_id}/likes/{uid}
//   users/{uid}
//   users/{uid}/notifications/{notification_id}
//
// Counter adjustments, notification writes and blob deletions are
// best-effort: their failures are logged and never reach the caller.

pub mod account;
pub mod comments;
pub mod likes;
pub mod media;
pub mod notifications;
pub mod posts;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::backend::{
    BackendResult, BlobStore, Document, DocumentStore, IdentityProvider, Snapshot, Transaction,
};
use crate::session::Session;

pub const POSTS: &str = "posts";
pub const USERS: &str = "users";

pub fn comments_path(post_id: &str) -> String {
    format!("{POSTS}/{post_id}/comments")
}

pub fn likes_path(post_id: &str) -> String {
    format!("{POSTS}/{post_id}/likes")
}

pub fn notifications_path(uid: &str) -> String {
    format!("{USERS}/{uid}/notifications")
}

/// Typed access to the identity provider, document store and blob store.
///
/// Cheap to clone; clones share the collaborators and the session.
#[derive(Clone)]
pub struct Gateway {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    identity: Arc<dyn IdentityProvider>,
    session: Session,
}

impl Gateway {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        identity: Arc<dyn IdentityProvider>,
        session: Session,
    ) -> Self {
        Self {
            store,
            blobs,
            identity,
            session,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    /// Server time for `created_at` / `updated_at` fields.
    pub fn now(&self) -> DateTime<Utc> {
        self.store.server_timestamp()
    }

    fn now_micros(&self) -> i64 {
        self.now().timestamp_micros()
    }

    /// Best-effort counter adjustment on a parent document.
    ///
    /// Increments are a single atomic write. Decrements read the current
    /// value inside a transaction so the stored counter never drops below 0.
    async fn adjust_counter(&self, collection: &str, id: &str, field: &str, delta: i64) {
        let result = if delta >= 0 {
            self.store.increment(collection, id, field, delta).await
        } else {
            self.clamped_decrement(collection, id, field, delta).await
        };
        if let Err(e) = result {
            warn!(error = %e, collection, id, field, delta, "Failed to adjust counter");
        }
    }

    async fn clamped_decrement(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> BackendResult<()> {
        let mut tx = Transaction::begin(self.store.as_ref());
        let Some(current) = tx.get(collection, id).await? else {
            // Parent already gone; nothing to adjust
            return Ok(());
        };
        let value = current.data.get(field).and_then(Value::as_i64).unwrap_or(0);
        let next = value.saturating_add(delta).max(0);
        let mut fields = Document::new();
        fields.insert(field.to_string(), Value::from(next));
        tx.update(collection, id, fields);
        tx.commit().await
    }
}

/// Decode a result set, skipping (and logging) documents that don't match
/// the model rather than failing the whole delivery.
pub fn decode_all<T: DeserializeOwned>(snapshots: &[Snapshot]) -> Vec<T> {
    snapshots
        .iter()
        .filter_map(|snap| match snap.decode() {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(error = %e, id = %snap.id, "Skipping malformed document");
                None
            }
        })
        .collect()
}
