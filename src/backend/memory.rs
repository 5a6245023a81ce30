// In-memory backend with all three collaborators in-process.
//
// Used by tests and demos. Every store can be switched "offline", which
// makes each call fail with `BackendError::Unavailable` the way a dropped
// connection would; the document store additionally terminates its live
// listeners with the same error.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::watch;

use super::accounts::{refresh_current, validate_email, validate_new_account, validate_password};
use super::clock::MonotonicClock;
use super::error::{BackendError, BackendResult};
use super::query;
use super::subscribers::SubscriberSet;
use super::traits::{
    BlobStore, Document, DocumentStore, IdentityProvider, Precondition, ProfileChanges, Query,
    Snapshot, Subscription, Write,
};
use crate::models::Identity;
use crate::sync::lock;

fn offline_error() -> BackendError {
    BackendError::Unavailable("network connection lost".to_string())
}

// ============================================================
// Document store
// ============================================================

#[derive(Default)]
struct StoreState {
    /// collection -> id -> (data, version)
    collections: HashMap<String, BTreeMap<String, (Document, u64)>>,
    subscribers: SubscriberSet,
    next_version: u64,
}

impl StoreState {
    fn bump_version(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn get(&self, collection: &str, id: &str) -> Option<Snapshot> {
        self.collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|(data, version)| Snapshot {
                id: id.to_string(),
                data: data.clone(),
                version: *version,
            })
    }

    fn put(&mut self, collection: &str, id: &str, data: Document) {
        let version = self.bump_version();
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), (data, version));
    }

    fn remove(&mut self, collection: &str, id: &str) -> bool {
        self.collections
            .get_mut(collection)
            .map(|docs| docs.remove(id).is_some())
            .unwrap_or(false)
    }

    fn evaluate(&self, query: &Query) -> Vec<Snapshot> {
        let documents = self
            .collections
            .get(&query.collection)
            .into_iter()
            .flat_map(|docs| docs.iter())
            .map(|(id, (data, version))| Snapshot {
                id: id.clone(),
                data: data.clone(),
                version: *version,
            });
        query::run(query, documents)
    }

    fn publish(&mut self, collection: &str) {
        // Split the borrow: listeners are evaluated against the documents.
        let mut subscribers = std::mem::take(&mut self.subscribers);
        subscribers.publish(collection, |q| Some(self.evaluate(q)));
        self.subscribers = subscribers;
    }
}

/// A document store held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    clock: MonotonicClock,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing (or regaining) connectivity. Going offline terminates
    /// every live listener with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
        if offline {
            lock(&self.state).subscribers.fail_all(offline_error());
        }
    }

    /// Number of live listeners still attached.
    pub fn listener_count(&self) -> usize {
        lock(&self.state).subscribers.len()
    }

    fn check_online(&self) -> BackendResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(offline_error());
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn server_timestamp(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn create(&self, collection: &str, data: Document) -> BackendResult<String> {
        self.check_online()?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        let mut state = lock(&self.state);
        state.put(collection, &id, data);
        state.publish(collection);
        Ok(id)
    }

    async fn set(&self, collection: &str, id: &str, data: Document) -> BackendResult<()> {
        self.check_online()?;
        let mut state = lock(&self.state);
        state.put(collection, id, data);
        state.publish(collection);
        Ok(())
    }

    async fn read(&self, collection: &str, id: &str) -> BackendResult<Option<Snapshot>> {
        self.check_online()?;
        Ok(lock(&self.state).get(collection, id))
    }

    async fn update(&self, collection: &str, id: &str, fields: Document) -> BackendResult<()> {
        self.check_online()?;
        let mut state = lock(&self.state);
        let Some(mut current) = state.get(collection, id) else {
            return Err(BackendError::NotFound(format!("{collection}/{id}")));
        };
        current.data.extend(fields);
        state.put(collection, id, current.data);
        state.publish(collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> BackendResult<()> {
        self.check_online()?;
        let mut state = lock(&self.state);
        if state.remove(collection, id) {
            state.publish(collection);
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
        self.check_online()?;
        let mut state = lock(&self.state);
        let Some(mut current) = state.get(collection, id) else {
            return Err(BackendError::NotFound(format!("{collection}/{id}")));
        };
        let value = current.data.get(field).and_then(Value::as_i64).unwrap_or(0);
        current
            .data
            .insert(field.to_string(), Value::from(value.saturating_add(delta)));
        state.put(collection, id, current.data);
        state.publish(collection);
        Ok(())
    }

    async fn query(&self, query: &Query) -> BackendResult<Vec<Snapshot>> {
        self.check_online()?;
        Ok(lock(&self.state).evaluate(query))
    }

    async fn subscribe(&self, query: Query) -> BackendResult<Subscription> {
        self.check_online()?;
        let mut state = lock(&self.state);
        let initial = state.evaluate(&query);
        Ok(state.subscribers.add(query, initial))
    }

    async fn commit(
        &self,
        preconditions: Vec<Precondition>,
        writes: Vec<Write>,
    ) -> BackendResult<()> {
        self.check_online()?;
        let mut state = lock(&self.state);

        for pre in &preconditions {
            let current = state.get(&pre.collection, &pre.id).map(|s| s.version);
            if current != pre.version {
                return Err(BackendError::Conflict(format!(
                    "{}/{} changed during transaction",
                    pre.collection, pre.id
                )));
            }
        }

        // Validate every write before applying any of them
        for write in &writes {
            if let Write::Update { collection, id, .. } = write {
                if state.get(collection, id).is_none() {
                    return Err(BackendError::NotFound(format!("{collection}/{id}")));
                }
            }
        }

        let mut touched = Vec::new();
        for write in writes {
            match write {
                Write::Update {
                    collection,
                    id,
                    fields,
                } => {
                    if let Some(mut current) = state.get(&collection, &id) {
                        current.data.extend(fields);
                        state.put(&collection, &id, current.data);
                    }
                    touched.push(collection);
                }
                Write::Delete { collection, id } => {
                    state.remove(&collection, &id);
                    touched.push(collection);
                }
            }
        }

        touched.sort();
        touched.dedup();
        for collection in touched {
            state.publish(&collection);
        }
        Ok(())
    }
}

// ============================================================
// Blob store
// ============================================================

/// A blob store held in memory. URLs use a `memory://` scheme.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    offline: AtomicBool,
    fail_deletes: AtomicBool,
    delete_calls: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make every `delete` fail while leaving uploads working.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// How many times `delete` has been called, successful or not.
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn contains(&self, path: &str) -> bool {
        lock(&self.blobs).contains_key(path)
    }

    pub fn len(&self) -> usize {
        lock(&self.blobs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> BackendResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(offline_error());
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> BackendResult<String> {
        self.check_online()?;
        lock(&self.blobs).insert(path.to_string(), bytes);
        Ok(path.to_string())
    }

    async fn url(&self, path: &str) -> BackendResult<String> {
        self.check_online()?;
        if !self.contains(path) {
            return Err(BackendError::NotFound(path.to_string()));
        }
        Ok(format!("memory://{path}"))
    }

    async fn delete(&self, path: &str) -> BackendResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(BackendError::Internal(format!("refused to delete {path}")));
        }
        match lock(&self.blobs).remove(path) {
            Some(_) => Ok(()),
            None => Err(BackendError::NotFound(path.to_string())),
        }
    }
}

// ============================================================
// Identity provider
// ============================================================

/// bcrypt cost for in-memory accounts. The minimum keeps tests fast; the
/// persistent provider uses bcrypt's default cost.
const MEMORY_BCRYPT_COST: u32 = 4;

struct Account {
    identity: Identity,
    password_hash: String,
}

/// An identity provider held in memory. Nothing survives the process.
pub struct MemoryIdentity {
    /// email -> account
    accounts: Mutex<HashMap<String, Account>>,
    current: watch::Sender<Option<Identity>>,
    offline: AtomicBool,
}

impl Default for MemoryIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIdentity {
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            accounts: Mutex::new(HashMap::new()),
            current,
            offline: AtomicBool::new(false),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> BackendResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(offline_error());
        }
        Ok(())
    }

    /// Look up an account by uid and check `password` against it.
    fn verify(&self, uid: &str, password: &str) -> BackendResult<String> {
        let accounts = lock(&self.accounts);
        let (email, account) = accounts
            .iter()
            .find(|(_, a)| a.identity.uid == uid)
            .ok_or_else(|| BackendError::NotFound(format!("account {uid}")))?;
        if !bcrypt::verify(password, &account.password_hash)? {
            return Err(BackendError::Credentials("reauthentication failed".to_string()));
        }
        Ok(email.clone())
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentity {
    async fn create_account(&self, email: &str, password: &str) -> BackendResult<Identity> {
        self.check_online()?;
        validate_new_account(email, password)?;
        let password_hash = bcrypt::hash(password, MEMORY_BCRYPT_COST)?;

        let identity = {
            let mut accounts = lock(&self.accounts);
            if accounts.contains_key(email) {
                return Err(BackendError::InvalidArgument(
                    "email already in use".to_string(),
                ));
            }
            let identity = Identity {
                uid: uuid::Uuid::new_v4().simple().to_string(),
                email: email.to_string(),
                display_name: None,
                photo_url: None,
            };
            accounts.insert(
                email.to_string(),
                Account {
                    identity: identity.clone(),
                    password_hash,
                },
            );
            identity
        };

        self.current.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<Identity> {
        self.check_online()?;
        let identity = {
            let accounts = lock(&self.accounts);
            let account = accounts
                .get(email)
                .ok_or_else(|| BackendError::Credentials("unknown email".to_string()))?;
            if !bcrypt::verify(password, &account.password_hash)? {
                return Err(BackendError::Credentials("wrong password".to_string()));
            }
            account.identity.clone()
        };
        self.current.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        self.current.send_replace(None);
        Ok(())
    }

    async fn update_profile(
        &self,
        identity: &Identity,
        changes: ProfileChanges,
    ) -> BackendResult<Identity> {
        self.check_online()?;
        let mut accounts = lock(&self.accounts);
        let account = accounts
            .values_mut()
            .find(|a| a.identity.uid == identity.uid)
            .ok_or_else(|| BackendError::NotFound(format!("account {}", identity.uid)))?;
        if let Some(name) = changes.display_name {
            account.identity.display_name = Some(name);
        }
        if let Some(url) = changes.photo_url {
            account.identity.photo_url = Some(url);
        }
        let updated = account.identity.clone();
        refresh_current(&self.current, &updated);
        Ok(updated)
    }

    async fn change_email(
        &self,
        identity: &Identity,
        new_email: &str,
        current_password: &str,
    ) -> BackendResult<Identity> {
        self.check_online()?;
        validate_email(new_email)?;
        let old_email = self.verify(&identity.uid, current_password)?;

        let mut accounts = lock(&self.accounts);
        if accounts.contains_key(new_email) {
            return Err(BackendError::InvalidArgument(
                "email already in use".to_string(),
            ));
        }
        let mut account = accounts
            .remove(&old_email)
            .ok_or_else(|| BackendError::NotFound(format!("account {}", identity.uid)))?;
        account.identity.email = new_email.to_string();
        let updated = account.identity.clone();
        accounts.insert(new_email.to_string(), account);
        refresh_current(&self.current, &updated);
        Ok(updated)
    }

    async fn change_password(
        &self,
        identity: &Identity,
        current_password: &str,
        new_password: &str,
    ) -> BackendResult<()> {
        self.check_online()?;
        validate_password(new_password)?;
        let email = self.verify(&identity.uid, current_password)?;
        let password_hash = bcrypt::hash(new_password, MEMORY_BCRYPT_COST)?;
        if let Some(account) = lock(&self.accounts).get_mut(&email) {
            account.password_hash = password_hash;
        }
        Ok(())
    }

    fn watch(&self) -> watch::Receiver<Option<Identity>> {
        self.current.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::traits::{document, Direction, Transaction};
    use serde_json::json;

    fn post(created_at: i64) -> Document {
        document(json!({ "content": "hello", "created_at": created_at, "likes_count": 0 }))
    }

    #[tokio::test]
    async fn test_create_read_update_delete() {
        let store = MemoryStore::new();
        let id = store.create("posts", post(1)).await.unwrap();

        let snap = store.read("posts", &id).await.unwrap().unwrap();
        assert_eq!(snap.data["content"], json!("hello"));

        store
            .update("posts", &id, document(json!({ "content": "edited" })))
            .await
            .unwrap();
        let snap = store.read("posts", &id).await.unwrap().unwrap();
        assert_eq!(snap.data["content"], json!("edited"));
        // Partial merge keeps other fields
        assert_eq!(snap.data["created_at"], json!(1));

        store.delete("posts", &id).await.unwrap();
        assert!(store.read("posts", &id).await.unwrap().is_none());
        // Deleting again is fine
        store.delete("posts", &id).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_missing_document_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update("posts", "nope", document(json!({ "content": "x" })))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_increment_treats_missing_field_as_zero() {
        let store = MemoryStore::new();
        store.set("posts", "p", document(json!({}))).await.unwrap();
        store.increment("posts", "p", "likes_count", 2).await.unwrap();
        store.increment("posts", "p", "likes_count", -1).await.unwrap();
        let snap = store.read("posts", "p").await.unwrap().unwrap();
        assert_eq!(snap.data["likes_count"], json!(1));
    }

    #[tokio::test]
    async fn test_transaction_conflict_applies_nothing() {
        let store = MemoryStore::new();
        store.set("posts", "p", post(1)).await.unwrap();

        let mut tx = Transaction::begin(&store);
        tx.get("posts", "p").await.unwrap();
        tx.update("posts", "p", document(json!({ "content": "from tx" })));

        // Concurrent write invalidates the read
        store
            .update("posts", "p", document(json!({ "content": "concurrent" })))
            .await
            .unwrap();

        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, BackendError::Conflict(_)));
        let snap = store.read("posts", "p").await.unwrap().unwrap();
        assert_eq!(snap.data["content"], json!("concurrent"));
    }

    #[tokio::test]
    async fn test_transaction_update_of_missing_doc_aborts_all_writes() {
        let store = MemoryStore::new();
        store.set("posts", "a", post(1)).await.unwrap();

        let mut tx = Transaction::begin(&store);
        tx.delete("posts", "a");
        tx.update("posts", "missing", document(json!({ "content": "x" })));
        let err = tx.commit().await.unwrap_err();

        assert!(matches!(err, BackendError::NotFound(_)));
        assert!(store.read("posts", "a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_subscription_redelivers_full_window() {
        let store = MemoryStore::new();
        store.set("posts", "a", post(1)).await.unwrap();

        let query = Query::new("posts", "created_at", Direction::Descending).limit(2);
        let mut sub = store.subscribe(query).await.unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap().len(), 1);

        store.set("posts", "b", post(2)).await.unwrap();
        let window = sub.next().await.unwrap().unwrap();
        let ids: Vec<_> = window.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_offline_fails_calls_and_listeners() {
        let store = MemoryStore::new();
        let query = Query::new("posts", "created_at", Direction::Descending);
        let mut sub = store.subscribe(query).await.unwrap();
        let _ = sub.next().await;

        store.set_offline(true);
        assert!(matches!(sub.next().await, Some(Err(BackendError::Unavailable(_)))));
        assert!(matches!(
            store.read("posts", "a").await,
            Err(BackendError::Unavailable(_))
        ));
        assert_eq!(store.listener_count(), 0);

        store.set_offline(false);
        assert!(store.read("posts", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_blob_store_roundtrip_and_failures() {
        let blobs = MemoryBlobStore::new();
        let path = blobs.upload("posts/1_a.png", vec![1, 2, 3]).await.unwrap();
        assert_eq!(blobs.url(&path).await.unwrap(), "memory://posts/1_a.png");

        blobs.set_fail_deletes(true);
        assert!(blobs.delete(&path).await.is_err());
        assert!(blobs.contains(&path));

        blobs.set_fail_deletes(false);
        blobs.delete(&path).await.unwrap();
        assert!(blobs.is_empty());
        assert_eq!(blobs.delete_calls(), 2);
    }

    #[tokio::test]
    async fn test_identity_sign_in_flow_publishes_changes() {
        let provider = MemoryIdentity::new();
        let mut rx = provider.watch();
        assert!(rx.borrow().is_none());

        let created = provider.create_account("ana@example.com", "secret1").await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_ref(), Some(&created));

        provider.sign_out().await.unwrap();
        assert!(rx.borrow_and_update().is_none());

        let err = provider.sign_in("ana@example.com", "wrong!!").await.unwrap_err();
        assert!(matches!(err, BackendError::Credentials(_)));

        let signed_in = provider.sign_in("ana@example.com", "secret1").await.unwrap();
        assert_eq!(signed_in.uid, created.uid);
    }

    #[tokio::test]
    async fn test_profile_change_republishes_signed_in_identity() {
        let provider = MemoryIdentity::new();
        let created = provider.create_account("ana@example.com", "secret1").await.unwrap();
        let mut rx = provider.watch();
        let _ = rx.borrow_and_update();

        let changes = ProfileChanges {
            display_name: Some("Ana".to_string()),
            photo_url: None,
        };
        let updated = provider.update_profile(&created, changes).await.unwrap();

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_ref(), Some(&updated));
    }

    #[tokio::test]
    async fn test_identity_rejects_weak_password_and_duplicates() {
        let provider = MemoryIdentity::new();
        assert!(matches!(
            provider.create_account("a@b.c", "12345").await,
            Err(BackendError::InvalidArgument(_))
        ));
        provider.create_account("a@b.c", "123456").await.unwrap();
        assert!(matches!(
            provider.create_account("a@b.c", "123456").await,
            Err(BackendError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_change_email_requires_current_password() {
        let provider = MemoryIdentity::new();
        let me = provider.create_account("old@example.com", "secret1").await.unwrap();

        let err = provider
            .change_email(&me, "new@example.com", "bad-password")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Credentials(_)));

        let updated = provider
            .change_email(&me, "new@example.com", "secret1")
            .await
            .unwrap();
        assert_eq!(updated.email, "new@example.com");
        provider.sign_in("new@example.com", "secret1").await.unwrap();
        assert!(provider.sign_in("old@example.com", "secret1").await.is_err());
    }
}
