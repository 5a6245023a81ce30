// A materialized list kept fresh by a live subscription.
//
// A background task consumes the subscription. Every delivery replaces the
// list wholesale. An error stops the task, clears the loading flag and is
// handed to the error callback; nothing resubscribes automatically.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::Subscription;
use crate::error::FeedError;
use crate::gateway::decode_all;
use crate::sync::lock;

/// Called with the error that terminated a subscription.
pub type ErrorHandler = Arc<dyn Fn(FeedError) + Send + Sync>;

struct Shared<T> {
    items: Mutex<Vec<T>>,
    loading: AtomicBool,
    active: AtomicBool,
    /// Bumped on every change to the list or flags.
    revision: watch::Sender<u64>,
}

impl<T> Shared<T> {
    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }
}

pub struct LiveView<T> {
    shared: Arc<Shared<T>>,
    task: Option<JoinHandle<()>>,
}

impl<T> LiveView<T>
where
    T: DeserializeOwned + Clone + Send + 'static,
{
    /// Start consuming `subscription`. The view is loading until the first
    /// delivery (or error) arrives.
    pub fn start(mut subscription: Subscription, label: &'static str, on_error: Option<ErrorHandler>) -> Self {
        let (revision, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            items: Mutex::new(Vec::new()),
            loading: AtomicBool::new(true),
            active: AtomicBool::new(true),
            revision,
        });

        let state = shared.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                match event {
                    Ok(snapshots) => {
                        let items: Vec<T> = decode_all(&snapshots);
                        debug!(feed = label, items = items.len(), "Live delivery");
                        *lock(&state.items) = items;
                        state.loading.store(false, Ordering::SeqCst);
                        state.bump();
                    }
                    Err(e) => {
                        warn!(error = %e, feed = label, "Live subscription failed");
                        state.loading.store(false, Ordering::SeqCst);
                        state.active.store(false, Ordering::SeqCst);
                        if let Some(handler) = &on_error {
                            handler(FeedError::from(e));
                        }
                        state.bump();
                        return;
                    }
                }
            }
            debug!(feed = label, "Live subscription closed");
            state.active.store(false, Ordering::SeqCst);
            state.bump();
        });

        Self {
            shared,
            task: Some(task),
        }
    }

    /// A copy of the current list.
    pub fn items(&self) -> Vec<T> {
        lock(&self.shared.items).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.shared.items).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last(&self) -> Option<T> {
        lock(&self.shared.items).last().cloned()
    }

    /// True until the first delivery or an error.
    pub fn is_loading(&self) -> bool {
        self.shared.loading.load(Ordering::SeqCst)
    }

    /// Whether deliveries are still being applied.
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Append items fetched out of band (pagination).
    pub fn append(&self, more: Vec<T>) {
        if more.is_empty() {
            return;
        }
        lock(&self.shared.items).extend(more);
        self.shared.bump();
    }

    /// Watch for changes. The value is a revision counter.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    /// Wait until at least `revision` changes have been applied.
    pub async fn wait_for_revision(&self, revision: u64) {
        let mut rx = self.changes();
        // The sender lives in `shared`, which we hold, so this can't fail.
        let _ = rx.wait_for(|r| *r >= revision).await;
    }

    /// Stop applying deliveries. The list keeps its last contents.
    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.shared.active.store(false, Ordering::SeqCst);
            self.shared.loading.store(false, Ordering::SeqCst);
            debug!("Unsubscribed live view");
        }
    }
}

impl<T> Drop for LiveView<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
