// Session state: the process-wide "who is signed in" slot.
//
// Cloned handles share one slot. Reads are synchronous; writes are
// last-write-wins. The slot is fed by the identity provider's change stream
// and overwritten explicitly after profile, email and password changes.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{FeedError, Result};
use crate::models::Identity;

#[derive(Clone)]
pub struct Session {
    slot: Arc<watch::Sender<Option<Identity>>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// An empty (signed-out) session.
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }

    pub fn current(&self) -> Option<Identity> {
        self.slot.borrow().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// The signed-in identity, or `AuthRequired`.
    pub fn require(&self) -> Result<Identity> {
        self.current().ok_or(FeedError::AuthRequired)
    }

    /// Overwrite the slot.
    pub fn set(&self, identity: Option<Identity>) {
        self.slot.send_replace(identity);
    }

    /// Observe slot changes.
    pub fn changes(&self) -> watch::Receiver<Option<Identity>> {
        self.slot.subscribe()
    }

    /// Mirror an identity provider's change stream into the slot.
    ///
    /// The stream's current value is applied before this returns, so the
    /// session is populated synchronously at startup. Later values are
    /// forwarded by the returned task until the stream closes.
    pub fn follow(&self, mut changes: watch::Receiver<Option<Identity>>) -> JoinHandle<()> {
        self.set(changes.borrow_and_update().clone());

        let session = self.clone();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let identity = changes.borrow_and_update().clone();
                debug!(
                    uid = identity.as_ref().map(|i| i.uid.as_str()).unwrap_or("-"),
                    "Identity changed"
                );
                session.set(identity);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(uid: &str) -> Identity {
        Identity {
            uid: uid.to_string(),
            email: format!("{uid}@example.com"),
            display_name: None,
            photo_url: None,
        }
    }

    #[test]
    fn test_require_without_identity_is_auth_required() {
        let session = Session::new();
        assert_eq!(session.require(), Err(FeedError::AuthRequired));
    }

    #[test]
    fn test_clones_share_the_slot() {
        let session = Session::new();
        let other = session.clone();
        session.set(Some(identity("u1")));
        assert_eq!(other.current().map(|i| i.uid), Some("u1".to_string()));
    }

    #[tokio::test]
    async fn test_follow_applies_initial_value_then_changes() {
        let (tx, rx) = watch::channel(Some(identity("u1")));
        let session = Session::new();
        let task = session.follow(rx);

        // Applied before `follow` returns
        assert!(session.is_signed_in());

        let mut observed = session.changes();
        tx.send_replace(None);
        observed.changed().await.unwrap();
        assert!(session.current().is_none());

        drop(tx);
        task.await.unwrap();
    }
}
