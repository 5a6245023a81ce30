// Live query listeners for the in-process stores.
//
// Each listener remembers the last result set it was sent. After a write the
// owning store re-evaluates every listener on the written collection and
// re-delivers the whole result set, but only when it actually changed.

use tokio::sync::mpsc;

use super::error::BackendError;
use super::traits::{Query, Snapshot, Subscription, SubscriptionEvent};

struct Listener {
    query: Query,
    tx: mpsc::UnboundedSender<SubscriptionEvent>,
    last: Option<Vec<Snapshot>>,
}

#[derive(Default)]
pub struct SubscriberSet {
    listeners: Vec<Listener>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener and deliver its initial result set.
    pub fn add(&mut self, query: Query, initial: Vec<Snapshot>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(initial.clone()));
        self.listeners.push(Listener {
            query,
            tx,
            last: Some(initial),
        });
        Subscription::new(rx)
    }

    /// Re-evaluate listeners on `collection` after a write. `evaluate`
    /// returns `None` when a result set can't be computed; that listener is
    /// skipped this round rather than sent a bogus empty window.
    pub fn publish(
        &mut self,
        collection: &str,
        mut evaluate: impl FnMut(&Query) -> Option<Vec<Snapshot>>,
    ) {
        self.listeners.retain(|l| !l.tx.is_closed());

        for listener in self
            .listeners
            .iter_mut()
            .filter(|l| l.query.collection == collection)
        {
            let Some(results) = evaluate(&listener.query) else {
                continue;
            };
            if listener.last.as_ref() == Some(&results) {
                continue;
            }
            let _ = listener.tx.send(Ok(results.clone()));
            listener.last = Some(results);
        }
    }

    /// Terminate every listener with `err`. Listeners don't survive an
    /// error; consumers must subscribe again.
    pub fn fail_all(&mut self, err: BackendError) {
        for listener in self.listeners.drain(..) {
            let _ = listener.tx.send(Err(err.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.iter().filter(|l| !l.tx.is_closed()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::traits::{document, Direction};
    use serde_json::json;

    fn snap(id: &str) -> Snapshot {
        Snapshot {
            id: id.to_string(),
            data: document(json!({ "created_at": 1 })),
            version: 1,
        }
    }

    #[tokio::test]
    async fn test_initial_delivery_then_changes_only() {
        let mut set = SubscriberSet::new();
        let query = Query::new("posts", "created_at", Direction::Descending);
        let mut sub = set.add(query, vec![snap("a")]);

        assert_eq!(sub.next().await, Some(Ok(vec![snap("a")])));

        // Same result: no redelivery
        set.publish("posts", |_| Some(vec![snap("a")]));
        // Other collection: not evaluated
        set.publish("users", |_| panic!("should not evaluate"));
        // Changed result: redelivered in full
        set.publish("posts", |_| Some(vec![snap("a"), snap("b")]));

        assert_eq!(sub.next().await, Some(Ok(vec![snap("a"), snap("b")])));
    }

    #[tokio::test]
    async fn test_fail_all_terminates_listeners() {
        let mut set = SubscriberSet::new();
        let query = Query::new("posts", "created_at", Direction::Descending);
        let mut sub = set.add(query, vec![]);
        let _ = sub.next().await;

        set.fail_all(BackendError::Unavailable("offline".to_string()));

        assert_eq!(
            sub.next().await,
            Some(Err(BackendError::Unavailable("offline".to_string())))
        );
        assert_eq!(sub.next().await, None);
        assert!(set.is_empty());
    }

    #[test]
    fn test_dropped_subscriptions_are_pruned() {
        let mut set = SubscriberSet::new();
        let query = Query::new("posts", "created_at", Direction::Descending);
        let sub = set.add(query, vec![]);
        assert_eq!(set.len(), 1);
        drop(sub);
        set.publish("posts", |_| Some(vec![]));
        assert!(set.is_empty());
    }
}
