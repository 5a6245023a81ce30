// Notifications in a recipient's inbox, newest first.
//
// Bulk operations fan out one write per notification concurrently
// (futures::join_all). Individual failures are logged; the caller gets
// the number of notifications actually changed.

use futures::future::join_all;
use serde_json::json;
use tracing::{debug, warn};

use super::{decode_all, notifications_path, Gateway};
use crate::backend::{document, Direction, Query, Subscription};
use crate::error::Result;
use crate::models::{Notification, NotificationKind, CREATED_AT};

pub fn inbox(uid: &str) -> Query {
    Query::new(notifications_path(uid), CREATED_AT, Direction::Descending)
}

impl Gateway {
    /// Tell `recipient` that `from` liked their post. Best-effort, and
    /// skipped when users like their own posts.
    pub async fn notify_like(&self, recipient: &str, post_id: &str, from: &str) {
        if recipient == from {
            return;
        }
        let data = document(json!({
            "type": NotificationKind::Like,
            "post_id": post_id,
            "from": from,
            "created_at": self.now_micros(),
            "read": false,
        }));
        match self.store.create(&notifications_path(recipient), data).await {
            Ok(id) => debug!(recipient, post_id, notification_id = %id, "Sent like notification"),
            Err(e) => warn!(error = %e, recipient, post_id, "Failed to send like notification"),
        }
    }

    pub async fn list_notifications(&self, uid: &str) -> Result<Vec<Notification>> {
        let snapshots = self.store.query(&inbox(uid)).await?;
        Ok(decode_all(&snapshots))
    }

    pub async fn subscribe_notifications(&self, uid: &str) -> Result<Subscription> {
        Ok(self.store.subscribe(inbox(uid)).await?)
    }

    pub async fn mark_notification_read(&self, uid: &str, notification_id: &str) -> Result<()> {
        self.store
            .update(
                &notifications_path(uid),
                notification_id,
                document(json!({ "read": true })),
            )
            .await?;
        Ok(())
    }

    /// Mark every unread notification read. Returns how many were marked.
    pub async fn mark_all_notifications_read(&self, uid: &str) -> Result<usize> {
        let unread: Vec<Notification> = self
            .list_notifications(uid)
            .await?
            .into_iter()
            .filter(|n| !n.read)
            .collect();

        let results = join_all(
            unread
                .iter()
                .map(|n| self.mark_notification_read(uid, &n.id)),
        )
        .await;
        Ok(count_successes(uid, "mark read", results))
    }

    pub async fn delete_notification(&self, uid: &str, notification_id: &str) -> Result<()> {
        self.store
            .delete(&notifications_path(uid), notification_id)
            .await?;
        Ok(())
    }

    /// Clear the inbox. Returns how many notifications were deleted.
    pub async fn delete_all_notifications(&self, uid: &str) -> Result<usize> {
        let all = self.list_notifications(uid).await?;
        let results = join_all(all.iter().map(|n| self.delete_notification(uid, &n.id))).await;
        Ok(count_successes(uid, "delete", results))
    }
}

fn count_successes(uid: &str, action: &str, results: Vec<Result<()>>) -> usize {
    let total = results.len();
    let failed = results
        .into_iter()
        .filter_map(|r| r.err())
        .inspect(|e| warn!(error = %e, uid, action, "Bulk notification operation failed"))
        .count();
    total - failed
}
