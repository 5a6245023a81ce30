// Live inbox for one recipient, newest first.

use super::live::{ErrorHandler, LiveView};
use crate::error::Result;
use crate::gateway::Gateway;
use crate::models::Notification;

pub struct NotificationFeed {
    view: LiveView<Notification>,
}

impl NotificationFeed {
    pub async fn subscribe(gateway: &Gateway, uid: &str, on_error: Option<ErrorHandler>) -> Result<Self> {
        let subscription = gateway.subscribe_notifications(uid).await?;
        Ok(Self {
            view: LiveView::start(subscription, "notifications", on_error),
        })
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.view.items()
    }

    pub fn unread_count(&self) -> usize {
        self.view.items().iter().filter(|n| !n.read).count()
    }

    pub fn view(&self) -> &LiveView<Notification> {
        &self.view
    }

    pub fn unsubscribe(&mut self) {
        self.view.unsubscribe();
    }
}
