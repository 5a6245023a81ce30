// Live comments under one post, oldest first.

use super::live::{ErrorHandler, LiveView};
use crate::error::Result;
use crate::gateway::Gateway;
use crate::models::Comment;

pub struct CommentFeed {
    view: LiveView<Comment>,
    post_id: String,
}

impl CommentFeed {
    pub async fn subscribe(
        gateway: &Gateway,
        post_id: &str,
        on_error: Option<ErrorHandler>,
    ) -> Result<Self> {
        let subscription = gateway.subscribe_comments(post_id).await?;
        Ok(Self {
            view: LiveView::start(subscription, "comments", on_error),
            post_id: post_id.to_string(),
        })
    }

    pub fn post_id(&self) -> &str {
        &self.post_id
    }

    pub fn comments(&self) -> Vec<Comment> {
        self.view.items()
    }

    pub fn view(&self) -> &LiveView<Comment> {
        &self.view
    }

    pub fn unsubscribe(&mut self) {
        self.view.unsubscribe();
    }
}
