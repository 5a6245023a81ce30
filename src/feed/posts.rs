// The post feed: a live window over the newest posts plus forward
// pagination past the end of the list.

use std::sync::Arc;

use tracing::debug;

use super::live::{ErrorHandler, LiveView};
use crate::error::Result;
use crate::gateway::Gateway;
use crate::models::Post;
use crate::mutation::LikeController;

pub const DEFAULT_PAGE_SIZE: usize = 10;

pub struct PostFeed {
    view: LiveView<Post>,
    gateway: Gateway,
    page_size: usize,
    likes: Option<Arc<LikeController>>,
}

impl PostFeed {
    /// Subscribe to the newest `page_size` posts.
    ///
    /// Each delivery replaces the list, which also moves the pagination
    /// cursor back to the end of the live window.
    pub async fn subscribe(
        gateway: &Gateway,
        page_size: usize,
        on_error: Option<ErrorHandler>,
    ) -> Result<Self> {
        let page_size = page_size.max(1);
        let subscription = gateway.subscribe_posts(page_size).await?;
        Ok(Self {
            view: LiveView::start(subscription, "posts", on_error),
            gateway: gateway.clone(),
            page_size,
            likes: None,
        })
    }

    /// Release like state for the listed posts when the feed is torn down.
    pub fn with_likes(mut self, likes: Arc<LikeController>) -> Self {
        self.likes = Some(likes);
        self
    }

    pub fn posts(&self) -> Vec<Post> {
        self.view.items()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Fetch the next page strictly after the last post in the list and
    /// append it. Returns the fetched page; empty when the list is empty or
    /// there are no older posts.
    pub async fn load_more(&self) -> Result<Vec<Post>> {
        let Some(cursor) = self.view.last().map(|p| p.cursor()) else {
            return Ok(Vec::new());
        };
        let page = self
            .gateway
            .list_posts_page(self.page_size, Some(cursor))
            .await?;
        debug!(fetched = page.len(), "Loaded more posts");
        self.view.append(page.clone());
        Ok(page)
    }

    pub fn view(&self) -> &LiveView<Post> {
        &self.view
    }

    pub fn is_loading(&self) -> bool {
        self.view.is_loading()
    }

    pub fn unsubscribe(&mut self) {
        self.view.unsubscribe();
        self.release_likes();
    }

    fn release_likes(&mut self) {
        let Some(likes) = self.likes.take() else {
            return;
        };
        for post in self.view.items() {
            likes.forget(&post.id);
        }
    }
}

impl Drop for PostFeed {
    fn drop(&mut self) {
        self.release_likes();
    }
}
