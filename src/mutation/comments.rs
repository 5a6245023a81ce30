// Comment add/remove with authorization.

use tracing::debug;

use crate::error::{FeedError, Result};
use crate::gateway::Gateway;

#[derive(Clone)]
pub struct CommentActions {
    gateway: Gateway,
}

impl CommentActions {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    pub async fn add(&self, post_id: &str, text: &str) -> Result<String> {
        let author = self.gateway.session().require()?;
        if text.trim().is_empty() {
            return Err(FeedError::Validation("Comment can't be empty.".to_string()));
        }
        self.gateway.add_comment(post_id, &author, text).await
    }

    /// Remove a comment. Allowed for the comment's author and the post's
    /// author. A comment that is already gone is a no-op.
    pub async fn remove(&self, post_id: &str, comment_id: &str) -> Result<()> {
        let identity = self.gateway.session().require()?;

        let Some(comment) = self.gateway.get_comment(post_id, comment_id).await? else {
            debug!(post_id, comment_id, "Comment already removed");
            return Ok(());
        };
        let post_author = self.gateway.get_post(post_id).await?.map(|p| p.author_id);

        let allowed = comment.author_id == identity.uid
            || post_author.as_deref() == Some(identity.uid.as_str());
        if !allowed {
            return Err(FeedError::Forbidden(format!(
                "comment {comment_id} belongs to another user"
            )));
        }

        self.gateway.delete_comment(post_id, comment_id).await
    }
}
