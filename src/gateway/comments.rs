// Comments under a post, oldest first. Each add and remove adjusts the
// post's `comments_count` best-effort.

use serde_json::json;
use tracing::debug;

use super::{comments_path, decode_all, Gateway, POSTS};
use crate::backend::{document, Direction, Query, Subscription};
use crate::error::{FeedError, Result};
use crate::models::{Comment, Identity, CREATED_AT};

pub fn post_comments(post_id: &str) -> Query {
    Query::new(comments_path(post_id), CREATED_AT, Direction::Ascending)
}

impl Gateway {
    pub async fn add_comment(&self, post_id: &str, author: &Identity, text: &str) -> Result<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(FeedError::Validation("Comment can't be empty.".to_string()));
        }

        let data = document(json!({
            "post_id": post_id,
            "author_id": author.uid,
            "author_name": author.display_label(),
            "text": text,
            "created_at": self.now_micros(),
        }));
        let id = self.store.create(&comments_path(post_id), data).await?;
        debug!(post_id, comment_id = %id, "Added comment");

        self.adjust_counter(POSTS, post_id, "comments_count", 1).await;
        Ok(id)
    }

    pub async fn get_comment(&self, post_id: &str, comment_id: &str) -> Result<Option<Comment>> {
        let snapshot = self.store.read(&comments_path(post_id), comment_id).await?;
        Ok(snapshot.map(|s| s.decode::<Comment>()).transpose()?)
    }

    /// Remove a comment. Removing one that is already gone is a no-op and
    /// leaves the counter alone.
    pub async fn delete_comment(&self, post_id: &str, comment_id: &str) -> Result<()> {
        let collection = comments_path(post_id);
        if self.store.read(&collection, comment_id).await?.is_none() {
            debug!(post_id, comment_id, "Comment already deleted");
            return Ok(());
        }
        self.store.delete(&collection, comment_id).await?;
        debug!(post_id, comment_id, "Deleted comment");

        self.adjust_counter(POSTS, post_id, "comments_count", -1).await;
        Ok(())
    }

    pub async fn list_comments(&self, post_id: &str) -> Result<Vec<Comment>> {
        let snapshots = self.store.query(&post_comments(post_id)).await?;
        Ok(decode_all(&snapshots))
    }

    pub async fn subscribe_comments(&self, post_id: &str) -> Result<Subscription> {
        Ok(self.store.subscribe(post_comments(post_id)).await?)
    }
}
