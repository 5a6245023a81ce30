// Likes: one existence record per (post, user) at posts/{post}/likes/{uid}.

use serde_json::json;
use tracing::{debug, warn};

use super::{likes_path, Gateway, POSTS};
use crate::backend::document;
use crate::error::Result;

impl Gateway {
    /// Whether `uid` currently likes the post. Read failures are logged
    /// and reported as "not liked".
    pub async fn has_liked(&self, post_id: &str, uid: &str) -> bool {
        match self.store.read(&likes_path(post_id), uid).await {
            Ok(like) => like.is_some(),
            Err(e) => {
                warn!(error = %e, post_id, uid, "Failed to read like state");
                false
            }
        }
    }

    /// Flip `uid`'s like on a post and return the resulting liked state.
    ///
    /// Adjusts `likes_count` best-effort. Adding a like notifies the post's
    /// author unless they liked their own post.
    pub async fn toggle_like(&self, post_id: &str, uid: &str, post_author_id: &str) -> Result<bool> {
        let collection = likes_path(post_id);

        if self.store.read(&collection, uid).await?.is_some() {
            self.store.delete(&collection, uid).await?;
            debug!(post_id, uid, "Removed like");
            self.adjust_counter(POSTS, post_id, "likes_count", -1).await;
            return Ok(false);
        }

        let like = document(json!({ "created_at": self.now_micros() }));
        self.store.set(&collection, uid, like).await?;
        debug!(post_id, uid, "Added like");
        self.adjust_counter(POSTS, post_id, "likes_count", 1).await;
        self.notify_like(post_author_id, post_id, uid).await;
        Ok(true)
    }
}
