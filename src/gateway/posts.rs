// Post records: create, read, update, delete, pagination and live windows.

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{decode_all, Gateway, POSTS};
use crate::backend::{document, Cursor, Direction, Document, Query, Subscription, Transaction};
use crate::error::{FeedError, Result};
use crate::models::{Identity, MediaRef, Post, CREATED_AT};

/// Newest-first query over all posts.
pub fn newest_posts(limit: usize) -> Query {
    Query::new(POSTS, CREATED_AT, Direction::Descending).limit(limit)
}

impl Gateway {
    /// Create a post with zeroed counters and return its id.
    pub async fn create_post(
        &self,
        author: &Identity,
        content: &str,
        media: Option<MediaRef>,
    ) -> Result<String> {
        let content = content.trim();
        if content.is_empty() {
            return Err(FeedError::Validation("Post content can't be empty.".to_string()));
        }

        let mut data = document(json!({
            "author_id": author.uid,
            "author_name": author.display_label(),
            "content": content,
            "created_at": self.now_micros(),
            "likes_count": 0,
            "comments_count": 0,
        }));
        if let Some(media) = media {
            data.insert("media".to_string(), media_value(&media));
        }

        let id = self.store.create(POSTS, data).await?;
        debug!(post_id = %id, author = %author.uid, "Created post");
        Ok(id)
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Option<Post>> {
        let snapshot = self.store.read(POSTS, post_id).await?;
        Ok(snapshot.map(|s| s.decode::<Post>()).transpose()?)
    }

    /// Direct partial update. `media` replaces the media reference when set.
    pub async fn update_post(
        &self,
        post_id: &str,
        content: Option<&str>,
        media: Option<&MediaRef>,
    ) -> Result<()> {
        let fields = self.post_changes(content, media)?;
        self.store.update(POSTS, post_id, fields).await?;
        Ok(())
    }

    /// Swap a post's media reference (and optionally its content) in a
    /// transaction. Returns the media reference that was replaced.
    pub async fn swap_post_media(
        &self,
        post_id: &str,
        content: Option<&str>,
        new_media: &MediaRef,
    ) -> Result<Option<MediaRef>> {
        let fields = self.post_changes(content, Some(new_media))?;

        let mut tx = Transaction::begin(self.store());
        let Some(current) = tx.get(POSTS, post_id).await? else {
            return Err(FeedError::NotFound(format!("post {post_id}")));
        };
        let post: Post = current.decode()?;
        tx.update(POSTS, post_id, fields);
        tx.commit().await?;

        Ok(post.media)
    }

    /// Delete a post and its media.
    ///
    /// The record is read and deleted in a transaction, deleting the blob it
    /// references along the way. If the transaction fails the post is
    /// deleted unconditionally instead; the blob is only looked up and
    /// deleted on that path when the transaction never got to it, so a
    /// post's blob sees exactly one delete attempt.
    pub async fn delete_post(&self, post_id: &str) -> Result<()> {
        let mut blob_attempted = false;
        match self.delete_post_transaction(post_id, &mut blob_attempted).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(error = %e, post_id, "Transactional post delete failed, deleting directly")
            }
        }

        if !blob_attempted {
            match self.get_post(post_id).await {
                Ok(Some(post)) => {
                    if let Some(path) = post.media_path() {
                        self.delete_media(path).await;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, post_id, "Could not look up media of deleted post"),
            }
        }

        self.store.delete(POSTS, post_id).await?;
        Ok(())
    }

    async fn delete_post_transaction(&self, post_id: &str, blob_attempted: &mut bool) -> Result<()> {
        let mut tx = Transaction::begin(self.store());
        let Some(current) = tx.get(POSTS, post_id).await? else {
            debug!(post_id, "Post already deleted");
            return Ok(());
        };
        let post: Post = current.decode()?;
        if let Some(path) = post.media_path() {
            *blob_attempted = true;
            self.delete_media(path).await;
        }
        tx.delete(POSTS, post_id);
        tx.commit().await?;
        debug!(post_id, "Deleted post");
        Ok(())
    }

    /// One page of posts, newest first, strictly after `after` when given.
    pub async fn list_posts_page(&self, limit: usize, after: Option<Cursor>) -> Result<Vec<Post>> {
        let mut query = newest_posts(limit);
        if let Some(cursor) = after {
            query = query.start_after(cursor);
        }
        let snapshots = self.store.query(&query).await?;
        Ok(decode_all(&snapshots))
    }

    /// Live window over the newest `limit` posts.
    pub async fn subscribe_posts(&self, limit: usize) -> Result<Subscription> {
        Ok(self.store.subscribe(newest_posts(limit)).await?)
    }

    fn post_changes(&self, content: Option<&str>, media: Option<&MediaRef>) -> Result<Document> {
        let mut fields = Document::new();
        if let Some(content) = content {
            let content = content.trim();
            if content.is_empty() {
                return Err(FeedError::Validation("Post content can't be empty.".to_string()));
            }
            fields.insert("content".to_string(), Value::from(content));
        }
        if let Some(media) = media {
            fields.insert("media".to_string(), media_value(media));
        }
        fields.insert("updated_at".to_string(), Value::from(self.now_micros()));
        Ok(fields)
    }
}

fn media_value(media: &MediaRef) -> Value {
    json!({ "url": media.url, "path": media.path })
}
