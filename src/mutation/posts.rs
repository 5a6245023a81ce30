// Post create, update and delete flows. None of these are retried.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{FeedError, Result};
use crate::gateway::Gateway;
use crate::models::{Identity, MediaRef, MediaUpload, NewPost, Post, PostUpdate};

/// How long a post creation (upload + write + read-back) may take.
pub const DEFAULT_CREATE_TIMEOUT: Duration = Duration::from_secs(20);

/// Only a post's author may change or delete it.
pub fn require_author(post: &Post, identity: &Identity) -> Result<()> {
    if post.author_id != identity.uid {
        return Err(FeedError::Forbidden(format!(
            "post {} belongs to another user",
            post.id
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct PostActions {
    gateway: Gateway,
    create_timeout: Duration,
}

impl PostActions {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            create_timeout: DEFAULT_CREATE_TIMEOUT,
        }
    }

    pub fn with_create_timeout(mut self, timeout: Duration) -> Self {
        self.create_timeout = timeout;
        self
    }

    /// Publish a post, uploading its media first. Returns the new post id.
    pub async fn create(&self, new_post: NewPost) -> Result<String> {
        let author = self.gateway.session().require()?;
        if new_post.content.trim().is_empty() {
            return Err(FeedError::Validation("Post content can't be empty.".to_string()));
        }

        match tokio::time::timeout(self.create_timeout, self.publish(&author, new_post)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_secs = self.create_timeout.as_secs(), "Post creation timed out");
                Err(FeedError::Timeout(format!(
                    "post creation exceeded {}s",
                    self.create_timeout.as_secs()
                )))
            }
        }
    }

    async fn publish(&self, author: &Identity, new_post: NewPost) -> Result<String> {
        let media = match new_post.media {
            Some(upload) => Some(self.upload(upload).await?),
            None => None,
        };
        let media_path = media.as_ref().map(|m| m.path.clone());

        let id = match self.gateway.create_post(author, &new_post.content, media).await {
            Ok(id) => id,
            Err(e) => {
                if let Some(path) = media_path {
                    self.gateway.delete_media(&path).await;
                }
                return Err(e);
            }
        };

        match self.gateway.get_post(&id).await {
            Ok(Some(_)) => debug!(post_id = %id, "Read back new post"),
            Ok(None) => warn!(post_id = %id, "New post missing on read-back"),
            Err(e) => warn!(error = %e, post_id = %id, "Failed to read back new post"),
        }
        info!(post_id = %id, "Published post");
        Ok(id)
    }

    /// Edit a post's content and/or replace its media. Author only.
    ///
    /// A media swap uploads the new blob, then swaps the reference in a
    /// transaction, then deletes the old blob. If the transaction fails the
    /// new reference is written directly instead and the old blob is left
    /// in storage.
    pub async fn update(&self, post_id: &str, update: PostUpdate) -> Result<()> {
        let identity = self.gateway.session().require()?;
        if update.content.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(FeedError::Validation("Post content can't be empty.".to_string()));
        }

        let post = self
            .gateway
            .get_post(post_id)
            .await?
            .ok_or_else(|| FeedError::NotFound(format!("post {post_id}")))?;
        require_author(&post, &identity)?;

        let content = update.content.as_deref();
        let Some(upload) = update.new_media else {
            if content.is_none() {
                return Ok(());
            }
            self.gateway.update_post(post_id, content, None).await?;
            debug!(post_id, "Updated post content");
            return Ok(());
        };

        let media = self.upload(upload).await?;
        match self.gateway.swap_post_media(post_id, content, &media).await {
            Ok(old) => {
                if let Some(old) = old.filter(|old| old.path != media.path) {
                    self.gateway.delete_media(&old.path).await;
                }
                debug!(post_id, path = %media.path, "Swapped post media");
                Ok(())
            }
            Err(e) => {
                warn!(
                    error = %e,
                    post_id,
                    "Media swap transaction failed; writing reference directly, old media is not deleted"
                );
                if let Err(e) = self.gateway.update_post(post_id, content, Some(&media)).await {
                    self.gateway.delete_media(&media.path).await;
                    return Err(e);
                }
                Ok(())
            }
        }
    }

    /// Delete a post. Author only.
    ///
    /// Returns as soon as the author check passes; the delete itself runs
    /// in the background and its failure is only logged. Await the handle
    /// to wait for it.
    pub fn delete(&self, post: &Post) -> Result<JoinHandle<()>> {
        let identity = self.gateway.session().require()?;
        require_author(post, &identity)?;

        let gateway = self.gateway.clone();
        let post_id = post.id.clone();
        Ok(tokio::spawn(async move {
            match gateway.delete_post(&post_id).await {
                Ok(()) => info!(post_id = %post_id, "Deleted post"),
                Err(e) => warn!(error = %e, post_id = %post_id, "Background post delete failed"),
            }
        }))
    }

    async fn upload(&self, upload: MediaUpload) -> Result<MediaRef> {
        let path = self.gateway.post_media_path(&upload.file_name);
        self.gateway.upload_media(&path, upload.bytes).await
    }
}
