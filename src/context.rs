// Application context: builds the shared session and hands it, together
// with the gateway, to every component.
//
// There is no global session. Whoever owns the `AppContext` owns the
// identity-stream forwarder; dropping the context stops it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;

use crate::backend::fs_blob::FsBlobStore;
use crate::backend::memory::{MemoryBlobStore, MemoryIdentity, MemoryStore};
use crate::backend::sqlite::{SqliteIdentity, SqliteStore};
use crate::backend::{BlobStore, DocumentStore, IdentityProvider};
use crate::config::Config;
use crate::error::Result as FeedResult;
use crate::feed::{CommentFeed, ErrorHandler, NotificationFeed, PostFeed, DEFAULT_PAGE_SIZE};
use crate::gateway::Gateway;
use crate::models::Identity;
use crate::mutation::{CommentActions, LikeController, PostActions, DEFAULT_CREATE_TIMEOUT};
use crate::session::Session;

/// The three collaborators a context runs against.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub identity: Arc<dyn IdentityProvider>,
}

impl Backends {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            store,
            blobs,
            identity,
        }
    }

    /// Fresh in-process collaborators. Nothing outlives the process.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(MemoryIdentity::new()),
        )
    }

    /// SQLite documents and accounts plus filesystem blobs, per `config`.
    pub fn local(config: &Config) -> Result<Self> {
        let store = SqliteStore::open(&config.db_path)
            .with_context(|| format!("Failed to open document store at {}", config.db_path))?;
        let identity = SqliteIdentity::open(&config.db_path)
            .with_context(|| format!("Failed to open account store at {}", config.db_path))?;
        let blobs = FsBlobStore::new(&config.blob_dir).with_context(|| {
            format!("Failed to set up blob directory {}", config.blob_dir.display())
        })?;
        Ok(Self::new(Arc::new(store), Arc::new(blobs), Arc::new(identity)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextOptions {
    pub page_size: usize,
    pub create_timeout: Duration,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            create_timeout: DEFAULT_CREATE_TIMEOUT,
        }
    }
}

pub struct AppContext {
    pub session: Session,
    pub gateway: Gateway,
    pub likes: Arc<LikeController>,
    pub posts: PostActions,
    pub comments: CommentActions,
    page_size: usize,
    identity_task: JoinHandle<()>,
}

impl AppContext {
    /// Wire up every component. Must run inside a tokio runtime.
    ///
    /// The identity provider's current state is in the session by the time
    /// this returns.
    pub fn new(backends: Backends, options: ContextOptions) -> Self {
        let session = Session::new();
        let identity_task = session.follow(backends.identity.watch());

        let gateway = Gateway::new(
            backends.store,
            backends.blobs,
            backends.identity,
            session.clone(),
        );
        let likes = Arc::new(LikeController::new(
            Arc::new(gateway.clone()),
            session.clone(),
        ));
        let posts = PostActions::new(gateway.clone()).with_create_timeout(options.create_timeout);
        let comments = CommentActions::new(gateway.clone());

        Self {
            session,
            gateway,
            likes,
            posts,
            comments,
            page_size: options.page_size,
            identity_task,
        }
    }

    pub async fn post_feed(&self, on_error: Option<ErrorHandler>) -> FeedResult<PostFeed> {
        Ok(PostFeed::subscribe(&self.gateway, self.page_size, on_error)
            .await?
            .with_likes(self.likes.clone()))
    }

    pub async fn comment_feed(
        &self,
        post_id: &str,
        on_error: Option<ErrorHandler>,
    ) -> FeedResult<CommentFeed> {
        CommentFeed::subscribe(&self.gateway, post_id, on_error).await
    }

    /// The signed-in user's inbox.
    pub async fn notification_feed(
        &self,
        on_error: Option<ErrorHandler>,
    ) -> FeedResult<NotificationFeed> {
        let identity = self.session.require()?;
        NotificationFeed::subscribe(&self.gateway, &identity.uid, on_error).await
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// The signed-in user, or `AuthRequired`.
    pub fn require_identity(&self) -> FeedResult<Identity> {
        self.session.require()
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.identity_task.abort();
    }
}
