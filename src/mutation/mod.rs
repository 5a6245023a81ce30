// Optimistic mutation controller: like toggles (optimistic, retried) and
// the non-retried post and comment flows.

pub mod comments;
pub mod likes;
pub mod posts;
pub mod retry;

pub use comments::CommentActions;
pub use likes::{LikeBackend, LikeController, LikeState, ToggleError};
pub use posts::{require_author, PostActions, DEFAULT_CREATE_TIMEOUT};
pub use retry::{with_retry, RetryPolicy};
