// Optimistic like toggling.
//
// The local (liked, count) pair for a post flips before any network round
// trip. The remote toggle then runs under the retry policy; on success the
// pair is reconciled against the server's answer, and once every attempt has
// failed the pair captured before the flip is restored exactly.
//
// At most one toggle per post is in flight. A second request for the same
// post while one is running is dropped, not queued.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::retry::{with_retry, RetryPolicy};
use crate::error::{FeedError, Result};
use crate::gateway::Gateway;
use crate::models::Post;
use crate::session::Session;
use crate::sync::lock;

/// What a post card shows: whether the viewer likes it and the like count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LikeState {
    pub liked: bool,
    pub count: u64,
}

impl LikeState {
    /// The state after flipping `liked` with the matching ±1 on `count`.
    pub fn flipped(self) -> Self {
        Self::after(self, !self.liked)
    }

    /// `prev` adjusted for a like now being `liked`: +1 when liked, -1
    /// (never below 0) when not.
    pub fn after(prev: Self, liked: bool) -> Self {
        let count = if liked {
            prev.count.saturating_add(1)
        } else {
            prev.count.saturating_sub(1)
        };
        Self { liked, count }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToggleError {
    #[error("sign in required")]
    AuthRequired,

    /// Another toggle for this post hasn't finished; this one was dropped.
    #[error("a like change for this post is already in progress")]
    InFlight,

    /// Every attempt failed. The local state is back at `restored`.
    #[error("like failed: {source}")]
    Failed {
        restored: LikeState,
        source: FeedError,
    },
}

impl ToggleError {
    pub fn user_message(&self) -> String {
        match self {
            ToggleError::AuthRequired => FeedError::AuthRequired.user_message(),
            ToggleError::InFlight => "Still saving your last change.".to_string(),
            ToggleError::Failed { source, .. } if source.is_transient() => {
                "Network error: your like wasn't saved. Check your connection.".to_string()
            }
            ToggleError::Failed { .. } => "Couldn't update the like. Please try again.".to_string(),
        }
    }
}

/// The remote half of a like toggle.
#[async_trait]
pub trait LikeBackend: Send + Sync {
    /// Flip the like and return the resulting liked state.
    async fn toggle_like(&self, post_id: &str, uid: &str, post_author_id: &str) -> Result<bool>;

    async fn has_liked(&self, post_id: &str, uid: &str) -> bool;
}

#[async_trait]
impl LikeBackend for Gateway {
    async fn toggle_like(&self, post_id: &str, uid: &str, post_author_id: &str) -> Result<bool> {
        Gateway::toggle_like(self, post_id, uid, post_author_id).await
    }

    async fn has_liked(&self, post_id: &str, uid: &str) -> bool {
        Gateway::has_liked(self, post_id, uid).await
    }
}

/// Removes a post from the in-flight set when the toggle finishes, however
/// it finishes (including the future being dropped).
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    post_id: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, post_id: &str) -> Option<Self> {
        if !lock(set).insert(post_id.to_string()) {
            return None;
        }
        Some(Self {
            set,
            post_id: post_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.post_id);
    }
}

pub struct LikeController {
    backend: Arc<dyn LikeBackend>,
    session: Session,
    policy: RetryPolicy,
    states: Mutex<HashMap<String, LikeState>>,
    in_flight: Mutex<HashSet<String>>,
}

impl LikeController {
    pub fn new(backend: Arc<dyn LikeBackend>, session: Session) -> Self {
        Self {
            backend,
            session,
            policy: RetryPolicy::default(),
            states: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Local state for a post. Untracked posts read as not liked, 0 likes.
    pub fn state(&self, post_id: &str) -> LikeState {
        lock(&self.states).get(post_id).copied().unwrap_or_default()
    }

    pub fn is_in_flight(&self, post_id: &str) -> bool {
        lock(&self.in_flight).contains(post_id)
    }

    /// Seed (or re-seed) a post's count from a freshly delivered record.
    /// Posts with a toggle in flight keep their optimistic state.
    pub fn track(&self, post: &Post) -> LikeState {
        if self.is_in_flight(&post.id) {
            return self.state(&post.id);
        }
        let mut states = lock(&self.states);
        let state = states.entry(post.id.clone()).or_default();
        state.count = post.likes_count;
        *state
    }

    /// Ask the store whether the signed-in user likes the post and update
    /// the local flag. Signed-out viewers never like anything.
    pub async fn refresh(&self, post_id: &str) -> LikeState {
        let liked = match self.session.current() {
            Some(identity) => self.backend.has_liked(post_id, &identity.uid).await,
            None => false,
        };
        if self.is_in_flight(post_id) {
            return self.state(post_id);
        }
        let mut states = lock(&self.states);
        let state = states.entry(post_id.to_string()).or_default();
        state.liked = liked;
        *state
    }

    /// Toggle the signed-in user's like on a post.
    ///
    /// The optimistic state is visible through `state()` as soon as this
    /// future is first polled. Returns the reconciled state.
    pub async fn toggle(
        &self,
        post_id: &str,
        post_author_id: &str,
    ) -> std::result::Result<LikeState, ToggleError> {
        let identity = self.session.current().ok_or(ToggleError::AuthRequired)?;
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, post_id) else {
            debug!(post_id, "Like toggle already in flight, dropping request");
            return Err(ToggleError::InFlight);
        };

        let previous = self.state(post_id);
        self.set_state(post_id, previous.flipped());

        let result = with_retry(&self.policy, || {
            self.backend
                .toggle_like(post_id, &identity.uid, post_author_id)
        })
        .await;

        match result {
            Ok(liked) => {
                let reconciled = LikeState::after(previous, liked);
                self.set_state(post_id, reconciled);
                debug!(post_id, liked, count = reconciled.count, "Like saved");
                Ok(reconciled)
            }
            Err(source) => {
                self.set_state(post_id, previous);
                warn!(error = %source, post_id, "Like failed after retries, reverted");
                Err(ToggleError::Failed {
                    restored: previous,
                    source,
                })
            }
        }
    }

    /// Drop local state for a post that is no longer on screen. A later
    /// `track` starts it over from the delivered record.
    pub fn forget(&self, post_id: &str) {
        lock(&self.states).remove(post_id);
    }

    /// Number of posts with local state.
    pub fn tracked(&self) -> usize {
        lock(&self.states).len()
    }

    fn set_state(&self, post_id: &str, state: LikeState) {
        lock(&self.states).insert(post_id.to_string(), state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flip_adjusts_count() {
        let liked = LikeState {
            liked: true,
            count: 3,
        };
        assert_eq!(
            liked.flipped(),
            LikeState {
                liked: false,
                count: 2
            }
        );
        assert_eq!(liked.flipped().flipped(), liked);
    }

    #[test]
    fn test_unlike_never_goes_negative() {
        let odd = LikeState {
            liked: true,
            count: 0,
        };
        assert_eq!(odd.flipped().count, 0);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let set = Mutex::new(HashSet::new());
        let guard = InFlightGuard::acquire(&set, "p1").unwrap();
        assert!(InFlightGuard::acquire(&set, "p1").is_none());
        assert!(InFlightGuard::acquire(&set, "p2").is_some());
        drop(guard);
        assert!(InFlightGuard::acquire(&set, "p1").is_some());
    }
}
