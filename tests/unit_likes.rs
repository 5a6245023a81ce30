// Unit tests for the optimistic like controller.
//
// The remote side is a scripted LikeBackend so each test controls exactly
// how many attempts fail, with which error, and when a call completes.
// Retry delays run on tokio's paused clock.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use murmur::error::{FeedError, Result};
use murmur::models::{Identity, Post};
use murmur::mutation::{LikeBackend, LikeController, LikeState, ToggleError};
use murmur::session::Session;

// ============================================================
// Scripted backend
// ============================================================

#[derive(Default)]
struct ScriptedBackend {
    /// Server-side liked state, flipped by each successful call.
    liked: AtomicBool,
    /// Calls still to fail before calls start succeeding.
    failures: AtomicU32,
    /// Fail with a network error instead of a generic one.
    network: AtomicBool,
    calls: AtomicU32,
    /// When set, every call waits for a permit before answering.
    gate: Option<Arc<Notify>>,
}

impl ScriptedBackend {
    fn failing(times: u32, network: bool) -> Self {
        Self {
            failures: AtomicU32::new(times),
            network: AtomicBool::new(network),
            ..Self::default()
        }
    }

    fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LikeBackend for ScriptedBackend {
    async fn toggle_like(&self, _post_id: &str, _uid: &str, _author: &str) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(if self.network.load(Ordering::SeqCst) {
                FeedError::Network("connection reset".into())
            } else {
                FeedError::Backend("internal".into())
            });
        }
        Ok(!self.liked.fetch_xor(true, Ordering::SeqCst))
    }

    async fn has_liked(&self, _post_id: &str, _uid: &str) -> bool {
        self.liked.load(Ordering::SeqCst)
    }
}

fn signed_in_session() -> Session {
    let session = Session::new();
    session.set(Some(Identity {
        uid: "viewer".to_string(),
        email: "viewer@example.com".to_string(),
        display_name: None,
        photo_url: None,
    }));
    session
}

fn post_with_likes(count: u64) -> Post {
    Post {
        id: "p1".to_string(),
        author_id: "author".to_string(),
        author_name: "Author".to_string(),
        content: "hello".to_string(),
        media: None,
        created_at: chrono::Utc::now(),
        likes_count: count,
        comments_count: 0,
        updated_at: None,
    }
}

fn state(liked: bool, count: u64) -> LikeState {
    LikeState { liked, count }
}

// ============================================================
// Authentication and in-flight dropping
// ============================================================

#[tokio::test]
async fn signed_out_toggle_is_rejected_without_state_change() {
    let backend = Arc::new(ScriptedBackend::default());
    let controller = LikeController::new(backend.clone(), Session::new());
    controller.track(&post_with_likes(3));

    let err = controller.toggle("p1", "author").await.unwrap_err();

    assert_eq!(err, ToggleError::AuthRequired);
    assert_eq!(controller.state("p1"), state(false, 3));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn second_toggle_while_in_flight_is_dropped() {
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(ScriptedBackend::gated(gate.clone()));
    let controller = Arc::new(LikeController::new(backend.clone(), signed_in_session()));
    controller.track(&post_with_likes(3));

    let first = tokio::spawn({
        let controller = controller.clone();
        async move { controller.toggle("p1", "author").await }
    });
    while !controller.is_in_flight("p1") {
        tokio::task::yield_now().await;
    }

    // Optimistic state is already visible
    assert_eq!(controller.state("p1"), state(true, 4));

    let second = controller.toggle("p1", "author").await;
    assert_eq!(second, Err(ToggleError::InFlight));
    assert_eq!(controller.state("p1"), state(true, 4));

    gate.notify_one();
    assert_eq!(first.await.unwrap(), Ok(state(true, 4)));
    assert_eq!(backend.calls(), 1);
    assert!(!controller.is_in_flight("p1"));
}

#[tokio::test]
async fn other_posts_are_not_blocked_by_an_in_flight_toggle() {
    let gate = Arc::new(Notify::new());
    let backend = Arc::new(ScriptedBackend::gated(gate.clone()));
    let controller = Arc::new(LikeController::new(backend, signed_in_session()));

    let first = tokio::spawn({
        let controller = controller.clone();
        async move { controller.toggle("p1", "author").await }
    });
    while !controller.is_in_flight("p1") {
        tokio::task::yield_now().await;
    }

    let other = tokio::spawn({
        let controller = controller.clone();
        async move { controller.toggle("p2", "author").await }
    });
    while !controller.is_in_flight("p2") {
        tokio::task::yield_now().await;
    }

    gate.notify_waiters();
    assert!(first.await.unwrap().is_ok());
    assert!(other.await.unwrap().is_ok());
}

// ============================================================
// Reconciliation and revert
// ============================================================

#[tokio::test]
async fn success_reconciles_from_captured_state() {
    let backend = Arc::new(ScriptedBackend::default());
    let controller = LikeController::new(backend, signed_in_session());
    controller.track(&post_with_likes(5));

    let result = controller.toggle("p1", "author").await;

    assert_eq!(result, Ok(state(true, 6)));
    assert_eq!(controller.state("p1"), state(true, 6));
}

#[tokio::test(start_paused = true)]
async fn three_failures_restore_the_captured_pair_exactly() {
    let backend = Arc::new(ScriptedBackend::failing(u32::MAX, true));
    let controller = LikeController::new(backend.clone(), signed_in_session());
    controller.track(&post_with_likes(7));
    let before = controller.state("p1");

    let start = tokio::time::Instant::now();
    let err = controller.toggle("p1", "author").await.unwrap_err();

    match err {
        ToggleError::Failed { restored, source } => {
            assert_eq!(restored, before);
            assert!(source.is_transient());
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    assert_eq!(controller.state("p1"), before);
    assert_eq!(backend.calls(), 3);
    assert!(start.elapsed() >= Duration::from_millis(1200));
}

#[tokio::test(start_paused = true)]
async fn recovery_on_third_attempt_counts_as_success() {
    let backend = Arc::new(ScriptedBackend::failing(2, true));
    let controller = LikeController::new(backend.clone(), signed_in_session());
    controller.track(&post_with_likes(0));

    let result = controller.toggle("p1", "author").await;

    assert_eq!(result, Ok(state(true, 1)));
    assert_eq!(backend.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn network_and_generic_failures_have_different_messages() {
    let network = LikeController::new(
        Arc::new(ScriptedBackend::failing(u32::MAX, true)),
        signed_in_session(),
    );
    let generic = LikeController::new(
        Arc::new(ScriptedBackend::failing(u32::MAX, false)),
        signed_in_session(),
    );

    let network_msg = network.toggle("p1", "a").await.unwrap_err().user_message();
    let generic_msg = generic.toggle("p1", "a").await.unwrap_err().user_message();

    assert_ne!(network_msg, generic_msg);
    assert!(network_msg.to_lowercase().contains("network"));
}

// ============================================================
// Properties
// ============================================================

#[tokio::test]
async fn liked_flag_tracks_parity_and_count_never_negative() {
    for n in 1..=7u32 {
        let backend = Arc::new(ScriptedBackend::default());
        let controller = LikeController::new(backend, signed_in_session());
        controller.track(&post_with_likes(0));

        for _ in 0..n {
            let s = controller.toggle("p1", "author").await.unwrap();
            assert!(s.count <= 1);
        }

        let s = controller.state("p1");
        assert_eq!(s.liked, n % 2 == 1, "after {n} toggles");
        assert_eq!(s.count, u64::from(n % 2));
    }
}

#[tokio::test]
async fn refresh_reads_liked_flag_for_the_viewer() {
    let backend = Arc::new(ScriptedBackend::default());
    backend.liked.store(true, Ordering::SeqCst);
    let controller = LikeController::new(backend, signed_in_session());
    controller.track(&post_with_likes(2));

    assert_eq!(controller.refresh("p1").await, state(true, 2));
}

#[tokio::test]
async fn refresh_when_signed_out_is_not_liked() {
    let backend = Arc::new(ScriptedBackend::default());
    backend.liked.store(true, Ordering::SeqCst);
    let controller = LikeController::new(backend, Session::new());

    assert_eq!(controller.refresh("p1").await, state(false, 0));
}

#[tokio::test]
async fn forgotten_posts_start_over_from_the_next_record() {
    let backend = Arc::new(ScriptedBackend::default());
    backend.liked.store(true, Ordering::SeqCst);
    let controller = LikeController::new(backend, signed_in_session());
    controller.track(&post_with_likes(4));
    controller.refresh("p1").await;
    assert_eq!(controller.tracked(), 1);

    controller.forget("p1");
    controller.forget("never-seen");

    assert_eq!(controller.tracked(), 0);
    assert_eq!(controller.state("p1"), LikeState::default());
    assert_eq!(controller.track(&post_with_likes(9)), state(false, 9));
}

#[tokio::test(start_paused = true)]
async fn end_to_end_like_example() {
    let backend = Arc::new(ScriptedBackend::default());
    let session = Session::new();
    let controller = LikeController::new(backend.clone(), session.clone());
    controller.track(&post_with_likes(3));

    // Signed out: rejected, nothing changes
    assert_eq!(
        controller.toggle("p1", "author").await,
        Err(ToggleError::AuthRequired)
    );
    assert_eq!(controller.state("p1"), state(false, 3));

    // Signed in, remote succeeds
    session.set(signed_in_session().current());
    assert_eq!(controller.toggle("p1", "author").await, Ok(state(true, 4)));

    // Remote fails all three attempts: back to the state before this click
    backend.failures.store(3, Ordering::SeqCst);
    let err = controller.toggle("p1", "author").await.unwrap_err();
    assert!(matches!(err, ToggleError::Failed { restored, .. } if restored == state(true, 4)));
    assert_eq!(controller.state("p1"), state(true, 4));
    assert!(!err.user_message().is_empty());
}
