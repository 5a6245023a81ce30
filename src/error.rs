// Error taxonomy for feed operations.
//
// Backend collaborators report `BackendError`; everything above the gateway
// speaks `FeedError`. Best-effort side effects never produce a `FeedError` at
// all: they are logged where they happen and swallowed.

use crate::backend::BackendError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// The action needs a signed-in user. Never retried.
    #[error("sign in required")]
    AuthRequired,

    /// Transient connectivity failure.
    #[error("network error: {0}")]
    Network(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Rejected before any remote call.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The signed-in user doesn't own the resource.
    #[error("not allowed: {0}")]
    Forbidden(String),

    #[error("timed out: {0}")]
    Timeout(String),

    /// Wrong email or password, or a failed reauthentication.
    #[error("invalid credentials: {0}")]
    Credentials(String),

    #[error("backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, FeedError>;

impl From<BackendError> for FeedError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(msg) => FeedError::Network(msg),
            BackendError::NotFound(msg) => FeedError::NotFound(msg),
            BackendError::Credentials(msg) => FeedError::Credentials(msg),
            BackendError::InvalidArgument(msg) => FeedError::Validation(msg),
            other => FeedError::Backend(other.to_string()),
        }
    }
}

impl FeedError {
    /// Whether retrying the same call could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FeedError::Network(_))
    }

    /// A single line suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            FeedError::AuthRequired => "Please sign in first.".to_string(),
            FeedError::Network(_) => {
                "Network error. Check your connection and try again.".to_string()
            }
            FeedError::NotFound(_) => "That item no longer exists.".to_string(),
            FeedError::Validation(msg) => msg.clone(),
            FeedError::Forbidden(_) => "You can only change your own content.".to_string(),
            FeedError::Timeout(_) => "The request took too long. Please try again.".to_string(),
            FeedError::Credentials(_) => "Incorrect email or password.".to_string(),
            FeedError::Backend(_) => "Something went wrong. Please try again.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_errors_map_onto_feed_errors() {
        assert_eq!(
            FeedError::from(BackendError::Unavailable("down".into())),
            FeedError::Network("down".into())
        );
        assert_eq!(
            FeedError::from(BackendError::InvalidArgument("weak".into())),
            FeedError::Validation("weak".into())
        );
        assert!(matches!(
            FeedError::from(BackendError::Conflict("race".into())),
            FeedError::Backend(_)
        ));
    }

    #[test]
    fn test_only_network_errors_are_transient() {
        assert!(FeedError::Network("x".into()).is_transient());
        assert!(!FeedError::Backend("x".into()).is_transient());
        assert!(!FeedError::AuthRequired.is_transient());
    }

    #[test]
    fn test_network_and_generic_messages_differ() {
        let network = FeedError::Network("x".into()).user_message();
        let generic = FeedError::Backend("x".into()).user_message();
        assert_ne!(network, generic);
        assert!(network.contains("Network"));
    }
}
