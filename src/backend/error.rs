// Errors reported by backend collaborators.
//
// Kept deliberately coarse: callers only need to know whether a failure is
// transient, a missing record, a lost transaction race, bad credentials or
// bad input. Everything else is `Internal`.

/// A failure reported by the identity provider, document store or blob store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Connectivity loss or the service being temporarily unreachable.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A transaction's reads were invalidated by a concurrent write.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// Wrong email/password, or a failed reauthentication.
    #[error("invalid credentials: {0}")]
    Credentials(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("internal backend error: {0}")]
    Internal(String),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

impl From<rusqlite::Error> for BackendError {
    fn from(err: rusqlite::Error) -> Self {
        BackendError::Internal(format!("sqlite: {err}"))
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Internal(format!("malformed document: {err}"))
    }
}

impl From<bcrypt::BcryptError> for BackendError {
    fn from(err: bcrypt::BcryptError) -> Self {
        BackendError::Internal(format!("password hashing: {err}"))
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => BackendError::NotFound(err.to_string()),
            _ => BackendError::Internal(format!("io: {err}")),
        }
    }
}
