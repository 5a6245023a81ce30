// Account rules and change-stream helpers shared by the identity providers.

use tokio::sync::watch;

use super::error::{BackendError, BackendResult};
use crate::models::Identity;

/// Shortest password a provider accepts.
pub const MIN_PASSWORD_CHARS: usize = 6;

/// Republish the signed-in identity after it changed, so the change stream
/// never replays a stale copy of the current user.
pub(crate) fn refresh_current(current: &watch::Sender<Option<Identity>>, updated: &Identity) {
    current.send_if_modified(|slot| match slot {
        Some(signed_in) if signed_in.uid == updated.uid => {
            *signed_in = updated.clone();
            true
        }
        _ => false,
    });
}

/// Provider-side password rule, mirroring the hosted provider's "weak password".
pub(crate) fn validate_password(password: &str) -> BackendResult<()> {
    if password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(BackendError::InvalidArgument(format!(
            "password must be at least {MIN_PASSWORD_CHARS} characters"
        )));
    }
    Ok(())
}

pub(crate) fn validate_email(email: &str) -> BackendResult<()> {
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty());
    if !valid {
        return Err(BackendError::InvalidArgument(format!("invalid email: {email}")));
    }
    Ok(())
}

pub(crate) fn validate_new_account(email: &str, password: &str) -> BackendResult<()> {
    validate_email(email)?;
    validate_password(password)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(uid: &str, name: Option<&str>) -> Identity {
        Identity {
            uid: uid.to_string(),
            email: format!("{uid}@example.com"),
            display_name: name.map(str::to_string),
            photo_url: None,
        }
    }

    #[test]
    fn test_account_rules() {
        assert!(validate_new_account("ana@example.com", "secret1").is_ok());
        assert!(matches!(validate_email("ana"), Err(BackendError::InvalidArgument(_))));
        assert!(matches!(validate_email("@example.com"), Err(BackendError::InvalidArgument(_))));
        assert!(matches!(validate_password("12345"), Err(BackendError::InvalidArgument(_))));
    }

    #[test]
    fn test_refresh_current_only_touches_the_signed_in_user() {
        let (tx, mut rx) = watch::channel(Some(identity("ana", None)));
        let _ = rx.borrow_and_update();

        refresh_current(&tx, &identity("bo", Some("Bo")));
        assert!(!rx.has_changed().unwrap());

        refresh_current(&tx, &identity("ana", Some("Ana")));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow().as_ref().and_then(|i| i.display_name.as_deref()), Some("Ana"));
    }

    #[test]
    fn test_refresh_current_ignores_signed_out_slot() {
        let (tx, rx) = watch::channel(None);
        refresh_current(&tx, &identity("ana", None));
        assert!(rx.borrow().is_none());
    }
}
