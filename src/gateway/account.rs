// Account operations: sign-up, sign-in/out, profile, email and password.
//
// Every successful call overwrites the session slot explicitly rather than
// waiting for the provider's change stream to catch up.

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{Gateway, USERS};
use crate::backend::{document, ProfileChanges};
use crate::error::{FeedError, Result};
use crate::models::{username_from_email, Identity, MediaUpload, UserProfile};

pub const MIN_PASSWORD_LEN: usize = 6;

fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(FeedError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters."
        )));
    }
    Ok(())
}

impl Gateway {
    /// Create an account, give it a display name and sign it in.
    pub async fn sign_up(&self, email: &str, password: &str, display_name: &str) -> Result<Identity> {
        validate_password(password)?;
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(FeedError::Validation("Display name can't be empty.".to_string()));
        }

        let created = self.identity.create_account(email.trim(), password).await?;
        let identity = self
            .identity
            .update_profile(
                &created,
                ProfileChanges {
                    display_name: Some(display_name.to_string()),
                    photo_url: None,
                },
            )
            .await?;

        self.write_user_profile(&identity).await;
        self.session.set(Some(identity.clone()));
        info!(uid = %identity.uid, "Signed up");
        Ok(identity)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        let identity = self.identity.sign_in(email.trim(), password).await?;
        self.session.set(Some(identity.clone()));
        info!(uid = %identity.uid, "Signed in");
        Ok(identity)
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.identity.sign_out().await?;
        self.session.set(None);
        info!("Signed out");
        Ok(())
    }

    /// Change the display name and/or profile photo of the signed-in user.
    pub async fn update_profile(
        &self,
        display_name: Option<&str>,
        photo: Option<MediaUpload>,
    ) -> Result<Identity> {
        let current = self.session.require()?;

        let display_name = match display_name.map(str::trim) {
            Some("") => {
                return Err(FeedError::Validation("Display name can't be empty.".to_string()))
            }
            other => other.map(str::to_string),
        };

        let photo_url = match photo {
            Some(upload) => {
                let path = self.profile_photo_path(&current.uid, &upload.file_name);
                Some(self.upload_media(&path, upload.bytes).await?.url)
            }
            None => None,
        };

        let identity = self
            .identity
            .update_profile(
                &current,
                ProfileChanges {
                    display_name,
                    photo_url,
                },
            )
            .await?;

        self.write_user_profile(&identity).await;
        self.session.set(Some(identity.clone()));
        debug!(uid = %identity.uid, "Updated profile");
        Ok(identity)
    }

    /// Change the email address after reauthenticating with the current password.
    pub async fn update_email(&self, new_email: &str, current_password: &str) -> Result<Identity> {
        let current = self.session.require()?;
        let identity = self
            .identity
            .change_email(&current, new_email.trim(), current_password)
            .await?;

        self.write_user_profile(&identity).await;
        self.session.set(Some(identity.clone()));
        info!(uid = %identity.uid, "Changed email");
        Ok(identity)
    }

    /// Change the password after reauthenticating with the current one.
    pub async fn update_password(&self, current_password: &str, new_password: &str) -> Result<()> {
        validate_password(new_password)?;
        let current = self.session.require()?;
        self.identity
            .change_password(&current, current_password, new_password)
            .await?;

        self.session.set(Some(current));
        info!("Changed password");
        Ok(())
    }

    pub async fn get_user_profile(&self, uid: &str) -> Result<Option<UserProfile>> {
        let snapshot = self.store.read(USERS, uid).await?;
        Ok(snapshot.map(|s| s.decode::<UserProfile>()).transpose()?)
    }

    /// Best-effort: write `users/{uid}` from the identity, keeping the
    /// original `created_at` when the document already exists.
    async fn write_user_profile(&self, identity: &Identity) {
        let now = self.now_micros();
        let created_at = match self.store.read(USERS, &identity.uid).await {
            Ok(Some(existing)) => existing.data.get("created_at").cloned(),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, uid = %identity.uid, "Failed to read user profile");
                return;
            }
        };

        let data = document(json!({
            "uid": identity.uid,
            "display_name": identity.display_label(),
            "email": identity.email,
            "username": username_from_email(&identity.email),
            "photo_url": identity.photo_url,
            "created_at": created_at.unwrap_or(Value::from(now)),
            "updated_at": now,
        }));
        if let Err(e) = self.store.set(USERS, &identity.uid, data).await {
            warn!(error = %e, uid = %identity.uid, "Failed to write user profile");
        }
    }
}
