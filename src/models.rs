// Data models: the typed shapes of stored documents.
//
// Documents are decoded with `Snapshot::decode`, which exposes the document
// id as an `id` field. Timestamps are stored as microseconds since the epoch
// so queries can order them numerically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::backend::Cursor;

/// Field every feed orders by.
pub const CREATED_AT: &str = "created_at";

/// The signed-in account as the identity provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

impl Identity {
    /// Name shown on posts and comments: the display name, or the email's
    /// local part when no display name is set.
    pub fn display_label(&self) -> String {
        match &self.display_name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => username_from_email(&self.email),
        }
    }
}

/// The part of an email address before the `@`.
pub fn username_from_email(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

/// Public profile document at `users/{uid}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub uid: String,
    pub display_name: String,
    pub email: String,
    pub username: String,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_microseconds_option")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A stored media object: where to fetch it and what to delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    #[serde(default)]
    pub media: Option<MediaRef>,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "non_negative")]
    pub likes_count: u64,
    #[serde(default, deserialize_with = "non_negative")]
    pub comments_count: u64,
    #[serde(default, with = "chrono::serde::ts_microseconds_option")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Post {
    /// Pagination position of this post in a `created_at` ordering.
    pub fn cursor(&self) -> Cursor {
        Cursor {
            value: self.created_at.timestamp_micros().into(),
            id: self.id.clone(),
        }
    }

    pub fn media_path(&self) -> Option<&str> {
        self.media.as_ref().map(|m| m.path.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub author_name: String,
    pub text: String,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Like,
}

/// An entry in a user's inbox. The recipient is implicit in the path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub post_id: String,
    /// uid of the user who acted.
    pub from: String,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

/// A file chosen for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl MediaUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    /// Read a file from disk, keeping only its base name.
    pub async fn from_file(path: &std::path::Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self { file_name, bytes })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewPost {
    pub content: String,
    pub media: Option<MediaUpload>,
}

/// Changes to an existing post. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostUpdate {
    pub content: Option<String>,
    pub new_media: Option<MediaUpload>,
}

/// Counters can be driven below zero by racing best-effort decrements;
/// a stored negative value reads as 0.
fn non_negative<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64))
            .unwrap_or(0),
        _ => 0,
    })
}
