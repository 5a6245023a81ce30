// Media blobs: upload returning a URL plus deletable path, best-effort delete.

use tracing::{debug, warn};

use super::Gateway;
use crate::error::Result;
use crate::models::MediaRef;

/// Longest file name kept in a blob path.
const MAX_FILE_NAME_CHARS: usize = 100;

impl Gateway {
    pub async fn upload_media(&self, path: &str, bytes: Vec<u8>) -> Result<MediaRef> {
        let size = bytes.len();
        let path = self.blobs.upload(path, bytes).await?;
        let url = self.blobs.url(&path).await?;
        debug!(path = %path, bytes = size, "Uploaded media");
        Ok(MediaRef { url, path })
    }

    /// Delete a blob. Failures are logged and swallowed: a stale object in
    /// storage is acceptable, a blocked user action is not.
    pub async fn delete_media(&self, path: &str) {
        match self.blobs.delete(path).await {
            Ok(()) => debug!(path, "Deleted media"),
            Err(e) => warn!(error = %e, path, "Failed to delete media"),
        }
    }

    /// Storage path for a new post attachment.
    pub fn post_media_path(&self, file_name: &str) -> String {
        format!(
            "posts/{}_{}",
            self.now_micros(),
            sanitize_file_name(file_name)
        )
    }

    /// Storage path for a new profile photo.
    pub fn profile_photo_path(&self, uid: &str, file_name: &str) -> String {
        format!(
            "users/{uid}/profile_{}_{}",
            self.now_micros(),
            sanitize_file_name(file_name)
        )
    }
}

/// Reduce a user-supplied file name to a single safe path segment.
///
/// Directory parts are dropped and anything outside `[A-Za-z0-9._-]`
/// becomes `_`, so the result can't escape the blob path prefix.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILE_NAME_CHARS)
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_keeps_plain_names() {
        assert_eq!(sanitize_file_name("cat.png"), "cat.png");
        assert_eq!(sanitize_file_name("my-photo_2.JPG"), "my-photo_2.JPG");
    }

    #[test]
    fn test_sanitize_strips_directories_and_odd_characters() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\pic.png"), "pic.png");
        assert_eq!(sanitize_file_name("summer trip (1).png"), "summer_trip__1_.png");
    }

    #[test]
    fn test_sanitize_never_returns_empty_or_hidden_names() {
        assert_eq!(sanitize_file_name(""), "file");
        assert_eq!(sanitize_file_name(".."), "file");
        assert_eq!(sanitize_file_name(".env"), "env");
        assert_eq!(sanitize_file_name("dir/"), "file");
    }

    #[test]
    fn test_sanitize_truncates_long_names() {
        let long = "a".repeat(500);
        assert_eq!(sanitize_file_name(&long).len(), MAX_FILE_NAME_CHARS);
    }
}
