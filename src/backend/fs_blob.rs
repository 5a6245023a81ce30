// Local blob store: media files under a root directory.
//
// Blob paths are relative, slash-separated ("posts/123_photo.png") and map
// directly onto files below the root. URLs are file:// URLs.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::error::{BackendError, BackendResult};
use super::traits::BlobStore;

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Use `root` as the blob directory. It is created on first upload.
    pub fn new(root: impl Into<PathBuf>) -> BackendResult<Self> {
        let root = root.into();
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()?.join(root)
        };
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a blob path to a file below the root, refusing anything that
    /// could escape it (`..`, absolute paths, empty paths).
    fn resolve(&self, path: &str) -> BackendResult<PathBuf> {
        let relative = Path::new(path);
        let mut components = relative.components().peekable();
        if components.peek().is_none() {
            return Err(BackendError::InvalidArgument("empty blob path".to_string()));
        }
        if !components.all(|c| matches!(c, Component::Normal(_))) {
            return Err(BackendError::InvalidArgument(format!(
                "invalid blob path: {path}"
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, path: &str, bytes: Vec<u8>) -> BackendResult<String> {
        let file = self.resolve(path)?;
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&file, &bytes).await?;
        debug!(path, bytes = bytes.len(), "Stored blob");
        Ok(path.to_string())
    }

    async fn url(&self, path: &str) -> BackendResult<String> {
        let file = self.resolve(path)?;
        if !tokio::fs::try_exists(&file).await? {
            return Err(BackendError::NotFound(path.to_string()));
        }
        url::Url::from_file_path(&file)
            .map(String::from)
            .map_err(|_| BackendError::Internal(format!("no file URL for {}", file.display())))
    }

    async fn delete(&self, path: &str) -> BackendResult<()> {
        let file = self.resolve(path)?;
        tokio::fs::remove_file(&file).await?;
        debug!(path, "Deleted blob");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_url_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();

        let path = store.upload("posts/1_cat.png", vec![7; 16]).await.unwrap();
        assert_eq!(path, "posts/1_cat.png");
        assert_eq!(
            std::fs::read(dir.path().join("posts/1_cat.png")).unwrap(),
            vec![7; 16]
        );

        let url = store.url(&path).await.unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("posts/1_cat.png"));

        store.delete(&path).await.unwrap();
        assert!(matches!(
            store.delete(&path).await,
            Err(BackendError::NotFound(_))
        ));
        assert!(matches!(store.url(&path).await, Err(BackendError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rejects_paths_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();

        for bad in ["../escape.png", "/etc/passwd", "", "posts/../../x"] {
            assert!(
                matches!(
                    store.upload(bad, vec![1]).await,
                    Err(BackendError::InvalidArgument(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }
}
