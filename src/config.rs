use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::context::ContextOptions;
use crate::feed::DEFAULT_PAGE_SIZE;
use crate::mutation::DEFAULT_CREATE_TIMEOUT;

/// Central configuration loaded from environment variables.
///
/// Nothing is required: every setting has a default. The .env file is
/// loaded automatically at startup via dotenvy.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// SQLite file holding documents, accounts and the signed-in session.
    pub db_path: String,
    /// Directory the filesystem blob store writes media into.
    pub blob_dir: PathBuf,
    /// Posts per live window and per `load_more` page.
    pub page_size: usize,
    /// Upper bound on a whole post creation (upload + write + read-back).
    pub create_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "./murmur.db".to_string(),
            blob_dir: default_blob_dir(),
            page_size: DEFAULT_PAGE_SIZE,
            create_timeout: DEFAULT_CREATE_TIMEOUT,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset. Malformed numbers are an error rather
    /// than silently ignored.
    pub fn load() -> Result<Self> {
        let defaults = Self::default();

        let page_size = match env::var("MURMUR_PAGE_SIZE") {
            Ok(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .with_context(|| format!("MURMUR_PAGE_SIZE must be a positive integer, got {raw:?}"))?,
            Err(_) => defaults.page_size,
        };

        let create_timeout = match env::var("MURMUR_CREATE_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(raw.parse::<u64>().with_context(|| {
                format!("MURMUR_CREATE_TIMEOUT_SECS must be a whole number of seconds, got {raw:?}")
            })?),
            Err(_) => defaults.create_timeout,
        };

        Ok(Self {
            db_path: env::var("MURMUR_DB_PATH").unwrap_or(defaults.db_path),
            blob_dir: env::var("MURMUR_BLOB_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.blob_dir),
            page_size,
            create_timeout,
        })
    }

    pub fn context_options(&self) -> ContextOptions {
        ContextOptions {
            page_size: self.page_size,
            create_timeout: self.create_timeout,
        }
    }
}

/// `<platform data dir>/murmur/blobs`, or `./murmur/blobs` when the
/// platform has no data dir.
pub fn default_blob_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("murmur")
        .join("blobs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.db_path, "./murmur.db");
        assert_eq!(config.page_size, 10);
        assert_eq!(config.create_timeout, Duration::from_secs(20));
        assert!(config.blob_dir.ends_with("murmur/blobs"));
    }

    #[test]
    fn test_context_options_follow_config() {
        let config = Config {
            page_size: 3,
            create_timeout: Duration::from_secs(5),
            ..Config::default()
        };
        let options = config.context_options();
        assert_eq!(options.page_size, 3);
        assert_eq!(options.create_timeout, Duration::from_secs(5));
    }
}
