//! Object storage for produced images.
//!
//! Uploads are best-effort: callers log failures and carry on replying to
//! the user.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageError;

/// Build a storage key such as `filtered/42/photo_filtered.png`.
pub fn object_key(prefix: &str, chat_id: &str, name: &str) -> String {
    format!("{prefix}/{chat_id}/{name}")
}

/// Destination for result images.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    async fn upload(&self, bytes: &[u8], key: &str) -> Result<(), StorageError>;
}

// ── Local directory ─────────────────────────────────────────────────

/// Writes objects under a root directory, one file per key.
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a key to a path, refusing keys that escape the root.
    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::Unavailable {
                key: key.to_string(),
                reason: "key must be a relative path without '..'".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn upload(&self, bytes: &[u8], key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        tracing::info!(key = %key, bytes = bytes.len(), "Stored object");
        Ok(())
    }
}

// ── HTTP bucket ─────────────────────────────────────────────────────

/// PUTs objects to `{base_url}/{key}` (an S3-compatible bucket endpoint or
/// any server accepting uploads).
pub struct HttpObjectStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpObjectStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn upload(&self, bytes: &[u8], key: &str) -> Result<(), StorageError> {
        let unavailable = |reason: String| StorageError::Unavailable {
            key: key.to_string(),
            reason,
        };

        let resp = self
            .client
            .put(self.object_url(key))
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(unavailable(format!("PUT returned {}", resp.status())));
        }

        tracing::info!(key = %key, bytes = bytes.len(), "Uploaded object");
        Ok(())
    }
}
