//! Filesystem-backed object storage for cover and volume images.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tankobon_core::error::AppError;
use tankobon_core::ports::ObjectStore;
use tracing::debug;

/// Stores objects as plain files below a root directory.
///
/// Keys are `/`-separated relative paths such as
/// `covers/30002/1700000000_1a2b3c4d.jpg`. Keys that are absolute or climb
/// out of the root are rejected.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, AppError> {
        Ok(self.root.join(check_key(key)?))
    }
}

/// Accepts only non-empty relative keys made of plain path segments.
pub(crate) fn check_key(key: &str) -> Result<&Path, AppError> {
    let relative = Path::new(key);
    let is_plain = !key.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !is_plain {
        return Err(AppError::InvalidObjectKey(key.to_string()));
    }
    Ok(relative)
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), AppError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::ObjectStoreError(format!("{}: {}", key, e)))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| AppError::ObjectStoreError(format!("{}: {}", key, e)))?;

        debug!(key, content_type, size = bytes.len(), "Object stored");
        Ok(())
    }

    /// Deleting a key that does not exist succeeds.
    async fn delete(&self, key: &str) -> Result<(), AppError> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::ObjectStoreError(format!("{}: {}", key, e))),
        }
    }
}
