//! Tankobon DB - persistence for the harvester
//!
//! - [`repository`] - PostgreSQL tables for series, volumes and trusted publishers
//! - [`objects`] - filesystem-backed object store for covers and thumbnails
//! - [`s3`] - S3 bucket object store, selected with `storage.backend = "s3"`
//!
//! Schema changes live in `migrations/` and are applied with [`MIGRATOR`]
//! when the CLI starts.

use std::sync::Arc;

use tankobon_core::config::{StorageBackend, StorageConfig};
use tankobon_core::error::AppError;
use tankobon_core::ports::ObjectStore;
use tracing::info;

pub mod objects;
pub mod repository;
pub mod s3;

pub use objects::LocalObjectStore;
pub use repository::CatalogRepository;
pub use s3::S3ObjectStore;

/// Embedded schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Opens the object store the `[storage]` section selects.
pub async fn open_object_store(storage: &StorageConfig) -> Result<Arc<dyn ObjectStore>, AppError> {
    match storage.backend {
        StorageBackend::Local => {
            info!(root = %storage.object_root.display(), "Storing images locally");
            Ok(Arc::new(LocalObjectStore::new(&storage.object_root)))
        }
        StorageBackend::S3 => {
            let store = S3ObjectStore::from_config(storage).await?;
            info!(bucket = store.bucket(), "Storing images in S3");
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageConfig {
            object_root: dir.path().join("objects"),
            ..StorageConfig::default()
        };

        let store = open_object_store(&storage).await.unwrap();
        store.put("covers/1/1_a.png", b"png", "image/png").await.unwrap();

        assert!(dir.path().join("objects/covers/1/1_a.png").exists());
    }

    #[tokio::test]
    async fn test_open_s3_store_without_bucket_fails() {
        let storage = StorageConfig {
            backend: StorageBackend::S3,
            ..StorageConfig::default()
        };
        assert!(matches!(
            open_object_store(&storage).await,
            Err(AppError::ConfigError(_))
        ));
    }

    #[test]
    fn test_migrations_are_embedded() {
        assert!(MIGRATOR.iter().any(|m| m.description.contains("init")));
    }
}
