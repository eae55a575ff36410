//! S3-backed object storage for cover and volume images.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tankobon_core::config::StorageConfig;
use tankobon_core::error::AppError;
use tankobon_core::ports::ObjectStore;
use tracing::debug;

use crate::objects::check_key;

/// Stores objects in one S3 bucket under the same keys the local store uses.
///
/// Every upload carries the configured `Cache-Control`, since keys embed a
/// timestamp and a URL hash and are never rewritten.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    cache_control: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: impl Into<String>, cache_control: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            cache_control: cache_control.into(),
        }
    }

    /// Builds a client from the AWS environment (credentials chain, profile,
    /// region), overridden by the `[storage]` section where it is explicit.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if no bucket is configured.
    pub async fn from_config(storage: &StorageConfig) -> Result<Self, AppError> {
        let bucket = storage
            .bucket
            .clone()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| {
                AppError::ConfigError("storage.bucket is required for the s3 backend".to_string())
            })?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &storage.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &storage.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self::new(
            Client::from_conf(builder.build()),
            bucket,
            storage.cache_control.clone(),
        ))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), AppError> {
        check_key(key)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(content_type)
            .cache_control(&self.cache_control)
            .send()
            .await
            .map_err(|e| AppError::ObjectStoreError(format!("{}: {}", key, DisplayErrorContext(&e))))?;

        debug!(bucket = %self.bucket, key, content_type, size = bytes.len(), "Object uploaded");
        Ok(())
    }

    /// S3 answers deletes of absent keys with success as well.
    async fn delete(&self, key: &str) -> Result<(), AppError> {
        check_key(key)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| AppError::ObjectStoreError(format!("{}: {}", key, DisplayErrorContext(&e))))?;

        debug!(bucket = %self.bucket, key, "Object deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use aws_sdk_s3::config::Credentials;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers every request with `status`, recording the lowercased request
    /// heads.
    async fn canned_s3(status: &'static str, body: &'static str) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let heads = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&heads);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let header_end = loop {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => break None,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break Some(pos);
                    }
                };
                let Some(header_end) = header_end else { continue };
                let head = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
                let length = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                while buf.len() < header_end + 4 + length {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                recorded.lock().unwrap().push(head);

                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (endpoint, heads)
    }

    fn store_at(endpoint: &str) -> S3ObjectStore {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new("AKIDTANKOBON", "secret", None, None, "static"))
            .endpoint_url(endpoint)
            .force_path_style(true)
            .build();
        S3ObjectStore::new(Client::from_conf(config), "tankobon-images", "max-age=31536000")
    }

    #[tokio::test]
    async fn test_put_sends_object_with_headers() {
        let (endpoint, heads) = canned_s3("200 OK", "").await;
        let store = store_at(&endpoint);

        store
            .put("covers/30002/1700000000_1a2b3c4d.jpg", b"jpeg-bytes", "image/jpeg")
            .await
            .unwrap();

        let heads = heads.lock().unwrap();
        assert_eq!(heads.len(), 1);
        assert!(
            heads[0].starts_with("put /tankobon-images/covers/30002/1700000000_1a2b3c4d.jpg"),
            "{}",
            heads[0]
        );
        assert!(heads[0].contains("content-type: image/jpeg"));
        assert!(heads[0].contains("cache-control: max-age=31536000"));
    }

    #[tokio::test]
    async fn test_delete_targets_bucket_key() {
        let (endpoint, heads) = canned_s3("204 No Content", "").await;
        let store = store_at(&endpoint);

        store.delete("volumes/9781569319017/1_abcd1234.jpg").await.unwrap();

        let heads = heads.lock().unwrap();
        assert!(
            heads[0].starts_with("delete /tankobon-images/volumes/9781569319017/1_abcd1234.jpg"),
            "{}",
            heads[0]
        );
    }

    #[tokio::test]
    async fn test_denied_upload_is_object_store_error() {
        let (endpoint, _) = canned_s3(
            "403 Forbidden",
            r#"<?xml version="1.0" encoding="UTF-8"?><Error><Code>AccessDenied</Code><Message>Access Denied</Message></Error>"#,
        )
        .await;
        let store = store_at(&endpoint);

        let result = store.put("covers/1/1_x.png", b"x", "image/png").await;

        assert!(matches!(result, Err(AppError::ObjectStoreError(_))));
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys_before_sending() {
        let (endpoint, heads) = canned_s3("200 OK", "").await;
        let store = store_at(&endpoint);

        for key in ["../outside.jpg", "/etc/passwd", ""] {
            let result = store.delete(key).await;
            assert!(matches!(result, Err(AppError::InvalidObjectKey(_))), "{:?}", key);
        }
        assert!(heads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_from_config_requires_bucket() {
        let storage = StorageConfig::default();
        let result = S3ObjectStore::from_config(&storage).await;
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }
}
