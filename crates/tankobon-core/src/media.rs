//! Object keys and uploads for cover and thumbnail images.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::ports::{ImageSource, ObjectStore};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];
const DEFAULT_EXTENSION: &str = "jpg";

fn hex_prefix(input: &str, len: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex.truncate(len);
    hex
}

/// Extension taken from the URL path when it names a known image format.
pub fn image_extension(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or(path);
    last.rsplit_once('.')
        .and_then(|(_, ext)| {
            IMAGE_EXTENSIONS
                .iter()
                .find(|known| known.eq_ignore_ascii_case(ext))
                .copied()
        })
        .unwrap_or(DEFAULT_EXTENSION)
}

fn versioned_name(url: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}_{}.{}",
        now.timestamp(),
        hex_prefix(url, 8),
        image_extension(url)
    )
}

/// `covers/<external_id>/<unix_ts>_<hash8>.<ext>`
pub fn cover_key(external_id: i64, url: &str, now: DateTime<Utc>) -> String {
    format!("covers/{}/{}", external_id, versioned_name(url, now))
}

/// `volumes/<isbn13 or title-hash12>/<unix_ts>_<hash8>.<ext>`
pub fn volume_key(isbn_13: Option<&str>, title: &str, url: &str, now: DateTime<Utc>) -> String {
    let identifier = match isbn_13.filter(|i| !i.is_empty()) {
        Some(isbn) => isbn.to_string(),
        None => hex_prefix(title, 12),
    };
    format!("volumes/{}/{}", identifier, versioned_name(url, now))
}

/// Downloads `url` and stores it under `key`.
///
/// Returns the key on success. Failures are logged and yield `None`; the
/// owning record is then saved without an image key.
pub async fn mirror_image(
    images: &dyn ImageSource,
    objects: &dyn ObjectStore,
    url: &str,
    key: &str,
) -> Option<String> {
    let image = images.fetch(url).await?;
    match objects.put(key, &image.bytes, &image.content_type).await {
        Ok(()) => {
            debug!(key, bytes = image.bytes.len(), "Image stored");
            Some(key.to_string())
        }
        Err(e) => {
            warn!(key, error = %e, "Failed to store image");
            None
        }
    }
}
