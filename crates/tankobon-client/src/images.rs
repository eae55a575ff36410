use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tankobon_core::config::HttpConfig;
use tankobon_core::error::AppError;
use tankobon_core::ports::{FetchedImage, ImageSource};
use tracing::warn;

use crate::USER_AGENT;

const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

/// Downloads cover and thumbnail images over plain HTTP.
#[derive(Clone)]
pub struct HttpImageFetcher {
    client: Client,
}

impl HttpImageFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.image_timeout)
            .build()
            .map_err(|e| AppError::ClientError(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageSource for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Option<FetchedImage> {
        let resp = match self.client.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(url, error = %e, "Image download failed");
                return None;
            }
        };

        if !resp.status().is_success() {
            warn!(url, status = resp.status().as_u16(), "Image download refused");
            return None;
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        match resp.bytes().await {
            Ok(bytes) => Some(FetchedImage {
                bytes: bytes.to_vec(),
                content_type,
            }),
            Err(e) => {
                warn!(url, error = %e, "Image body could not be read");
                None
            }
        }
    }
}
