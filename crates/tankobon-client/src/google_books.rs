use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tankobon_core::config::HttpConfig;
use tankobon_core::error::AppError;
use tankobon_core::models::{Price, VolumeCandidate};
use tankobon_core::ports::{VolumePage, VolumeQuery, VolumeSource};
use tracing::{debug, warn};
use url::Url;

use crate::{body_excerpt, transport_error, USER_AGENT};

/// Google Books volume search endpoint.
pub const GOOGLE_BOOKS_URL: &str = "https://www.googleapis.com/books/v1/volumes";

/// Results requested per search call; the API's maximum.
pub const MAX_RESULTS: u32 = 40;

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct VolumesResponse {
    #[serde(default)]
    total_items: i64,
    #[serde(default)]
    items: Vec<BookItem>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct BookItem {
    #[serde(default)]
    volume_info: VolumeInfo,
    #[serde(default)]
    sale_info: SaleInfo,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct VolumeInfo {
    title: Option<String>,
    subtitle: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    publisher: Option<String>,
    published_date: Option<String>,
    description: Option<String>,
    #[serde(default)]
    industry_identifiers: Vec<IndustryIdentifier>,
    page_count: Option<i32>,
    print_type: Option<String>,
    #[serde(default)]
    categories: Vec<String>,
    language: Option<String>,
    preview_link: Option<String>,
    info_link: Option<String>,
    image_links: Option<ImageLinks>,
}

#[derive(Deserialize, Debug)]
struct IndustryIdentifier {
    #[serde(rename = "type")]
    kind: String,
    identifier: String,
}

#[derive(Deserialize, Debug)]
struct ImageLinks {
    thumbnail: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct SaleInfo {
    country: Option<String>,
    list_price: Option<ListPrice>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ListPrice {
    amount: Option<f64>,
    currency_code: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Deserialize, Debug)]
struct ErrorBody {
    message: Option<String>,
}

impl BookItem {
    fn into_candidate(self) -> VolumeCandidate {
        let info = self.volume_info;
        let identifier = |kind: &str| {
            info.industry_identifiers
                .iter()
                .find(|id| id.kind == kind)
                .map(|id| id.identifier.clone())
        };
        let isbn_13 = identifier("ISBN_13");
        let isbn_10 = identifier("ISBN_10");

        VolumeCandidate {
            title: info.title,
            subtitle: info.subtitle,
            authors: info.authors,
            publisher: info.publisher,
            published_date: info.published_date,
            description: info.description,
            isbn_13,
            isbn_10,
            page_count: info.page_count,
            print_type: info.print_type,
            categories: info.categories,
            language: info.language,
            list_price: self.sale_info.list_price.map(|p| Price {
                amount: p.amount,
                currency: p.currency_code,
            }),
            country: self.sale_info.country,
            preview_link: info.preview_link,
            info_link: info.info_link,
            thumbnail_url: info.image_links.and_then(|l| l.thumbnail),
        }
    }
}

/// HTTP client for the Google Books volume search.
///
/// Searches are restricted to English print books, newest first. Refusals
/// (rate limiting, quota, unexpected statuses) are logged and reported as
/// "no page" so a harvest pass can move on.
#[derive(Clone)]
pub struct GoogleBooksClient {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    timeout: Duration,
}

impl GoogleBooksClient {
    /// # Errors
    ///
    /// Returns `AppError::InvalidUrl` if `endpoint` does not parse and
    /// `AppError::ClientError` if the HTTP client cannot be built.
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        config: &HttpConfig,
    ) -> Result<Self, AppError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|_| AppError::InvalidUrl(format!("Invalid Google Books URL: {}", endpoint)))?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::ClientError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            timeout: config.timeout,
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn query_params(&self, query: &VolumeQuery, start_index: u32) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("q", query.terms()),
            ("maxResults", MAX_RESULTS.to_string()),
            ("startIndex", start_index.to_string()),
            ("printType", "books".to_string()),
            ("langRestrict", "en".to_string()),
            ("orderBy", "newest".to_string()),
        ];
        if let Some(key) = &self.api_key {
            params.push(("key", key.clone()));
        }
        params
    }
}

fn log_forbidden(body: &str) {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error)
        .and_then(|e| e.message)
        .unwrap_or_else(|| body_excerpt(body));

    let lower = message.to_lowercase();
    if lower.contains("api key") || lower.contains("quota") {
        warn!(
            message = %message,
            "Google Books refused the request; check GOOGLE_BOOKS_API_KEY and quota"
        );
    } else {
        warn!(message = %message, "Google Books returned 403");
    }
}

#[async_trait]
impl VolumeSource for GoogleBooksClient {
    async fn search(
        &self,
        query: &VolumeQuery,
        start_index: u32,
    ) -> Result<Option<VolumePage>, AppError> {
        let resp = self
            .client
            .get(self.endpoint.clone())
            .query(&self.query_params(query, start_index))
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        let status = resp.status();
        match status {
            StatusCode::OK => {
                let body: VolumesResponse = resp
                    .json()
                    .await
                    .map_err(|e| AppError::ClientError(e.to_string()))?;
                debug!(
                    terms = %query.terms(),
                    start_index,
                    received = body.items.len(),
                    total = body.total_items,
                    "Google Books page fetched"
                );
                Ok(Some(VolumePage {
                    items: body.items.into_iter().map(BookItem::into_candidate).collect(),
                    total_items: body.total_items,
                }))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                warn!(terms = %query.terms(), "Google Books rate limit hit");
                Ok(None)
            }
            StatusCode::FORBIDDEN => {
                log_forbidden(&resp.text().await.unwrap_or_default());
                Ok(None)
            }
            other => {
                let text = resp.text().await.unwrap_or_default();
                warn!(
                    status = other.as_u16(),
                    body = %body_excerpt(&text),
                    "Unexpected Google Books response"
                );
                Ok(None)
            }
        }
    }
}
