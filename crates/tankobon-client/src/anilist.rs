use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tankobon_core::config::HttpConfig;
use tankobon_core::error::AppError;
use tankobon_core::models::{Adaptation, NewSeries, SeriesStatus};
use tankobon_core::ports::{CatalogPage, CatalogSource};
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use crate::{body_excerpt, transport_error, USER_AGENT};

/// Public AniList GraphQL endpoint.
pub const ANILIST_URL: &str = "https://graphql.anilist.co";

const PAGE_QUERY: &str = r#"
query ($page: Int, $perPage: Int) {
  Page(page: $page, perPage: $perPage) {
    pageInfo { hasNextPage total }
    media(type: MANGA, sort: POPULARITY_DESC) {
      id
      title { romaji english native }
      description
      genres
      tags { name }
      staff(perPage: 25) { edges { role node { name { full } } } }
      startDate { year month day }
      endDate { year month day }
      countryOfOrigin
      coverImage { large }
      averageScore
      meanScore
      popularity
      volumes
      chapters
      status
      isAdult
      siteUrl
      relations { edges { relationType node { type title { romaji } } } }
    }
  }
}
"#;

#[derive(Deserialize, Debug)]
struct GraphQlResponse {
    data: Option<PageData>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Deserialize, Debug)]
struct GraphQlError {
    message: Option<String>,
}

#[derive(Deserialize, Debug)]
struct PageData {
    #[serde(rename = "Page")]
    page: MediaPage,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct MediaPage {
    page_info: PageInfo,
    #[serde(default)]
    media: Vec<AniListMedia>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    #[serde(default)]
    has_next_page: bool,
    total: Option<i64>,
}

/// A manga entry as returned by the AniList `Page.media` query.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AniListMedia {
    pub id: i64,
    pub title: Option<MediaTitle>,
    pub description: Option<String>,
    pub genres: Option<Vec<String>>,
    pub tags: Option<Vec<MediaTag>>,
    pub staff: Option<StaffConnection>,
    pub start_date: Option<FuzzyDate>,
    pub end_date: Option<FuzzyDate>,
    pub country_of_origin: Option<String>,
    pub cover_image: Option<CoverImage>,
    pub average_score: Option<i32>,
    pub mean_score: Option<i32>,
    pub popularity: Option<i64>,
    pub volumes: Option<i32>,
    pub chapters: Option<i32>,
    pub status: Option<String>,
    pub is_adult: Option<bool>,
    pub site_url: Option<String>,
    pub relations: Option<RelationConnection>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct MediaTitle {
    pub romaji: Option<String>,
    pub english: Option<String>,
    pub native: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MediaTag {
    pub name: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StaffConnection {
    #[serde(default)]
    pub edges: Vec<StaffEdge>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StaffEdge {
    pub role: Option<String>,
    pub node: Option<StaffNode>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StaffNode {
    pub name: Option<StaffName>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StaffName {
    pub full: Option<String>,
}

/// AniList date whose month and day may be unknown.
#[derive(Deserialize, Debug, Clone, Copy)]
pub struct FuzzyDate {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

impl FuzzyDate {
    /// Missing month or day default to 1; no year means no date.
    pub fn to_date(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year?, self.month.unwrap_or(1), self.day.unwrap_or(1))
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct CoverImage {
    pub large: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RelationConnection {
    #[serde(default)]
    pub edges: Vec<RelationEdge>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RelationEdge {
    pub relation_type: Option<String>,
    pub node: Option<RelationNode>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RelationNode {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub title: Option<MediaTitle>,
}

/// HTTP client for the AniList GraphQL API.
///
/// Pages through the manga catalog by descending popularity. Rate-limited
/// responses are retried after the advertised `Retry-After` delay, a bounded
/// number of times.
///
/// # Examples
///
/// ```no_run
/// use tankobon_client::AniListClient;
/// use tankobon_core::config::HttpConfig;
/// use tankobon_core::ports::CatalogSource;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = AniListClient::new(tankobon_client::anilist::ANILIST_URL, &HttpConfig::default())?;
/// let page = client.fetch_page(1, 50).await?;
/// println!("{} series, more: {}", page.series.len(), page.has_next_page);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AniListClient {
    client: Client,
    endpoint: Url,
    timeout: Duration,
    max_retries: u32,
    default_retry_after: Duration,
}

impl AniListClient {
    /// # Errors
    ///
    /// Returns `AppError::InvalidUrl` if `endpoint` does not parse and
    /// `AppError::ClientError` if the HTTP client cannot be built.
    pub fn new(endpoint: &str, config: &HttpConfig) -> Result<Self, AppError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|_| AppError::InvalidUrl(format!("Invalid AniList URL: {}", endpoint)))?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::ClientError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            timeout: config.timeout,
            max_retries: config.max_retries,
            default_retry_after: config.default_retry_after,
        })
    }

    async fn post_page_query(&self, page: u32, per_page: u32) -> Result<GraphQlResponse, AppError> {
        let body = json!({
            "query": PAGE_QUERY,
            "variables": { "page": page, "perPage": per_page },
        });

        let mut attempt = 0;
        loop {
            let resp = self
                .client
                .post(self.endpoint.clone())
                .json(&body)
                .send()
                .await
                .map_err(|e| transport_error(e, self.timeout))?;

            let status = resp.status();
            if status.is_success() {
                return resp
                    .json()
                    .await
                    .map_err(|e| AppError::ClientError(e.to_string()));
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt >= self.max_retries {
                    return Err(AppError::RateLimitExceeded);
                }
                attempt += 1;
                let wait = retry_after(resp.headers()).unwrap_or(self.default_retry_after);
                warn!(
                    page,
                    attempt,
                    wait_secs = wait.as_secs(),
                    "Rate limited by AniList, retrying"
                );
                sleep(wait).await;
                continue;
            }

            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::ClientError(format!(
                "AniList HTTP {}: {}",
                status.as_u16(),
                body_excerpt(&text)
            )));
        }
    }

    /// Converts an AniList media entry into the domain's `NewSeries`.
    ///
    /// Staff credited for story or as original creator become authors,
    /// art credits become artists, adaptation and alternative relations are
    /// kept as adaptations.
    pub fn into_new_series(media: AniListMedia) -> NewSeries {
        let mut authors = Vec::new();
        let mut artists = Vec::new();
        for edge in media.staff.map(|s| s.edges).unwrap_or_default() {
            let role = edge.role.unwrap_or_default().to_lowercase();
            let Some(name) = edge.node.and_then(|n| n.name).and_then(|n| n.full) else {
                continue;
            };
            if role.contains("story") || role.contains("original creator") {
                authors.push(name);
            } else if role.contains("art") {
                artists.push(name);
            }
        }

        let adaptations = media
            .relations
            .map(|r| r.edges)
            .unwrap_or_default()
            .into_iter()
            .filter(|edge| {
                matches!(
                    edge.relation_type.as_deref(),
                    Some("ADAPTATION") | Some("ALTERNATIVE")
                )
            })
            .map(|edge| {
                let node = edge.node;
                Adaptation {
                    kind: node.as_ref().and_then(|n| n.kind.clone()),
                    title: node.and_then(|n| n.title).and_then(|t| t.romaji),
                }
            })
            .collect();

        let title = media.title.unwrap_or_default();
        NewSeries {
            external_id: media.id,
            title_romaji: title.romaji,
            title_english: title.english,
            title_native: title.native,
            description: media.description,
            authors,
            artists,
            genres: media.genres.unwrap_or_default(),
            tags: media
                .tags
                .unwrap_or_default()
                .into_iter()
                .map(|t| t.name)
                .collect(),
            start_date: media.start_date.and_then(FuzzyDate::to_date),
            end_date: media.end_date.and_then(FuzzyDate::to_date),
            status: SeriesStatus::from(media.status.unwrap_or_default()),
            country_of_origin: media.country_of_origin,
            total_volumes: media.volumes,
            total_chapters: media.chapters,
            average_score: media.average_score,
            mean_score: media.mean_score,
            is_adult: media.is_adult.unwrap_or(false),
            popularity: media.popularity,
            cover_image_url: media.cover_image.and_then(|c| c.large),
            cover_image_key: None,
            site_url: media.site_url,
            adaptations,
        }
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
        .map(Duration::from_secs)
}

fn into_catalog_page(response: GraphQlResponse) -> Result<CatalogPage, AppError> {
    if let Some(first) = response.errors.and_then(|e| e.into_iter().next()) {
        return Err(AppError::CatalogApiError(
            first
                .message
                .unwrap_or_else(|| "Unknown GraphQL error".to_string()),
        ));
    }
    let page = response
        .data
        .ok_or_else(|| AppError::CatalogApiError("response without data".to_string()))?
        .page;

    Ok(CatalogPage {
        series: page
            .media
            .into_iter()
            .map(AniListClient::into_new_series)
            .collect(),
        has_next_page: page.page_info.has_next_page,
        total: page.page_info.total,
    })
}

#[async_trait]
impl CatalogSource for AniListClient {
    async fn fetch_page(&self, page: u32, per_page: u32) -> Result<CatalogPage, AppError> {
        let response = self.post_page_query(page, per_page).await?;
        let catalog_page = into_catalog_page(response)?;
        debug!(
            page,
            received = catalog_page.series.len(),
            has_next = catalog_page.has_next_page,
            "AniList page fetched"
        );
        Ok(catalog_page)
    }
}
