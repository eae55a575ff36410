//! Traits for the collaborators the drivers talk to.
//!
//! The HTTP adapters live in `tankobon-client`, the PostgreSQL and
//! filesystem implementations in `tankobon-db`. Tests plug in in-memory
//! fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::{
    NewSeries, NewVolume, SeriesRecord, SeriesVolumeSummary, VolumeCandidate, VolumeRecord,
};

/// One page of the remote series catalog.
#[derive(Debug, Clone, Default)]
pub struct CatalogPage {
    pub series: Vec<NewSeries>,
    pub has_next_page: bool,
    pub total: Option<i64>,
}

#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_page(&self, page: u32, per_page: u32) -> Result<CatalogPage, AppError>;
}

/// Keyword query sent to the volume source.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeQuery {
    pub title: String,
    pub author: Option<String>,
}

impl VolumeQuery {
    /// Free-text query string: the title, followed by the author when known.
    pub fn terms(&self) -> String {
        match &self.author {
            Some(author) => format!("{} {}", self.title, author),
            None => self.title.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VolumePage {
    pub items: Vec<VolumeCandidate>,
    pub total_items: i64,
}

#[async_trait]
pub trait VolumeSource: Send + Sync {
    /// `Ok(None)` means the source has nothing more to give for now
    /// (quota exhausted, rate limited, request refused).
    async fn search(
        &self,
        query: &VolumeQuery,
        start_index: u32,
    ) -> Result<Option<VolumePage>, AppError>;
}

#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[async_trait]
pub trait ImageSource: Send + Sync {
    /// `None` when the image could not be downloaded.
    async fn fetch(&self, url: &str) -> Option<FetchedImage>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), AppError>;
    async fn delete(&self, key: &str) -> Result<(), AppError>;
}

#[async_trait]
pub trait SeriesStore: Send + Sync {
    async fn find_series_id(&self, external_id: i64) -> Result<Option<i64>, AppError>;

    async fn count_series(&self) -> Result<i64, AppError>;

    async fn insert_series(&self, series: &NewSeries) -> Result<i64, AppError>;

    async fn update_series(&self, id: i64, series: &NewSeries) -> Result<(), AppError>;

    /// Series among the `top_n` most popular whose last volume check is
    /// missing or older than `checked_before`.
    ///
    /// Ordered releasing first, then never checked, then by popularity.
    async fn series_due_for_volume_check(
        &self,
        top_n: i64,
        checked_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SeriesRecord>, AppError>;

    async fn mark_volumes_checked(&self, series_id: i64) -> Result<(), AppError>;
}

#[async_trait]
pub trait VolumeStore: Send + Sync {
    async fn volume_exists(&self, series_id: i64, isbn_13: &str) -> Result<bool, AppError>;

    /// Returns `false` when the row already existed.
    async fn insert_volume(&self, series_id: i64, volume: &NewVolume) -> Result<bool, AppError>;

    /// Series holding at least `min_volumes` volumes, most volumes first.
    async fn series_with_volumes(
        &self,
        min_volumes: i64,
    ) -> Result<Vec<SeriesVolumeSummary>, AppError>;

    /// Ordered by volume number (nulls last), then published date.
    async fn volumes_for_series(&self, series_id: i64) -> Result<Vec<VolumeRecord>, AppError>;

    async fn delete_volumes(&self, ids: &[i64]) -> Result<u64, AppError>;
}

#[async_trait]
pub trait PublisherDirectory: Send + Sync {
    async fn trusted_publishers(&self) -> Result<Vec<String>, AppError>;
}

/// Everything the drivers need from the relational store.
pub trait CatalogStore: SeriesStore + VolumeStore + PublisherDirectory {}

impl<T: SeriesStore + VolumeStore + PublisherDirectory + ?Sized> CatalogStore for T {}
