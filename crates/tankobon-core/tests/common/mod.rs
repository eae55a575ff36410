//! In-memory implementations of every port, shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use tankobon_core::{
    AppError, CatalogPage, CatalogSource, Clock, FetchedImage, HarvestConfig, HarvestPorts,
    Harvester, ImageSource, InMemoryStateStore, NewSeries, NewVolume, ObjectStore,
    PublisherDirectory, RateGovernor, RunFlag, SeriesRecord, SeriesStatus, SeriesStore,
    SeriesVolumeSummary, ServiceLimit, VolumeCandidate, VolumePage, VolumeQuery, VolumeRecord,
    VolumeSource, VolumeStore, CATALOG_SERVICE, VOLUME_SERVICE,
};

// =============================================================================
// Clock
// =============================================================================

/// Clock that only moves when something sleeps on it.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
    slept: Arc<Mutex<Vec<Duration>>>,
    stop_when_idle: Arc<Mutex<Option<RunFlag>>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap())),
            slept: Arc::new(Mutex::new(Vec::new())),
            stop_when_idle: Arc::new(Mutex::new(None)),
        }
    }

    /// Clears `flag` on the first one-minute idle step.
    pub fn stop_when_idle(&self, flag: RunFlag) {
        *self.stop_when_idle.lock().unwrap() = Some(flag);
    }

    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
        *self.now.lock().unwrap() += TimeDelta::from_std(duration).unwrap();
        if duration == Duration::from_secs(60) {
            if let Some(flag) = self.stop_when_idle.lock().unwrap().as_ref() {
                flag.stop();
            }
        }
    }
}

// =============================================================================
// Remote sources
// =============================================================================

#[derive(Default)]
pub struct FakeCatalog {
    pub pages: HashMap<u32, CatalogPage>,
    pub failing: Vec<u32>,
    pub requested: Mutex<Vec<u32>>,
}

#[async_trait]
impl CatalogSource for FakeCatalog {
    async fn fetch_page(&self, page: u32, _per_page: u32) -> Result<CatalogPage, AppError> {
        self.requested.lock().unwrap().push(page);
        if self.failing.contains(&page) {
            return Err(AppError::ClientError("HTTP 500".to_string()));
        }
        Ok(self.pages.get(&page).cloned().unwrap_or_default())
    }
}

/// Volume source answering by `(title, start_index)`.
#[derive(Default)]
pub struct FakeVolumes {
    pub pages: HashMap<(String, u32), Option<VolumePage>>,
    pub queries: Mutex<Vec<(VolumeQuery, u32)>>,
}

impl FakeVolumes {
    pub fn with_page(mut self, title: &str, start: u32, items: Vec<VolumeCandidate>, total: i64) -> Self {
        self.pages.insert(
            (title.to_string(), start),
            Some(VolumePage {
                items,
                total_items: total,
            }),
        );
        self
    }

    pub fn calls(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl VolumeSource for FakeVolumes {
    async fn search(
        &self,
        query: &VolumeQuery,
        start_index: u32,
    ) -> Result<Option<VolumePage>, AppError> {
        self.queries
            .lock()
            .unwrap()
            .push((query.clone(), start_index));
        Ok(self
            .pages
            .get(&(query.title.clone(), start_index))
            .cloned()
            .flatten())
    }
}

#[derive(Default)]
pub struct FakeImages {
    pub broken: bool,
}

#[async_trait]
impl ImageSource for FakeImages {
    async fn fetch(&self, url: &str) -> Option<FetchedImage> {
        if self.broken {
            return None;
        }
        Some(FetchedImage {
            bytes: url.as_bytes().to_vec(),
            content_type: "image/jpeg".to_string(),
        })
    }
}

#[derive(Default)]
pub struct MemoryObjects {
    pub objects: Mutex<BTreeMap<String, Vec<u8>>>,
    pub fail_deletes: bool,
}

impl MemoryObjects {
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjects {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<(), AppError> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        if self.fail_deletes {
            return Err(AppError::ObjectStoreError(format!("cannot delete {}", key)));
        }
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}

// =============================================================================
// Relational store
// =============================================================================

#[derive(Debug, Clone)]
pub struct StoredSeries {
    pub id: i64,
    pub data: NewSeries,
    pub last_checked: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct StoredVolume {
    pub id: i64,
    pub series_id: i64,
    pub data: NewVolume,
}

#[derive(Default)]
pub struct MemoryStore {
    pub series: Mutex<Vec<StoredSeries>>,
    pub volumes: Mutex<Vec<StoredVolume>>,
    pub publishers: Vec<String>,
}

impl MemoryStore {
    pub fn with_publishers(names: &[&str]) -> Self {
        Self {
            publishers: names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn seed_series(&self, data: NewSeries, last_checked: Option<DateTime<Utc>>) -> i64 {
        let mut series = self.series.lock().unwrap();
        let id = series.len() as i64 + 1;
        series.push(StoredSeries {
            id,
            data,
            last_checked,
        });
        id
    }

    pub fn seed_volume(&self, series_id: i64, data: NewVolume) -> i64 {
        let mut volumes = self.volumes.lock().unwrap();
        let id = volumes.iter().map(|v| v.id).max().unwrap_or(0) + 1;
        volumes.push(StoredVolume {
            id,
            series_id,
            data,
        });
        id
    }

    pub fn series_count(&self) -> usize {
        self.series.lock().unwrap().len()
    }

    pub fn volumes_of(&self, series_id: i64) -> Vec<NewVolume> {
        self.volumes
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.series_id == series_id)
            .map(|v| v.data.clone())
            .collect()
    }

    pub fn last_checked(&self, series_id: i64) -> Option<DateTime<Utc>> {
        self.series
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == series_id)
            .and_then(|s| s.last_checked)
    }

    fn record(stored: &StoredSeries) -> SeriesRecord {
        SeriesRecord {
            id: stored.id,
            external_id: stored.data.external_id,
            title_romaji: stored.data.title_romaji.clone(),
            title_english: stored.data.title_english.clone(),
            authors: stored.data.authors.clone(),
            status: stored.data.status.clone(),
            total_volumes: stored.data.total_volumes,
            popularity: stored.data.popularity,
            last_checked_for_volumes: stored.last_checked,
        }
    }
}

#[async_trait]
impl SeriesStore for MemoryStore {
    async fn find_series_id(&self, external_id: i64) -> Result<Option<i64>, AppError> {
        Ok(self
            .series
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.data.external_id == external_id)
            .map(|s| s.id))
    }

    async fn count_series(&self) -> Result<i64, AppError> {
        Ok(self.series_count() as i64)
    }

    async fn insert_series(&self, series: &NewSeries) -> Result<i64, AppError> {
        Ok(self.seed_series(series.clone(), None))
    }

    async fn update_series(&self, id: i64, series: &NewSeries) -> Result<(), AppError> {
        let mut all = self.series.lock().unwrap();
        let stored = all
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| AppError::Generic(format!("no series {}", id)))?;
        stored.data = series.clone();
        Ok(())
    }

    async fn series_due_for_volume_check(
        &self,
        top_n: i64,
        checked_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SeriesRecord>, AppError> {
        let mut top: Vec<StoredSeries> = self.series.lock().unwrap().clone();
        top.sort_by_key(|s| std::cmp::Reverse(s.data.popularity.unwrap_or(0)));
        top.truncate(top_n as usize);

        let mut due: Vec<StoredSeries> = top
            .into_iter()
            .filter(|s| s.data.status.is_trackable())
            .filter(|s| s.last_checked.is_none_or(|t| t < checked_before))
            .collect();
        due.sort_by_key(|s| {
            (
                s.data.status != SeriesStatus::Releasing,
                s.last_checked.is_some(),
                std::cmp::Reverse(s.data.popularity.unwrap_or(0)),
            )
        });
        due.truncate(limit as usize);
        Ok(due.iter().map(Self::record).collect())
    }

    async fn mark_volumes_checked(&self, series_id: i64) -> Result<(), AppError> {
        let mut all = self.series.lock().unwrap();
        if let Some(stored) = all.iter_mut().find(|s| s.id == series_id) {
            stored.last_checked = Some(Utc::now());
        }
        Ok(())
    }
}

#[async_trait]
impl VolumeStore for MemoryStore {
    async fn volume_exists(&self, series_id: i64, isbn_13: &str) -> Result<bool, AppError> {
        Ok(self
            .volumes
            .lock()
            .unwrap()
            .iter()
            .any(|v| v.series_id == series_id && v.data.isbn_13.as_deref() == Some(isbn_13)))
    }

    async fn insert_volume(&self, series_id: i64, volume: &NewVolume) -> Result<bool, AppError> {
        if let Some(isbn) = volume.isbn_13.as_deref() {
            if self.volume_exists(series_id, isbn).await? {
                return Ok(false);
            }
        }
        self.seed_volume(series_id, volume.clone());
        Ok(true)
    }

    async fn series_with_volumes(
        &self,
        min_volumes: i64,
    ) -> Result<Vec<SeriesVolumeSummary>, AppError> {
        let volumes = self.volumes.lock().unwrap();
        let mut summaries: Vec<SeriesVolumeSummary> = self
            .series
            .lock()
            .unwrap()
            .iter()
            .map(|s| SeriesVolumeSummary {
                id: s.id,
                title: s
                    .data
                    .title_english
                    .clone()
                    .or_else(|| s.data.title_romaji.clone())
                    .unwrap_or_default(),
                volume_count: volumes.iter().filter(|v| v.series_id == s.id).count() as i64,
            })
            .filter(|s| s.volume_count >= min_volumes)
            .collect();
        summaries.sort_by_key(|s| std::cmp::Reverse(s.volume_count));
        Ok(summaries)
    }

    async fn volumes_for_series(&self, series_id: i64) -> Result<Vec<VolumeRecord>, AppError> {
        Ok(self
            .volumes
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.series_id == series_id)
            .map(|v| VolumeRecord {
                id: v.id,
                series_id: v.series_id,
                title: Some(v.data.title.clone()),
                publisher: v.data.publisher.clone(),
                isbn_13: v.data.isbn_13.clone(),
                volume_number: v.data.volume_number,
                thumbnail_key: v.data.thumbnail_key.clone(),
            })
            .collect())
    }

    async fn delete_volumes(&self, ids: &[i64]) -> Result<u64, AppError> {
        let mut volumes = self.volumes.lock().unwrap();
        let before = volumes.len();
        volumes.retain(|v| !ids.contains(&v.id));
        Ok((before - volumes.len()) as u64)
    }
}

#[async_trait]
impl PublisherDirectory for MemoryStore {
    async fn trusted_publishers(&self) -> Result<Vec<String>, AppError> {
        Ok(self.publishers.clone())
    }
}

// =============================================================================
// Builders
// =============================================================================

pub fn series(external_id: i64, english: &str) -> NewSeries {
    NewSeries {
        external_id,
        title_romaji: Some(english.to_string()),
        title_english: Some(english.to_string()),
        title_native: None,
        description: None,
        authors: Vec::new(),
        artists: Vec::new(),
        genres: Vec::new(),
        tags: Vec::new(),
        start_date: None,
        end_date: None,
        status: SeriesStatus::Releasing,
        country_of_origin: Some("JP".to_string()),
        total_volumes: None,
        total_chapters: None,
        average_score: None,
        mean_score: None,
        is_adult: false,
        popularity: Some(50_000),
        cover_image_url: None,
        cover_image_key: None,
        site_url: None,
        adaptations: Vec::new(),
    }
}

pub fn candidate(title: &str, publisher: &str, isbn_13: &str) -> VolumeCandidate {
    VolumeCandidate {
        title: Some(title.to_string()),
        authors: Vec::new(),
        publisher: Some(publisher.to_string()),
        isbn_13: Some(isbn_13.to_string()),
        print_type: Some("BOOK".to_string()),
        categories: vec!["Comics & Graphic Novels".to_string()],
        thumbnail_url: Some(format!("https://books.example/{}.jpg", isbn_13)),
        ..VolumeCandidate::default()
    }
}

pub fn instant_limits() -> HashMap<String, ServiceLimit> {
    [CATALOG_SERVICE, VOLUME_SERVICE]
        .into_iter()
        .map(|service| {
            (
                service.to_string(),
                ServiceLimit {
                    max_requests: 1000,
                    period: TimeDelta::hours(24),
                    delay: Duration::ZERO,
                },
            )
        })
        .collect()
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub objects: Arc<MemoryObjects>,
    pub volumes: Arc<FakeVolumes>,
    pub catalog: Arc<FakeCatalog>,
    pub clock: ManualClock,
    pub running: RunFlag,
}

impl Fixture {
    pub fn new(store: MemoryStore, catalog: FakeCatalog, volumes: FakeVolumes) -> Self {
        Self {
            store: Arc::new(store),
            objects: Arc::new(MemoryObjects::default()),
            volumes: Arc::new(volumes),
            catalog: Arc::new(catalog),
            clock: ManualClock::new(),
            running: RunFlag::new(),
        }
    }

    pub async fn harvester(
        &self,
        config: HarvestConfig,
    ) -> Harvester<InMemoryStateStore, ManualClock> {
        let ports = HarvestPorts {
            catalog: self.catalog.clone(),
            volumes: self.volumes.clone(),
            images: Arc::new(FakeImages::default()),
            objects: self.objects.clone(),
            store: self.store.clone(),
        };
        let governor = RateGovernor::new(
            InMemoryStateStore::default(),
            self.clock.clone(),
            instant_limits(),
        )
        .unwrap();
        Harvester::new(ports, governor, config, self.running.clone())
            .await
            .unwrap()
    }
}
