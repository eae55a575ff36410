//! Ingestion driver: pulls series from the catalog source and their print
//! volumes from the volume source into the relational store.
//!
//! Every step is awaited in order. A rate-limit wait therefore holds up the
//! whole driver, and remote items are processed in the order the sources
//! deliver them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tracing::{debug, error, info, warn};

use crate::acceptance::VolumeAcceptanceFilter;
use crate::bound::{CatalogBoundEnforcer, SeriesUpsert};
use crate::config::HarvestConfig;
use crate::error::AppError;
use crate::matching::PublisherCatalog;
use crate::media::{cover_key, mirror_image, volume_key};
use crate::models::{NewSeries, NewVolume, SeriesRecord, VolumeCandidate, VolumeTarget};
use crate::ports::{
    CatalogSource, CatalogStore, ImageSource, ObjectStore, VolumeQuery, VolumeSource,
};
use crate::rate_limit::{Clock, RateGovernor, RateStateStore, CATALOG_SERVICE, VOLUME_SERVICE};
use crate::sync::{HarvestStats, SeriesOutcome, VolumeOutcome, VolumeStats};

/// Page size of volume searches.
pub const VOLUME_PAGE_SIZE: u32 = 40;

/// Extra volumes searched beyond the declared count, for special editions.
const VOLUME_SEARCH_MARGIN: u32 = 20;

const IDLE_STEP: Duration = Duration::from_secs(60);
const RETRY_AFTER_FAILED_CYCLE: Duration = Duration::from_secs(300);

/// Shared "keep running" switch, cleared on shutdown.
///
/// Polled between pages, between series and between idle steps; work that
/// already started is allowed to finish.
#[derive(Debug, Clone)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// The external collaborators of the [`Harvester`].
#[derive(Clone)]
pub struct HarvestPorts {
    pub catalog: Arc<dyn CatalogSource>,
    pub volumes: Arc<dyn VolumeSource>,
    pub images: Arc<dyn ImageSource>,
    pub objects: Arc<dyn ObjectStore>,
    pub store: Arc<dyn CatalogStore>,
}

pub struct Harvester<S: RateStateStore, C: Clock> {
    ports: HarvestPorts,
    governor: RateGovernor<S, C>,
    publishers: PublisherCatalog,
    filter: VolumeAcceptanceFilter,
    enforcer: CatalogBoundEnforcer,
    config: HarvestConfig,
    running: RunFlag,
}

impl<S: RateStateStore, C: Clock> Harvester<S, C> {
    /// Builds the driver and takes the snapshot of trusted publishers used
    /// for the rest of the process lifetime.
    pub async fn new(
        ports: HarvestPorts,
        governor: RateGovernor<S, C>,
        config: HarvestConfig,
        running: RunFlag,
    ) -> Result<Self, AppError> {
        let publishers = PublisherCatalog::new(ports.store.trusted_publishers().await?);
        if publishers.is_empty() {
            warn!("No trusted publishers stored, publisher validation disabled");
        } else {
            info!(count = publishers.len(), "Loaded trusted publishers");
        }

        Ok(Self {
            enforcer: CatalogBoundEnforcer::new(config.series_cap),
            filter: VolumeAcceptanceFilter::default(),
            ports,
            governor,
            publishers,
            config,
            running,
        })
    }

    pub fn publishers(&self) -> &PublisherCatalog {
        &self.publishers
    }

    pub fn governor(&self) -> &RateGovernor<S, C> {
        &self.governor
    }

    /// Walks the catalog by popularity until the series cap is reached.
    pub async fn initial_harvest(&mut self) -> Result<HarvestStats, AppError> {
        let cap = self.config.series_cap;
        let per_page = self.config.per_page;
        let pages = u32::try_from(cap)
            .map_err(|_| AppError::ConfigError(format!("series_cap out of range: {}", cap)))?
            .div_ceil(per_page);
        let mut stats = HarvestStats::new();

        info!(cap, pages, "Starting initial harvest");

        'pages: for page in 1..=pages {
            if !self.running.is_running() {
                break;
            }
            if !self.enforcer.has_capacity(&*self.ports.store).await? {
                info!(cap, "Series cap reached, stopping initial harvest");
                break;
            }

            self.governor.acquire(CATALOG_SERVICE).await?;
            let catalog_page = match self.ports.catalog.fetch_page(page, per_page).await {
                Ok(p) => p,
                Err(e) => {
                    error!(page, error = %e, "Failed to fetch catalog page");
                    stats.pages_failed += 1;
                    continue;
                }
            };
            info!(page, pages, series = catalog_page.series.len(), "Fetched catalog page");

            for series in catalog_page.series {
                if !self.running.is_running() {
                    break 'pages;
                }
                if !self.enforcer.has_capacity(&*self.ports.store).await? {
                    info!(cap, "Series cap reached, stopping initial harvest");
                    break 'pages;
                }
                self.harvest_series(series, &mut stats).await;
            }

            if !catalog_page.has_next_page {
                break;
            }
        }

        info!(
            created = stats.created,
            updated = stats.updated,
            failed = stats.failed,
            volumes = stats.volumes.added,
            "Initial harvest complete"
        );
        Ok(stats)
    }

    async fn harvest_series(&mut self, mut series: NewSeries, stats: &mut HarvestStats) {
        let external_id = series.external_id;
        debug!(external_id, title = series.display_title(), "Processing series");

        let upsert = match self.store_series(&mut series).await {
            Ok(upsert) => upsert,
            Err(e) => {
                error!(external_id, error = %e, "Failed to store series");
                stats.record(SeriesOutcome::Failed);
                return;
            }
        };

        let id = match upsert {
            SeriesUpsert::Inserted(id) => {
                stats.record(SeriesOutcome::Created);
                id
            }
            SeriesUpsert::Updated(id) => {
                stats.record(SeriesOutcome::Updated);
                id
            }
            SeriesUpsert::Rejected => {
                stats.record(SeriesOutcome::Capped);
                return;
            }
        };

        if !series.has_english_release() {
            return;
        }
        if let Some(target) = VolumeTarget::from_new_series(&series) {
            match self.check_for_new_volumes(id, &target).await {
                Ok(volumes) => stats.record_volumes(&volumes),
                Err(e) => error!(series_id = id, error = %e, "Volume check failed"),
            }
        }
    }

    /// Mirrors the cover of a series not stored yet, then inserts or
    /// updates it under the cap.
    async fn store_series(&mut self, series: &mut NewSeries) -> Result<SeriesUpsert, AppError> {
        let known = self
            .ports
            .store
            .find_series_id(series.external_id)
            .await?
            .is_some();

        if !known {
            if let Some(url) = series.cover_image_url.clone() {
                let key = cover_key(series.external_id, &url, self.governor.clock().now());
                series.cover_image_key =
                    mirror_image(&*self.ports.images, &*self.ports.objects, &url, &key).await;
            }
        }

        self.enforcer
            .try_insert_series(&*self.ports.store, series)
            .await
    }

    /// Searches the volume source for `target` and stores every accepted
    /// volume. The series is marked as checked afterwards, whatever the
    /// outcome of the individual candidates, unless the run flag cleared
    /// midway.
    pub async fn check_for_new_volumes(
        &mut self,
        series_id: i64,
        target: &VolumeTarget,
    ) -> Result<VolumeStats, AppError> {
        let max_volumes = self.volume_search_depth(target.expected_volumes);
        let query = VolumeQuery {
            title: target.search_title.clone(),
            author: target.author.clone(),
        };
        debug!(
            series_id,
            title = %query.title,
            expected = ?target.expected_volumes,
            max_volumes,
            "Searching volumes"
        );

        let candidates = self.collect_volume_candidates(&query, max_volumes).await?;
        let mut stats = VolumeStats::new();
        for candidate in candidates {
            if !self.running.is_running() {
                break;
            }
            let outcome = self.store_candidate(series_id, target, candidate).await;
            stats.record(outcome);
        }

        if !self.running.is_running() {
            info!(series_id, added = stats.added, "Volume check interrupted, series stays due");
            return Ok(stats);
        }
        if stats.publisher_skipped > 0 {
            info!(
                series_id,
                skipped = stats.publisher_skipped,
                "Skipped volumes with unrecognized publishers"
            );
        }
        self.ports.store.mark_volumes_checked(series_id).await?;
        info!(
            series_id,
            added = stats.added,
            examined = stats.total(),
            "Volume check complete"
        );
        Ok(stats)
    }

    /// How far to page through the volume source for a series.
    pub fn volume_search_depth(&self, expected_volumes: Option<i32>) -> u32 {
        match expected_volumes.and_then(|n| u32::try_from(n).ok()).filter(|n| *n > 0) {
            Some(n) => n
                .saturating_add(VOLUME_SEARCH_MARGIN)
                .min(self.config.volume_search_ceiling),
            None => self.config.max_volume_search,
        }
    }

    /// Pages through the volume source until it runs dry, a short page
    /// arrives, the advertised total is reached or `max_volumes` is hit.
    pub async fn collect_volume_candidates(
        &mut self,
        query: &VolumeQuery,
        max_volumes: u32,
    ) -> Result<Vec<VolumeCandidate>, AppError> {
        let mut collected = Vec::new();
        let mut start_index = 0;

        while start_index < max_volumes {
            if !self.running.is_running() {
                debug!(title = %query.title, start_index, "Stopping volume search");
                break;
            }
            self.governor.acquire(VOLUME_SERVICE).await?;
            let page = match self.ports.volumes.search(query, start_index).await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(e) => {
                    warn!(title = %query.title, start_index, error = %e, "Volume search failed");
                    break;
                }
            };
            if page.items.is_empty() {
                break;
            }

            let received = page.items.len();
            collected.extend(page.items);
            if collected.len() as i64 >= page.total_items || received < VOLUME_PAGE_SIZE as usize {
                break;
            }
            start_index += VOLUME_PAGE_SIZE;
        }

        debug!(title = %query.title, found = collected.len(), "Volume candidates collected");
        Ok(collected)
    }

    async fn store_candidate(
        &mut self,
        series_id: i64,
        target: &VolumeTarget,
        candidate: VolumeCandidate,
    ) -> VolumeOutcome {
        if let Err(reason) =
            self.filter
                .evaluate(&candidate, &target.search_title, target.author.as_deref())
        {
            debug!(series_id, title = ?candidate.title, %reason, "Volume candidate rejected");
            return VolumeOutcome::Filtered;
        }
        let Some(mut volume) = NewVolume::from_candidate(candidate) else {
            return VolumeOutcome::Filtered;
        };

        if let Some(publisher) = volume.publisher.as_deref().filter(|p| !p.is_empty()) {
            if !self.publishers.is_empty() {
                match self
                    .publishers
                    .best_match(publisher, self.config.publisher_match_threshold)
                {
                    Some(found) => {
                        debug!(publisher, matched = %found.matched_name, score = found.score, "Publisher matched");
                        volume.publisher = Some(found.matched_name);
                    }
                    None => {
                        debug!(series_id, publisher, "Publisher not trusted, skipping volume");
                        return VolumeOutcome::PublisherSkipped;
                    }
                }
            }
        }

        if let Some(isbn_13) = volume.isbn_13.as_deref() {
            match self.ports.store.volume_exists(series_id, isbn_13).await {
                Ok(true) => return VolumeOutcome::Duplicate,
                Ok(false) => {}
                Err(e) => {
                    warn!(series_id, isbn_13, error = %e, "Duplicate check failed");
                    return VolumeOutcome::Failed;
                }
            }
        }

        if let Some(url) = volume.thumbnail_url.clone() {
            let key = volume_key(
                volume.isbn_13.as_deref(),
                &volume.title,
                &url,
                self.governor.clock().now(),
            );
            volume.thumbnail_key =
                mirror_image(&*self.ports.images, &*self.ports.objects, &url, &key).await;
        }

        match self.ports.store.insert_volume(series_id, &volume).await {
            Ok(true) => {
                debug!(series_id, title = %volume.title, "Volume added");
                VolumeOutcome::Added
            }
            Ok(false) => VolumeOutcome::Duplicate,
            Err(e) => {
                warn!(series_id, title = %volume.title, error = %e, "Failed to insert volume");
                VolumeOutcome::Failed
            }
        }
    }

    /// Revisits the stored series that are due for a volume check.
    pub async fn update_pass(&mut self) -> Result<HarvestStats, AppError> {
        let checked_before = TimeDelta::from_std(self.config.update_interval())
            .ok()
            .and_then(|interval| self.governor.clock().now().checked_sub_signed(interval))
            .ok_or_else(|| {
                AppError::ConfigError(format!(
                    "update_interval_hours out of range: {}",
                    self.config.update_interval_hours
                ))
            })?;
        let due = self
            .ports
            .store
            .series_due_for_volume_check(
                self.config.series_cap,
                checked_before,
                self.config.batch_size,
            )
            .await?;
        info!(
            due = due.len(),
            top = self.config.series_cap,
            "Starting update pass"
        );

        let mut stats = HarvestStats::new();
        for record in due {
            if !self.running.is_running() {
                break;
            }
            match self.refresh_series(&record).await {
                Ok(Some(volumes)) => {
                    stats.record(SeriesOutcome::Updated);
                    stats.record_volumes(&volumes);
                }
                Ok(None) => stats.record(SeriesOutcome::Updated),
                Err(e) => {
                    error!(series_id = record.id, error = %e, "Failed to check series");
                    stats.record(SeriesOutcome::Failed);
                }
            }
        }

        info!(
            checked = stats.successful(),
            failed = stats.failed,
            volumes = stats.volumes.added,
            "Update pass complete"
        );
        Ok(stats)
    }

    async fn refresh_series(
        &mut self,
        record: &SeriesRecord,
    ) -> Result<Option<VolumeStats>, AppError> {
        debug!(series_id = record.id, title = record.display_title(), "Checking series");
        if record.has_english_release() {
            if let Some(target) = VolumeTarget::from_record(record) {
                return self.check_for_new_volumes(record.id, &target).await.map(Some);
            }
        }
        self.ports.store.mark_volumes_checked(record.id).await?;
        Ok(None)
    }

    /// Initial harvest when the store is under the cap, then one update pass.
    pub async fn run_once(&mut self) -> Result<HarvestStats, AppError> {
        let mut stats = HarvestStats::new();
        if self.enforcer.has_capacity(&*self.ports.store).await? {
            stats += &self.initial_harvest().await?;
        }
        if self.running.is_running() {
            stats += &self.update_pass().await?;
        }
        Ok(stats)
    }

    /// Harvests until the run flag is cleared: an initial harvest if the
    /// store is under the cap, then an update pass every
    /// `update_interval_hours`.
    pub async fn run_continuous(&mut self) -> HarvestStats {
        let mut total = HarvestStats::new();
        info!(
            cap = self.config.series_cap,
            interval_hours = self.config.update_interval_hours,
            batch_size = self.config.batch_size,
            threshold = self.config.publisher_match_threshold,
            "Harvester running in continuous mode"
        );

        match self.ports.store.count_series().await {
            Ok(count) if count < self.config.series_cap => {
                info!(count, missing = self.config.series_cap - count, "Running initial harvest");
                match self.initial_harvest().await {
                    Ok(stats) => total += &stats,
                    Err(e) => error!(error = %e, "Initial harvest failed"),
                }
            }
            Ok(count) => info!(count, "Series cap already reached, skipping initial harvest"),
            Err(e) => error!(error = %e, "Failed to count stored series"),
        }

        let mut cycle: u64 = 1;
        while self.running.is_running() {
            info!(cycle, "Starting update cycle");
            match self.update_pass().await {
                Ok(stats) => {
                    total += &stats;
                    if self.running.is_running() {
                        let interval = self.config.update_interval();
                        match TimeDelta::from_std(interval)
                            .ok()
                            .and_then(|d| self.governor.clock().now().checked_add_signed(d))
                        {
                            Some(next) => info!(
                                next = %next.format("%Y-%m-%d %H:%M:%S"),
                                "Sleeping until next cycle"
                            ),
                            None => info!(hours = self.config.update_interval_hours, "Sleeping until next cycle"),
                        }
                        self.idle(interval).await;
                    }
                }
                Err(e) => {
                    error!(cycle, error = %e, "Update cycle failed, retrying in 5 minutes");
                    self.idle(RETRY_AFTER_FAILED_CYCLE).await;
                }
            }
            cycle += 1;
        }

        info!("Harvester stopped");
        total
    }

    /// Sleeps in one-minute steps, returning early once the run flag clears.
    async fn idle(&self, duration: Duration) {
        let steps = duration.as_secs() / IDLE_STEP.as_secs();
        for _ in 0..steps {
            if !self.running.is_running() {
                break;
            }
            self.governor.clock().sleep(IDLE_STEP).await;
        }
    }
}
