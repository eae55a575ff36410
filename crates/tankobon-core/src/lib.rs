//! Tankobon Core - domain types, matching engine, rate budgeting and the
//! ingestion and cleanup drivers.

pub mod acceptance;
pub mod bound;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod ingest;
pub mod matching;
pub mod media;
pub mod models;
pub mod outlier;
pub mod ports;
pub mod rate_limit;
pub mod sync;

pub use acceptance::{Rejection, VolumeAcceptanceFilter};
pub use bound::{CatalogBoundEnforcer, SeriesUpsert};
pub use cleanup::{
    CleanupMode, CleanupOptions, CleanupSummary, ReviewDecision, VolumeCleaner,
};
pub use config::{
    default_config_path, load_config, AppConfig, CleanupConfig, DbConfig, HarvestConfig,
    HttpConfig, RateLimitConfig, StorageBackend, StorageConfig,
};
pub use error::AppError;
pub use ingest::{HarvestPorts, Harvester, RunFlag};
pub use matching::{match_name, normalize_title, similarity, MatchResult, PublisherCatalog};
pub use models::{
    Adaptation, DatabaseStats, NewSeries, NewVolume, Price, SeriesRecord, SeriesStatus,
    SeriesVolumeSummary, VolumeCandidate, VolumeRecord, VolumeTarget,
};
pub use outlier::{Outlier, OutlierIssue, OutlierReport, OutlierScorer};
pub use ports::{
    CatalogPage, CatalogSource, CatalogStore, FetchedImage, ImageSource, ObjectStore,
    PublisherDirectory, SeriesStore, VolumePage, VolumeQuery, VolumeSource, VolumeStore,
};
pub use rate_limit::{
    Clock, InMemoryStateStore, JsonStateStore, RateGovernor, RateLimitState, RateStateStore,
    ServiceLimit, SystemClock, CATALOG_SERVICE, VOLUME_SERVICE,
};
pub use sync::{HarvestStats, SeriesOutcome, VolumeOutcome, VolumeStats};
