//! Configuration types for Tankobon components.
//!
//! Tunables are read from a TOML file (default
//! `<config_dir>/tankobon/config.toml`). Every section and every field is
//! optional; anything left out falls back to the `Default` impls below.
//!
//! ```toml
//! [harvest]
//! series_cap = 500
//! publisher_match_threshold = 0.8
//!
//! [rate_limits.google_books]
//! max_requests = 1000
//! period_hours = 24
//! delay_seconds = 1.0
//!
//! [storage]
//! backend = "s3"
//! bucket = "tankobon-images"
//! region = "us-east-1"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::AppError;

/// Database connection pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { max_connections: 5 }
    }
}

/// HTTP client configuration for external API calls.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub image_timeout: Duration,
    /// Upper bound on retries after a rate-limited catalog response.
    pub max_retries: u32,
    /// Wait used when a rate-limited response carries no `Retry-After`.
    pub default_retry_after: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            image_timeout: Duration::from_secs(10),
            max_retries: 3,
            default_retry_after: Duration::from_secs(60),
        }
    }
}

/// Ingestion tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Ceiling on the number of series the local store may hold.
    pub series_cap: i64,
    /// Catalog page size.
    pub per_page: u32,
    /// Minimum age of the last volume check before a series is revisited.
    pub update_interval_hours: u64,
    /// Series examined per update pass.
    pub batch_size: i64,
    pub publisher_match_threshold: f64,
    /// Volume search depth when the series declares no volume count.
    pub max_volume_search: u32,
    /// Hard ceiling on volume search depth.
    pub volume_search_ceiling: u32,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            series_cap: 500,
            per_page: 50,
            update_interval_hours: 24,
            batch_size: 50,
            publisher_match_threshold: 0.8,
            max_volume_search: 200,
            volume_search_ceiling: 300,
        }
    }
}

/// Longest accepted gap between volume checks: one year.
pub const MAX_UPDATE_INTERVAL_HOURS: u64 = 24 * 365;

impl HarvestConfig {
    /// Saturates instead of overflowing for unvalidated configs.
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_hours.saturating_mul(3600))
    }
}

/// Per-service request budget.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub period_hours: f64,
    pub delay_seconds: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 1000,
            period_hours: 24.0,
            delay_seconds: 1.0,
        }
    }
}

impl RateLimitConfig {
    pub fn period(&self) -> Result<Duration, AppError> {
        Duration::try_from_secs_f64(self.period_hours * 3600.0)
            .map_err(|e| AppError::ConfigError(format!("period_hours: {}", e)))
    }

    pub fn delay(&self) -> Result<Duration, AppError> {
        Duration::try_from_secs_f64(self.delay_seconds)
            .map_err(|e| AppError::ConfigError(format!("delay_seconds: {}", e)))
    }
}

/// Offline cleanup tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Minimum severity an outlier needs to be eligible for deletion.
    pub min_severity: u32,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self { min_severity: 4 }
    }
}

/// Where cover and volume images are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Plain files below `object_root`.
    #[default]
    Local,
    /// An S3 bucket (or any S3-compatible endpoint).
    S3,
}

/// Image storage and durable state locations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub object_root: PathBuf,
    pub rate_state_path: PathBuf,
    /// Required by the S3 backend.
    pub bucket: Option<String>,
    /// Falls back to the AWS environment when unset.
    pub region: Option<String>,
    /// Custom S3-compatible endpoint, addressed path-style.
    pub endpoint_url: Option<String>,
    /// `Cache-Control` attached to every uploaded object.
    pub cache_control: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = default_data_dir();
        Self {
            backend: StorageBackend::Local,
            object_root: base.join("objects"),
            rate_state_path: base.join("rate_limit_state.json"),
            bucket: None,
            region: None,
            endpoint_url: None,
            cache_control: "max-age=31536000".to_string(),
        }
    }
}

/// Root configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DbConfig,
    pub harvest: HarvestConfig,
    pub rate_limits: BTreeMap<String, RateLimitConfig>,
    pub cleanup: CleanupConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Limits for `service`, falling back to the defaults for unknown services.
    pub fn rate_limit(&self, service: &str) -> RateLimitConfig {
        self.rate_limits.get(service).cloned().unwrap_or_default()
    }

    /// Rejects values the harvester cannot work with.
    pub fn validate(&self) -> Result<(), AppError> {
        let threshold = self.harvest.publisher_match_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(AppError::ConfigError(format!(
                "publisher_match_threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        if self.harvest.per_page == 0 {
            return Err(AppError::ConfigError("per_page must be positive".to_string()));
        }
        let hours = self.harvest.update_interval_hours;
        if hours == 0 || hours > MAX_UPDATE_INTERVAL_HOURS {
            return Err(AppError::ConfigError(format!(
                "update_interval_hours must be within [1, {}], got {}",
                MAX_UPDATE_INTERVAL_HOURS, hours
            )));
        }
        if self.harvest.series_cap < 0 {
            return Err(AppError::ConfigError(
                "series_cap must not be negative".to_string(),
            ));
        }
        if self.storage.backend == StorageBackend::S3
            && self.storage.bucket.as_deref().is_none_or(|b| b.trim().is_empty())
        {
            return Err(AppError::ConfigError(
                "storage.bucket is required for the s3 backend".to_string(),
            ));
        }
        for (service, limit) in &self.rate_limits {
            if limit.max_requests == 0 {
                return Err(AppError::ConfigError(format!(
                    "rate_limits.{}.max_requests must be positive",
                    service
                )));
            }
            limit.period()?;
            limit.delay()?;
        }
        Ok(())
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("tankobon"))
        .unwrap_or_else(|| PathBuf::from(".tankobon"))
}

/// Default location of the configuration file, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tankobon").join("config.toml"))
}

/// Loads and validates the configuration.
///
/// An explicit `path` must exist. Without one, the default path is used when
/// present and built-in defaults otherwise.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, AppError> {
    let resolved = match path {
        Some(p) => {
            if !p.exists() {
                return Err(AppError::ConfigError(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            Some(p.to_path_buf())
        }
        None => default_config_path().filter(|p| p.exists()),
    };

    let config = match resolved {
        Some(p) => {
            let raw = std::fs::read_to_string(&p)?;
            parse_config(&raw)?
        }
        None => AppConfig::default(),
    };

    config.validate()?;
    Ok(config)
}

/// Parses a TOML document into an [`AppConfig`] without validating it.
pub fn parse_config(raw: &str) -> Result<AppConfig, AppError> {
    toml::from_str(raw).map_err(|e| AppError::ConfigError(e.to_string()))
}
