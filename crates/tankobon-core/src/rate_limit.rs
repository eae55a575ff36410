//! Cross-run request budgeting for the remote sources.
//!
//! Each service gets `max_requests` calls per `period`. The counter and the
//! reset deadline are persisted after every change, so a restarted process
//! picks up the budget where the previous one left it. The deadline is only
//! armed once the budget is exhausted; the window therefore starts at the
//! first blocked call, not at the first request.
//!
//! Correctness assumes a single process consults the state file.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::error::AppError;

/// Service name of the series catalog source.
pub const CATALOG_SERVICE: &str = "anilist";
/// Service name of the volume search source.
pub const VOLUME_SERVICE: &str = "google_books";

/// Persisted counter for one service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceState {
    pub count: u32,
    pub reset_time: Option<DateTime<Utc>>,
}

/// Persisted counters for every service, keyed by service name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateLimitState {
    pub services: BTreeMap<String, ServiceState>,
}

impl RateLimitState {
    pub fn service(&self, name: &str) -> ServiceState {
        self.services.get(name).cloned().unwrap_or_default()
    }
}

/// Durable home of the [`RateLimitState`].
pub trait RateStateStore {
    fn load(&self) -> Result<RateLimitState, AppError>;
    fn save(&self, state: &RateLimitState) -> Result<(), AppError>;
}

/// Keeps the state in a JSON file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RateStateStore for JsonStateStore {
    fn load(&self) -> Result<RateLimitState, AppError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RateLimitState::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, state: &RateLimitState) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(state)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Volatile store for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    state: Mutex<RateLimitState>,
}

impl InMemoryStateStore {
    pub fn snapshot(&self) -> RateLimitState {
        self.state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl RateStateStore for InMemoryStateStore {
    fn load(&self) -> Result<RateLimitState, AppError> {
        Ok(self.snapshot())
    }

    fn save(&self, state: &RateLimitState) -> Result<(), AppError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| AppError::Generic("rate state lock poisoned".to_string()))?;
        *guard = state.clone();
        Ok(())
    }
}

/// Source of wall-clock time and of waiting.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    async fn sleep(&self, duration: Duration);
}

/// Real time, backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Budget of one service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceLimit {
    pub max_requests: u32,
    pub period: TimeDelta,
    /// Pause applied after every granted request.
    pub delay: Duration,
}

impl ServiceLimit {
    pub fn from_config(config: &RateLimitConfig) -> Result<Self, AppError> {
        let period = TimeDelta::from_std(config.period()?)
            .map_err(|e| AppError::ConfigError(format!("period_hours: {}", e)))?;
        Ok(Self {
            max_requests: config.max_requests,
            period,
            delay: config.delay()?,
        })
    }
}

impl Default for ServiceLimit {
    fn default() -> Self {
        Self {
            max_requests: 1000,
            period: TimeDelta::hours(24),
            delay: Duration::from_secs(1),
        }
    }
}

/// Blocks callers until the named service has budget left.
pub struct RateGovernor<S: RateStateStore, C: Clock> {
    store: S,
    clock: C,
    limits: HashMap<String, ServiceLimit>,
    fallback: ServiceLimit,
    state: RateLimitState,
}

impl<S: RateStateStore, C: Clock> RateGovernor<S, C> {
    /// Loads the persisted state. Services without an explicit limit use
    /// [`ServiceLimit::default`].
    pub fn new(
        store: S,
        clock: C,
        limits: HashMap<String, ServiceLimit>,
    ) -> Result<Self, AppError> {
        let state = store.load()?;
        Ok(Self {
            store,
            clock,
            limits,
            fallback: ServiceLimit::default(),
            state,
        })
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn state(&self) -> &RateLimitState {
        &self.state
    }

    fn limit(&self, service: &str) -> ServiceLimit {
        self.limits
            .get(service)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    fn persist(&mut self, service: &str, entry: &ServiceState) -> Result<(), AppError> {
        self.state
            .services
            .insert(service.to_string(), entry.clone());
        self.store.save(&self.state)
    }

    /// Consumes one request slot for `service`, waiting for the window to
    /// reset when the budget is spent, then applies the per-request delay.
    ///
    /// Only a failing state store produces an error.
    pub async fn acquire(&mut self, service: &str) -> Result<(), AppError> {
        let limit = self.limit(service);
        let mut entry = self.state.service(service);

        if let Some(reset) = entry.reset_time {
            if self.clock.now() >= reset {
                entry.count = 0;
                entry.reset_time = None;
            }
        }

        if entry.count >= limit.max_requests {
            let reset = match entry.reset_time {
                Some(reset) => reset,
                None => {
                    let reset = self.clock.now() + limit.period;
                    entry.reset_time = Some(reset);
                    self.persist(service, &entry)?;
                    reset
                }
            };

            if let Ok(wait) = (reset - self.clock.now()).to_std() {
                if !wait.is_zero() {
                    warn!(
                        service,
                        until = %reset.format("%Y-%m-%d %H:%M:%S"),
                        hours = wait.as_secs_f64() / 3600.0,
                        "Rate limit reached, waiting for reset"
                    );
                    self.clock.sleep(wait).await;
                    entry.count = 0;
                    entry.reset_time = None;
                }
            }
        }

        entry.count += 1;
        debug!(service, count = entry.count, "Request slot granted");
        self.persist(service, &entry)?;

        self.clock.sleep(limit.delay).await;
        Ok(())
    }
}
