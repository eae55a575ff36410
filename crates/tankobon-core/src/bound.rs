//! Ceiling on the number of stored series.

use tracing::{debug, info};

use crate::error::AppError;
use crate::models::NewSeries;
use crate::ports::SeriesStore;

/// What happened to a series handed to [`CatalogBoundEnforcer::try_insert_series`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesUpsert {
    Inserted(i64),
    Updated(i64),
    /// The store is full and the series was not already in it.
    Rejected,
}

impl SeriesUpsert {
    pub fn id(&self) -> Option<i64> {
        match self {
            SeriesUpsert::Inserted(id) | SeriesUpsert::Updated(id) => Some(*id),
            SeriesUpsert::Rejected => None,
        }
    }
}

/// Keeps the series table at or below `cap` rows.
///
/// The count is re-read right before every insert, but the read and the
/// insert are separate statements. Only one writer may run at a time.
#[derive(Debug, Clone, Copy)]
pub struct CatalogBoundEnforcer {
    cap: i64,
}

impl CatalogBoundEnforcer {
    pub fn new(cap: i64) -> Self {
        Self { cap }
    }

    pub fn cap(&self) -> i64 {
        self.cap
    }

    pub async fn has_capacity<S: SeriesStore + ?Sized>(&self, store: &S) -> Result<bool, AppError> {
        Ok(store.count_series().await? < self.cap)
    }

    /// Updates a known series unconditionally; inserts a new one only while
    /// the store is under the cap.
    pub async fn try_insert_series<S: SeriesStore + ?Sized>(
        &self,
        store: &S,
        series: &NewSeries,
    ) -> Result<SeriesUpsert, AppError> {
        if let Some(id) = store.find_series_id(series.external_id).await? {
            store.update_series(id, series).await?;
            debug!(series_id = id, external_id = series.external_id, "Series updated");
            return Ok(SeriesUpsert::Updated(id));
        }

        let count = store.count_series().await?;
        if count >= self.cap {
            info!(
                external_id = series.external_id,
                count,
                cap = self.cap,
                "Series cap reached, not inserting"
            );
            return Ok(SeriesUpsert::Rejected);
        }

        let id = store.insert_series(series).await?;
        debug!(series_id = id, external_id = series.external_id, "Series inserted");
        Ok(SeriesUpsert::Inserted(id))
    }
}
