//! Counters reported by the ingestion driver.
//!
//! Pure bookkeeping, decoupled from I/O so the CLI can print summaries and
//! tests can assert on exact outcomes.

use std::ops::AddAssign;

/// Outcome of processing a single catalog series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesOutcome {
    /// New series stored.
    Created,
    /// Known series refreshed in place.
    Updated,
    /// Not stored because the series cap was reached.
    Capped,
    /// Processing failed for this series.
    Failed,
}

/// Outcome of a single volume candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeOutcome {
    Added,
    /// Rejected by the acceptance filter.
    Filtered,
    /// Publisher not found in the trusted catalog.
    PublisherSkipped,
    /// Same ISBN-13 already stored for this series.
    Duplicate,
    Failed,
}

/// Per-candidate statistics of one or more volume checks.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VolumeStats {
    pub added: usize,
    pub filtered: usize,
    pub publisher_skipped: usize,
    pub duplicate: usize,
    pub failed: usize,
}

impl VolumeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: VolumeOutcome) {
        match outcome {
            VolumeOutcome::Added => self.added += 1,
            VolumeOutcome::Filtered => self.filtered += 1,
            VolumeOutcome::PublisherSkipped => self.publisher_skipped += 1,
            VolumeOutcome::Duplicate => self.duplicate += 1,
            VolumeOutcome::Failed => self.failed += 1,
        }
    }

    /// Total number of candidates examined.
    pub fn total(&self) -> usize {
        self.added + self.filtered + self.publisher_skipped + self.duplicate + self.failed
    }
}

impl AddAssign<&VolumeStats> for VolumeStats {
    fn add_assign(&mut self, other: &VolumeStats) {
        self.added += other.added;
        self.filtered += other.filtered;
        self.publisher_skipped += other.publisher_skipped;
        self.duplicate += other.duplicate;
        self.failed += other.failed;
    }
}

/// Statistics of an initial harvest or an update pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HarvestStats {
    pub created: usize,
    pub updated: usize,
    pub capped: usize,
    pub failed: usize,
    pub pages_failed: usize,
    /// Series whose volumes were searched.
    pub volume_checks: usize,
    pub volumes: VolumeStats,
}

impl HarvestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: SeriesOutcome) {
        match outcome {
            SeriesOutcome::Created => self.created += 1,
            SeriesOutcome::Updated => self.updated += 1,
            SeriesOutcome::Capped => self.capped += 1,
            SeriesOutcome::Failed => self.failed += 1,
        }
    }

    /// Merges the result of one volume check.
    pub fn record_volumes(&mut self, volumes: &VolumeStats) {
        self.volume_checks += 1;
        self.volumes += volumes;
    }

    /// Total number of series processed.
    pub fn total(&self) -> usize {
        self.created + self.updated + self.capped + self.failed
    }

    /// Series that were stored or refreshed.
    pub fn successful(&self) -> usize {
        self.created + self.updated
    }
}

impl AddAssign<&HarvestStats> for HarvestStats {
    fn add_assign(&mut self, other: &HarvestStats) {
        self.created += other.created;
        self.updated += other.updated;
        self.capped += other.capped;
        self.failed += other.failed;
        self.pages_failed += other.pages_failed;
        self.volume_checks += other.volume_checks;
        self.volumes += &other.volumes;
    }
}
