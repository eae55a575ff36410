//! Offline audit of stored volumes.
//!
//! Runs the [`OutlierScorer`] over every series with enough volumes and,
//! when asked to, deletes the outliers. Nothing is removed unless the
//! caller selects [`CleanupMode::Delete`] or confirms a deletion during an
//! interactive review.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::AppError;
use crate::models::VolumeRecord;
use crate::outlier::{Outlier, OutlierReport, OutlierScorer, MIN_VOLUMES_FOR_ANALYSIS};
use crate::ports::{ObjectStore, VolumeStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanupMode {
    /// Analyze and report only.
    #[default]
    DryRun,
    Delete,
}

#[derive(Debug, Clone, Copy)]
pub struct CleanupOptions {
    pub min_severity: u32,
    pub mode: CleanupMode,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            min_severity: 4,
            mode: CleanupMode::DryRun,
        }
    }
}

/// Answer of the reviewer for one outlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Delete,
    Skip,
    Quit,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupSummary {
    pub series_analyzed: usize,
    pub series_with_issues: usize,
    pub total_outliers: usize,
    /// Outliers at or above the severity bar.
    pub eligible: usize,
    /// Volumes a live run would delete; only counted in dry runs.
    pub pending: usize,
    pub deleted: u64,
    pub object_delete_failures: usize,
    pub reports: Vec<OutlierReport>,
}

pub struct VolumeCleaner {
    store: Arc<dyn VolumeStore>,
    objects: Arc<dyn ObjectStore>,
    scorer: OutlierScorer,
}

impl VolumeCleaner {
    pub fn new(store: Arc<dyn VolumeStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            objects,
            scorer: OutlierScorer,
        }
    }

    async fn analyze_all(&self) -> Result<Vec<OutlierReport>, AppError> {
        let series = self
            .store
            .series_with_volumes(MIN_VOLUMES_FOR_ANALYSIS as i64)
            .await?;
        info!(series = series.len(), "Analyzing series");

        let mut reports = Vec::with_capacity(series.len());
        for entry in series {
            let volumes = self.store.volumes_for_series(entry.id).await?;
            reports.push(self.scorer.analyze(entry.id, &entry.title, &volumes));
        }
        Ok(reports)
    }

    /// Analyzes every series and, in [`CleanupMode::Delete`], removes the
    /// outliers whose severity reaches `min_severity`.
    pub async fn run(&self, options: CleanupOptions) -> Result<CleanupSummary, AppError> {
        let mut summary = CleanupSummary::default();

        for report in self.analyze_all().await? {
            summary.series_analyzed += 1;
            if report.outliers.is_empty() {
                continue;
            }
            summary.series_with_issues += 1;
            summary.total_outliers += report.outliers.len();
            log_report(&report);

            let eligible: Vec<&VolumeRecord> = report
                .eligible(options.min_severity)
                .map(|o| &o.volume)
                .collect();
            summary.eligible += eligible.len();

            if !eligible.is_empty() {
                match options.mode {
                    CleanupMode::Delete => self.delete(&eligible, &mut summary).await?,
                    CleanupMode::DryRun => {
                        info!(
                            series_id = report.series_id,
                            count = eligible.len(),
                            "Dry run, volumes not deleted"
                        );
                        summary.pending += eligible.len();
                    }
                }
            }
            summary.reports.push(report);
        }

        info!(
            analyzed = summary.series_analyzed,
            with_issues = summary.series_with_issues,
            outliers = summary.total_outliers,
            eligible = summary.eligible,
            deleted = summary.deleted,
            "Cleanup complete"
        );
        Ok(summary)
    }

    /// Walks every outlier and asks `decide` what to do with it.
    ///
    /// Deletions only happen in [`CleanupMode::Delete`]; in a dry run a
    /// `Delete` answer is counted as pending. `Quit` stops the review.
    pub async fn review<F>(
        &self,
        mode: CleanupMode,
        mut decide: F,
    ) -> Result<CleanupSummary, AppError>
    where
        F: FnMut(&OutlierReport, &Outlier) -> ReviewDecision,
    {
        let mut summary = CleanupSummary::default();

        for report in self.analyze_all().await? {
            summary.series_analyzed += 1;
            if report.outliers.is_empty() {
                continue;
            }
            summary.series_with_issues += 1;
            summary.total_outliers += report.outliers.len();

            let mut quit = false;
            for outlier in &report.outliers {
                match decide(&report, outlier) {
                    ReviewDecision::Delete => match mode {
                        CleanupMode::Delete => {
                            self.delete(&[&outlier.volume], &mut summary).await?
                        }
                        CleanupMode::DryRun => summary.pending += 1,
                    },
                    ReviewDecision::Skip => {}
                    ReviewDecision::Quit => {
                        quit = true;
                        break;
                    }
                }
            }
            summary.reports.push(report);
            if quit {
                info!("Review stopped by user");
                break;
            }
        }

        Ok(summary)
    }

    /// Deletes the rows, then their stored thumbnails. A failing object
    /// delete is logged and counted; the rows stay deleted.
    async fn delete(
        &self,
        volumes: &[&VolumeRecord],
        summary: &mut CleanupSummary,
    ) -> Result<(), AppError> {
        let ids: Vec<i64> = volumes.iter().map(|v| v.id).collect();
        let deleted = self.store.delete_volumes(&ids).await?;
        summary.deleted += deleted;
        info!(count = deleted, "Deleted volumes");

        for key in volumes.iter().filter_map(|v| v.thumbnail_key.as_deref()) {
            if let Err(e) = self.objects.delete(key).await {
                warn!(key, error = %e, "Failed to delete stored thumbnail");
                summary.object_delete_failures += 1;
            }
        }
        Ok(())
    }
}

fn log_report(report: &OutlierReport) {
    info!(
        series_id = report.series_id,
        title = %report.series_title,
        volumes = report.total_volumes,
        outliers = report.outliers.len(),
        common_publisher = ?report.most_common_publisher,
        common_series_name = ?report.most_common_series_name,
        "Series has outliers"
    );
    for outlier in &report.outliers {
        let issues: Vec<String> = outlier.issues.iter().map(ToString::to_string).collect();
        info!(
            volume_id = outlier.volume.id,
            title = ?outlier.volume.title,
            severity = outlier.severity,
            issues = %issues.join("; "),
            "Outlier"
        );
    }
}
