//! Flags stored volumes that look out of place within their series.
//!
//! A series' volumes usually share a publisher and a title prefix. Volumes
//! that disagree with the majority on both, or that miss an ISBN-13 on top
//! of another disagreement, were most likely matched by mistake during
//! ingestion.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::matching::similarity;
use crate::models::VolumeRecord;

/// Fewest volumes a series needs before it can be analyzed.
pub const MIN_VOLUMES_FOR_ANALYSIS: usize = 3;

const TITLE_SIMILARITY_FLOOR: f64 = 0.5;
const PUBLISHER_SIMILARITY_FLOOR: f64 = 0.7;
const OUTLIER_ISSUE_COUNT: usize = 2;
const OUTLIER_SEVERITY: u32 = 4;

static SERIES_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([^,]+?)(?:,?\s*Vol|,?\s*Volume|,?\s*Book)")
        .expect("static series name pattern")
});

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutlierIssue {
    TitleMismatch { similarity: f64 },
    PublisherMismatch { publisher: String, common: String },
    MissingIsbn13,
}

impl OutlierIssue {
    pub fn weight(&self) -> u32 {
        match self {
            OutlierIssue::TitleMismatch { .. } => 3,
            OutlierIssue::PublisherMismatch { .. } => 2,
            OutlierIssue::MissingIsbn13 => 1,
        }
    }
}

impl fmt::Display for OutlierIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutlierIssue::TitleMismatch { similarity } => {
                write!(f, "Title mismatch (similarity: {:.2})", similarity)
            }
            OutlierIssue::PublisherMismatch { publisher, common } => {
                write!(f, "Publisher mismatch: '{}' vs common '{}'", publisher, common)
            }
            OutlierIssue::MissingIsbn13 => f.write_str("Missing ISBN-13"),
        }
    }
}

/// A volume that failed enough checks to be reported.
#[derive(Debug, Clone, Serialize)]
pub struct Outlier {
    pub volume: VolumeRecord,
    pub issues: Vec<OutlierIssue>,
    pub severity: u32,
}

impl Outlier {
    /// Deletion uses a severity bar of its own, independent of how the
    /// volume qualified as an outlier.
    pub fn is_deletion_eligible(&self, min_severity: u32) -> bool {
        self.severity >= min_severity
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutlierReport {
    pub series_id: i64,
    pub series_title: String,
    pub total_volumes: usize,
    pub most_common_publisher: Option<String>,
    pub most_common_series_name: Option<String>,
    pub outliers: Vec<Outlier>,
    /// Set when the series had too few volumes to judge.
    pub insufficient_data: bool,
}

impl OutlierReport {
    pub fn eligible(&self, min_severity: u32) -> impl Iterator<Item = &Outlier> {
        self.outliers
            .iter()
            .filter(move |o| o.is_deletion_eligible(min_severity))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OutlierScorer;

impl OutlierScorer {
    pub fn analyze(
        &self,
        series_id: i64,
        series_title: &str,
        volumes: &[VolumeRecord],
    ) -> OutlierReport {
        let mut report = OutlierReport {
            series_id,
            series_title: series_title.to_string(),
            total_volumes: volumes.len(),
            most_common_publisher: None,
            most_common_series_name: None,
            outliers: Vec::new(),
            insufficient_data: volumes.len() < MIN_VOLUMES_FOR_ANALYSIS,
        };
        if report.insufficient_data {
            return report;
        }

        let common_publisher = mode(volumes.iter().filter_map(|v| {
            v.publisher.as_deref().filter(|p| !p.is_empty()).map(str::to_string)
        }));
        let common_name = mode(
            volumes
                .iter()
                .filter_map(|v| v.title.as_deref().filter(|t| !t.is_empty()))
                .map(extract_series_name),
        );

        for volume in volumes {
            let issues = score_volume(
                volume,
                series_title,
                common_publisher.as_deref(),
                common_name.as_deref(),
            );
            let severity = issues.iter().map(OutlierIssue::weight).sum();
            if issues.len() >= OUTLIER_ISSUE_COUNT || severity >= OUTLIER_SEVERITY {
                report.outliers.push(Outlier {
                    volume: volume.clone(),
                    issues,
                    severity,
                });
            }
        }

        report.most_common_publisher = common_publisher;
        report.most_common_series_name = common_name;
        report
    }
}

fn score_volume(
    volume: &VolumeRecord,
    series_title: &str,
    common_publisher: Option<&str>,
    common_name: Option<&str>,
) -> Vec<OutlierIssue> {
    let mut issues = Vec::new();

    if let Some(title) = volume.title.as_deref().filter(|t| !t.is_empty()) {
        let title_sim = similarity(series_title, title);
        if title_sim < TITLE_SIMILARITY_FLOOR {
            let rescued = common_name
                .is_some_and(|name| similarity(name, title) >= TITLE_SIMILARITY_FLOOR);
            if !rescued {
                issues.push(OutlierIssue::TitleMismatch {
                    similarity: title_sim,
                });
            }
        }
    }

    if let (Some(common), Some(publisher)) = (
        common_publisher,
        volume.publisher.as_deref().filter(|p| !p.is_empty()),
    ) {
        if publisher != common && similarity(common, publisher) < PUBLISHER_SIMILARITY_FLOOR {
            issues.push(OutlierIssue::PublisherMismatch {
                publisher: publisher.to_string(),
                common: common.to_string(),
            });
        }
    }

    if volume.isbn_13.as_deref().is_none_or(str::is_empty) {
        issues.push(OutlierIssue::MissingIsbn13);
    }

    issues
}

/// Series name prefix of a volume title ("Berserk" in "Berserk, Vol. 3"),
/// or the whole title when no volume marker follows.
pub fn extract_series_name(title: &str) -> String {
    SERIES_NAME
        .captures(title)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| title.to_string())
}

/// Most frequent value; ties go to the value seen first.
fn mode<I: IntoIterator<Item = String>>(values: I) -> Option<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, n)) => *n += 1,
            None => counts.push((value, 1)),
        }
    }

    let mut best: Option<(String, usize)> = None;
    for (value, n) in counts {
        if best.as_ref().is_none_or(|(_, top)| n > *top) {
            best = Some((value, n));
        }
    }
    best.map(|(value, _)| value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume(id: i64, title: &str, publisher: Option<&str>, isbn: Option<&str>) -> VolumeRecord {
        VolumeRecord {
            id,
            series_id: 1,
            title: Some(title.to_string()),
            publisher: publisher.map(str::to_string),
            isbn_13: isbn.map(str::to_string),
            volume_number: None,
            thumbnail_key: None,
        }
    }

    fn naruto_run() -> Vec<VolumeRecord> {
        (1..=4)
            .map(|n| {
                volume(
                    n,
                    &format!("Naruto, Vol. {}", n),
                    Some("Viz Media"),
                    Some(&format!("978142150{:04}", n)),
                )
            })
            .collect()
    }

    #[test]
    fn test_too_few_volumes() {
        let volumes = vec![
            volume(1, "Akira, Vol. 1", None, None),
            volume(2, "Cookbook", None, None),
        ];
        let report = OutlierScorer.analyze(1, "Akira", &volumes);
        assert!(report.insufficient_data);
        assert!(report.outliers.is_empty());
        assert_eq!(report.total_volumes, 2);
    }

    #[test]
    fn test_publisher_and_isbn_issue_is_outlier_but_not_eligible() {
        let mut volumes = naruto_run();
        volumes.push(volume(5, "Naruto, Vol. 5", Some("Random House"), None));

        let report = OutlierScorer.analyze(1, "Naruto", &volumes);

        assert_eq!(report.most_common_publisher.as_deref(), Some("Viz Media"));
        assert_eq!(report.most_common_series_name.as_deref(), Some("Naruto"));
        assert_eq!(report.outliers.len(), 1);
        let outlier = &report.outliers[0];
        assert_eq!(outlier.volume.id, 5);
        assert_eq!(outlier.issues.len(), 2);
        assert_eq!(outlier.severity, 3);
        assert!(!outlier.is_deletion_eligible(4));
        assert_eq!(report.eligible(4).count(), 0);
        assert_eq!(report.eligible(3).count(), 1);
    }

    #[test]
    fn test_unrelated_title_alone_is_not_enough() {
        let mut volumes = naruto_run();
        volumes.push(volume(
            5,
            "Practical Sourdough Baking",
            Some("Viz Media"),
            Some("9780000000005"),
        ));

        let report = OutlierScorer.analyze(1, "Naruto", &volumes);
        assert!(report.outliers.is_empty());

        volumes[4].isbn_13 = None;
        let report = OutlierScorer.analyze(1, "Naruto", &volumes);
        let outlier = &report.outliers[0];
        assert!(matches!(outlier.issues[0], OutlierIssue::TitleMismatch { .. }));
        assert_eq!(outlier.severity, 4);
        assert!(outlier.is_deletion_eligible(4));
    }

    #[test]
    fn test_common_series_name_rescues_title() {
        let volumes = vec![
            volume(1, "Shingeki no Kyojin, Vol. 1", Some("Kodansha"), Some("1")),
            volume(2, "Shingeki no Kyojin, Vol. 2", Some("Kodansha"), Some("2")),
            volume(3, "Shingeki no Kyojin, Vol. 3", Some("Kodansha"), Some("3")),
        ];
        let report = OutlierScorer.analyze(1, "Attack on Titan", &volumes);
        assert!(report.outliers.is_empty());
    }

    #[test]
    fn test_single_missing_isbn_is_not_outlier() {
        let mut volumes = naruto_run();
        volumes[0].isbn_13 = None;
        let report = OutlierScorer.analyze(1, "Naruto", &volumes);
        assert!(report.outliers.is_empty());
    }

    #[test]
    fn test_similar_publisher_spelling_is_tolerated() {
        let mut volumes = naruto_run();
        volumes[3].publisher = Some("VIZ Media LLC".to_string());
        volumes[3].isbn_13 = None;
        let report = OutlierScorer.analyze(1, "Naruto", &volumes);
        assert!(report.outliers.is_empty());
    }

    #[test]
    fn test_issue_display() {
        assert_eq!(OutlierIssue::MissingIsbn13.to_string(), "Missing ISBN-13");
        assert_eq!(
            OutlierIssue::TitleMismatch { similarity: 0.25 }.to_string(),
            "Title mismatch (similarity: 0.25)"
        );
    }

    #[test]
    fn test_extract_series_name() {
        assert_eq!(extract_series_name("Berserk, Vol. 3"), "Berserk");
        assert_eq!(extract_series_name("Bone Book 4"), "Bone");
        assert_eq!(extract_series_name("Akira Club"), "Akira Club");
    }

    #[test]
    fn test_mode_prefers_first_seen_on_tie() {
        let values = ["b", "a", "a", "b", "c"].map(String::from);
        assert_eq!(mode(values), Some("b".to_string()));
        assert_eq!(mode(Vec::<String>::new()), None);
    }
}
