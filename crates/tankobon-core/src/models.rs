//! Domain records exchanged between the remote sources, the matching engine
//! and the relational store.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;

/// Publication status of a series as reported by the catalog source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeriesStatus {
    Releasing,
    Finished,
    Cancelled,
    Other(String),
}

impl SeriesStatus {
    /// Canonical uppercase spelling stored in the database.
    pub fn as_str(&self) -> &str {
        match self {
            SeriesStatus::Releasing => "RELEASING",
            SeriesStatus::Finished => "FINISHED",
            SeriesStatus::Cancelled => "CANCELLED",
            SeriesStatus::Other(raw) => raw,
        }
    }

    /// Statuses that are revisited by the update pass.
    pub fn is_trackable(&self) -> bool {
        !matches!(self, SeriesStatus::Other(_))
    }
}

impl From<String> for SeriesStatus {
    fn from(raw: String) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "RELEASING" => SeriesStatus::Releasing,
            "FINISHED" => SeriesStatus::Finished,
            "CANCELLED" => SeriesStatus::Cancelled,
            _ => SeriesStatus::Other(raw),
        }
    }
}

impl fmt::Display for SeriesStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A related work (adaptation or alternative version) of a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adaptation {
    pub kind: Option<String>,
    pub title: Option<String>,
}

/// Series data as delivered by the catalog source, ready to insert or update.
#[derive(Debug, Clone, Serialize)]
pub struct NewSeries {
    /// Catalog-side identifier, unique in the local store.
    pub external_id: i64,
    pub title_romaji: Option<String>,
    pub title_english: Option<String>,
    pub title_native: Option<String>,
    pub description: Option<String>,
    pub authors: Vec<String>,
    pub artists: Vec<String>,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub status: SeriesStatus,
    pub country_of_origin: Option<String>,
    pub total_volumes: Option<i32>,
    pub total_chapters: Option<i32>,
    pub average_score: Option<i32>,
    pub mean_score: Option<i32>,
    pub is_adult: bool,
    pub popularity: Option<i64>,
    pub cover_image_url: Option<String>,
    pub cover_image_key: Option<String>,
    pub site_url: Option<String>,
    pub adaptations: Vec<Adaptation>,
}

impl NewSeries {
    /// Title used for logs: romaji first, as the catalog lists it.
    pub fn display_title(&self) -> &str {
        self.title_romaji
            .as_deref()
            .or(self.title_english.as_deref())
            .unwrap_or("<untitled>")
    }

    /// Whether an English-language print run is likely to exist.
    pub fn has_english_release(&self) -> bool {
        has_english_release(self.title_english.as_deref(), self.popularity)
    }
}

/// Popularity above which a series is assumed to be licensed in English.
pub const ENGLISH_RELEASE_POPULARITY: i64 = 10_000;

pub(crate) fn has_english_release(title_english: Option<&str>, popularity: Option<i64>) -> bool {
    if title_english.is_some_and(|t| !t.trim().is_empty()) {
        return true;
    }
    popularity.unwrap_or(0) > ENGLISH_RELEASE_POPULARITY
}

/// A stored series row, as needed by the update pass.
#[derive(Debug, Clone, FromRow)]
pub struct SeriesRecord {
    pub id: i64,
    pub external_id: i64,
    pub title_romaji: Option<String>,
    pub title_english: Option<String>,
    pub authors: Vec<String>,
    #[sqlx(try_from = "String")]
    pub status: SeriesStatus,
    pub total_volumes: Option<i32>,
    pub popularity: Option<i64>,
    pub last_checked_for_volumes: Option<DateTime<Utc>>,
}

impl SeriesRecord {
    pub fn display_title(&self) -> &str {
        self.title_romaji
            .as_deref()
            .or(self.title_english.as_deref())
            .unwrap_or("<untitled>")
    }

    pub fn has_english_release(&self) -> bool {
        has_english_release(self.title_english.as_deref(), self.popularity)
    }
}

/// What the volume search needs to know about its target series.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeTarget {
    /// English title when known, romaji otherwise.
    pub search_title: String,
    pub author: Option<String>,
    pub expected_volumes: Option<i32>,
}

impl VolumeTarget {
    fn build(
        english: Option<&str>,
        romaji: Option<&str>,
        authors: &[String],
        expected_volumes: Option<i32>,
    ) -> Option<Self> {
        let search_title = english
            .filter(|t| !t.trim().is_empty())
            .or(romaji.filter(|t| !t.trim().is_empty()))?;
        Some(Self {
            search_title: search_title.to_string(),
            author: authors.first().cloned(),
            expected_volumes,
        })
    }

    pub fn from_new_series(series: &NewSeries) -> Option<Self> {
        Self::build(
            series.title_english.as_deref(),
            series.title_romaji.as_deref(),
            &series.authors,
            series.total_volumes,
        )
    }

    pub fn from_record(record: &SeriesRecord) -> Option<Self> {
        Self::build(
            record.title_english.as_deref(),
            record.title_romaji.as_deref(),
            &record.authors,
            record.total_volumes,
        )
    }
}

/// List price attached to a volume candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub amount: Option<f64>,
    pub currency: Option<String>,
}

/// A raw search hit from the volume source, before any filtering.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VolumeCandidate {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub authors: Vec<String>,
    pub publisher: Option<String>,
    pub published_date: Option<String>,
    pub description: Option<String>,
    pub isbn_13: Option<String>,
    pub isbn_10: Option<String>,
    pub page_count: Option<i32>,
    pub print_type: Option<String>,
    pub categories: Vec<String>,
    pub language: Option<String>,
    pub list_price: Option<Price>,
    pub country: Option<String>,
    pub preview_link: Option<String>,
    pub info_link: Option<String>,
    pub thumbnail_url: Option<String>,
}

/// An accepted volume ready to insert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewVolume {
    pub title: String,
    pub subtitle: Option<String>,
    pub volume_number: Option<i32>,
    pub isbn_13: Option<String>,
    pub isbn_10: Option<String>,
    pub page_count: Option<i32>,
    pub publisher: Option<String>,
    pub published_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub categories: Vec<String>,
    pub price_amount: Option<f64>,
    pub price_currency: Option<String>,
    pub country: Option<String>,
    pub preview_link: Option<String>,
    pub info_link: Option<String>,
    pub thumbnail_url: Option<String>,
    pub thumbnail_key: Option<String>,
}

impl NewVolume {
    /// Builds the insertable volume; `None` when the candidate has no title.
    pub fn from_candidate(candidate: VolumeCandidate) -> Option<Self> {
        let title = candidate.title.filter(|t| !t.trim().is_empty())?;
        let (price_amount, price_currency) = match candidate.list_price {
            Some(price) => (price.amount, price.currency),
            None => (None, None),
        };

        Some(Self {
            volume_number: extract_volume_number(&title),
            published_date: candidate
                .published_date
                .as_deref()
                .and_then(parse_published_date),
            title,
            subtitle: candidate.subtitle,
            isbn_13: candidate.isbn_13,
            isbn_10: candidate.isbn_10,
            page_count: candidate.page_count,
            publisher: candidate.publisher,
            description: candidate.description,
            language: candidate.language,
            categories: candidate.categories,
            price_amount,
            price_currency,
            country: candidate.country,
            preview_link: candidate.preview_link,
            info_link: candidate.info_link,
            thumbnail_url: candidate.thumbnail_url,
            thumbnail_key: None,
        })
    }
}

/// A stored volume, as loaded for outlier analysis.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct VolumeRecord {
    pub id: i64,
    pub series_id: i64,
    pub title: Option<String>,
    pub publisher: Option<String>,
    pub isbn_13: Option<String>,
    pub volume_number: Option<i32>,
    pub thumbnail_key: Option<String>,
}

/// A series with enough stored volumes to be audited.
#[derive(Debug, Clone, FromRow)]
pub struct SeriesVolumeSummary {
    pub id: i64,
    pub title: String,
    pub volume_count: i64,
}

/// Aggregated store statistics.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub total_series: i64,
    pub total_volumes: i64,
    pub trusted_publishers: i64,
    pub last_volume_check: Option<DateTime<Utc>>,
}

static VOLUME_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Vol\.?\s*(\d+)|Volume\s+(\d+)").expect("static volume number pattern")
});

/// Pulls the volume number out of titles such as "Berserk, Vol. 12".
pub fn extract_volume_number(title: &str) -> Option<i32> {
    let caps = VOLUME_NUMBER.captures(title)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .and_then(|m| m.as_str().parse().ok())
}

/// Parses the partial dates the volume source emits (`YYYY-MM-DD`, `YYYY-MM`, `YYYY`).
pub fn parse_published_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{}-01", raw), "%Y-%m-%d"))
        .or_else(|_| NaiveDate::parse_from_str(&format!("{}-01-01", raw), "%Y-%m-%d"))
        .ok()
}
