//! Decides whether a volume search hit belongs to the series being searched.
//!
//! The volume source answers keyword queries, so a search for "Monster"
//! returns monster-hunting novels, art books and unrelated comics next to
//! the actual volumes. The filter rejects anything that does not look like
//! a numbered print volume of the target series.

use std::fmt;

use crate::matching::similarity;
use crate::models::VolumeCandidate;

const VOLUME_INDICATORS: [&str; 4] = ["vol", "volume", "book", "#"];
const COMIC_CATEGORIES: [&str; 3] = ["comics", "manga", "graphic novel"];

/// Why a candidate was turned away.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    MissingTitle,
    TitleMismatch { similarity: f64 },
    AuthorMismatch { similarity: f64 },
    NoVolumeEvidence { similarity: f64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MissingTitle => write!(f, "no title"),
            Rejection::TitleMismatch { similarity } => {
                write!(f, "title similarity {:.2}", similarity)
            }
            Rejection::AuthorMismatch { similarity } => {
                write!(f, "author mismatch (title similarity {:.2})", similarity)
            }
            Rejection::NoVolumeEvidence { similarity } => {
                write!(f, "no volume evidence (title similarity {:.2})", similarity)
            }
        }
    }
}

/// Rejection pipeline applied to every volume candidate.
#[derive(Debug, Clone)]
pub struct VolumeAcceptanceFilter {
    /// Candidates below this title similarity are rejected outright.
    pub min_title_similarity: f64,
    /// Title similarity at which an author disagreement is forgiven.
    pub author_bypass_similarity: f64,
    /// Title similarity a comics-category hit needs without a volume marker.
    pub category_similarity: f64,
}

impl Default for VolumeAcceptanceFilter {
    fn default() -> Self {
        Self {
            min_title_similarity: 0.7,
            author_bypass_similarity: 0.9,
            category_similarity: 0.8,
        }
    }
}

impl VolumeAcceptanceFilter {
    /// Runs the checks in order and stops at the first failure.
    ///
    /// Returns the title similarity on acceptance.
    pub fn evaluate(
        &self,
        candidate: &VolumeCandidate,
        target_title: &str,
        target_author: Option<&str>,
    ) -> Result<f64, Rejection> {
        let title = match candidate.title.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => return Err(Rejection::MissingTitle),
        };

        let score = similarity(target_title, title);
        if score < self.min_title_similarity {
            return Err(Rejection::TitleMismatch { similarity: score });
        }

        if let Some(author) = target_author {
            if !candidate.authors.is_empty()
                && !authors_agree(author, &candidate.authors)
                && score < self.author_bypass_similarity
            {
                return Err(Rejection::AuthorMismatch { similarity: score });
            }
        }

        let lowered = title.to_lowercase();
        let has_volume_indicator = VOLUME_INDICATORS.iter().any(|m| lowered.contains(m))
            || candidate
                .print_type
                .as_deref()
                .is_some_and(|p| p.eq_ignore_ascii_case("book"));
        let is_comic_category = candidate.categories.iter().any(|c| {
            let c = c.to_lowercase();
            COMIC_CATEGORIES.iter().any(|term| c.contains(term))
        });

        if has_volume_indicator || (is_comic_category && score > self.category_similarity) {
            Ok(score)
        } else {
            Err(Rejection::NoVolumeEvidence { similarity: score })
        }
    }

    pub fn accepts(
        &self,
        candidate: &VolumeCandidate,
        target_title: &str,
        target_author: Option<&str>,
    ) -> bool {
        self.evaluate(candidate, target_title, target_author).is_ok()
    }
}

fn authors_agree(author: &str, candidates: &[String]) -> bool {
    let author = author.to_lowercase();
    candidates.iter().any(|c| {
        let c = c.to_lowercase();
        c.contains(&author) || author.contains(&c)
    })
}
