//! Fuzzy text matching shared by ingestion and the outlier audit.
//!
//! Titles are compared after [`normalize_title`] with a Ratcliff/Obershelp
//! ("gestalt pattern matching") ratio. Containment of one normalized title in
//! the other floors the score at [`CONTAINMENT_FLOOR`], which is what lets
//! "Berserk" match "Berserk Deluxe Edition".

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Minimum score granted when one string contains the other.
pub const CONTAINMENT_FLOOR: f64 = 0.85;

static VOLUME_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Vol\.?\s*\d+|Volume\s+\d+|Book\s+\d+|#\d+").expect("static marker pattern")
});
static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("static punctuation pattern"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static whitespace pattern"));

fn normalize_once(title: &str) -> String {
    let stripped = VOLUME_MARKER.replace_all(title, "");
    let stripped = NON_WORD.replace_all(&stripped, "");
    let collapsed = WHITESPACE.replace_all(&stripped, " ");
    collapsed.to_lowercase().trim().to_string()
}

/// Canonicalizes a title for comparison.
///
/// Volume markers ("Vol. 5", "Volume 3", "Book 4", "#7") are removed, then
/// punctuation, then whitespace is collapsed and the result lowercased.
/// Stripping punctuation can expose a new marker ("Vol-5" becomes "Vol5"),
/// so the pass repeats until the output is stable; this makes the function
/// idempotent.
///
/// # Examples
///
/// ```
/// use tankobon_core::matching::normalize_title;
///
/// assert_eq!(normalize_title("One Piece, Vol. 5"), "one piece");
/// assert_eq!(normalize_title("  Dr.  STONE #12 "), "dr stone");
/// ```
pub fn normalize_title(title: &str) -> String {
    let mut current = normalize_once(title);
    loop {
        let next = normalize_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Symmetric similarity in `[0, 1]` between two titles.
///
/// Both inputs are normalized first; an empty side scores 0. The base score
/// is the gestalt ratio `2·M / (|a| + |b|)`, floored at [`CONTAINMENT_FLOOR`]
/// when one normalized string contains the other.
///
/// # Examples
///
/// ```
/// use tankobon_core::matching::similarity;
///
/// assert_eq!(similarity("One Piece", "one piece!!"), 1.0);
/// assert!(similarity("Berserk", "Berserk Deluxe Edition") >= 0.85);
/// assert_eq!(similarity("", "Berserk"), 0.0);
/// ```
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize_title(a);
    let b = normalize_title(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let score = gestalt_ratio(&a, &b);
    if a.contains(&b) || b.contains(&a) {
        score.max(CONTAINMENT_FLOOR)
    } else {
        score
    }
}

/// Ratcliff/Obershelp ratio over characters.
///
/// The pair is put in a canonical order first: longest-match tie breaking
/// depends on argument order, and the ratio must not.
pub fn gestalt_ratio(a: &str, b: &str) -> f64 {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    let x: Vec<char> = first.chars().collect();
    let y: Vec<char> = second.chars().collect();
    let total = x.len() + y.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matched_chars(&x, &y) as f64 / total as f64
}

/// Total size of the matching blocks found by recursively taking the longest
/// common substring and recursing into the unmatched prefix and suffix.
fn matched_chars(a: &[char], b: &[char]) -> usize {
    let mut matched = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];

    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, size) = longest_common_block(a, b, alo, ahi, blo, bhi);
        if size == 0 {
            continue;
        }
        matched += size;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + size < ahi && j + size < bhi {
            pending.push((i + size, ahi, j + size, bhi));
        }
    }

    matched
}

/// Longest common substring of `a[alo..ahi]` and `b[blo..bhi]`.
///
/// Ties go to the earliest start in `a`, then in `b`.
fn longest_common_block(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let width = bhi - blo;
    let mut best = (alo, blo, 0);
    let mut prev = vec![0usize; width + 1];
    let mut curr = vec![0usize; width + 1];

    for i in alo..ahi {
        for j in blo..bhi {
            let col = j - blo + 1;
            if a[i] == b[j] {
                let len = prev[col - 1] + 1;
                curr[col] = len;
                if len > best.2 {
                    best = (i + 1 - len, j + 1 - len, len);
                }
            } else {
                curr[col] = 0;
            }
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    best
}

/// Outcome of matching a free-text name against the trusted catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub matched_name: String,
    pub score: f64,
}

/// Finds the catalog entry closest to `candidate`.
///
/// Every entry is scored with [`similarity`]; a case-insensitive substring
/// relation between the raw strings floors the score at
/// [`CONTAINMENT_FLOOR`]. The first entry reaching the maximum wins. Nothing
/// is returned below `threshold`.
pub fn match_name(candidate: &str, catalog: &[String], threshold: f64) -> Option<MatchResult> {
    let needle = candidate.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    let mut best: Option<(&str, f64)> = None;
    for entry in catalog {
        let hay = entry.trim().to_lowercase();
        if hay.is_empty() {
            continue;
        }

        let mut score = similarity(candidate, entry);
        if hay.contains(&needle) || needle.contains(&hay) {
            score = score.max(CONTAINMENT_FLOOR);
        }

        if score > best.map_or(0.0, |(_, s)| s) {
            best = Some((entry.as_str(), score));
        }
    }

    best.filter(|(_, score)| *score >= threshold)
        .map(|(name, score)| MatchResult {
            matched_name: name.to_string(),
            score,
        })
}

/// Read-only snapshot of the trusted publisher names.
///
/// Loaded once at pipeline start and never mutated afterwards.
///
/// # Examples
///
/// ```
/// use tankobon_core::matching::PublisherCatalog;
///
/// let catalog = PublisherCatalog::new(vec!["Viz Media".into(), "Kodansha".into()]);
/// let hit = catalog.best_match("VIZ", 0.8).unwrap();
/// assert_eq!(hit.matched_name, "Viz Media");
/// assert!(catalog.best_match("Penguin", 0.8).is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct PublisherCatalog {
    names: Vec<String>,
}

impl PublisherCatalog {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn best_match(&self, candidate: &str, threshold: f64) -> Option<MatchResult> {
        match_name(candidate, &self.names, threshold)
    }
}
