//! Search query construction for dispatch location text.
//!
//! Dispatch locations come in a few shapes:
//! - Street addresses: `"2853 NW Market St"`
//! - Intersections: `"5th Ave / Pine St"`
//! - Block ranges: `"300 Block of Pike St"`
//! - Placeholders: `""`, `"UNKNOWN"`
//!
//! This module normalizes them into a free-form query. The cache key stays
//! the raw location text; only the query sent to the resolver changes.

use std::sync::LazyLock;

use regex::Regex;

/// Regex for "BLOCK OF" / "BLK OF" noise.
static BLOCK_OF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+(?:BLOCK|BLK)\s+OF\s+").expect("valid regex"));

/// Intersection separators, normalized to `" & "`.
static INTERSECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*/\s*").expect("valid regex"));

/// Location text that cannot be geocoded.
static SKIP_PATTERNS: &[&str] = &["UNKNOWN", "N/A", "NONE", "UNDETERMINED"];

/// Builds a place-search query from raw dispatch location text.
///
/// Returns `None` when the text is not geocodable. When `locality` is given
/// (e.g. `"Seattle, WA"`) it is appended unless the text already mentions
/// it.
#[must_use]
pub fn build_search_query(location_text: &str, locality: Option<&str>) -> Option<String> {
    let collapsed = location_text.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.is_empty()
        || SKIP_PATTERNS
            .iter()
            .any(|p| collapsed.eq_ignore_ascii_case(p))
    {
        return None;
    }

    let query = BLOCK_OF_RE.replace_all(&collapsed, " ");
    let query = INTERSECTION_RE.replace_all(&query, " & ");
    let query = query.trim();

    if query.is_empty() || query == "&" {
        return None;
    }

    let query = match locality.map(str::trim).filter(|l| !l.is_empty()) {
        Some(locality) if !mentions(query, locality) => format!("{query}, {locality}"),
        _ => query.to_string(),
    };

    Some(query)
}

/// Returns `true` if `query` already contains the first component of
/// `locality` (the city name), ignoring case.
fn mentions(query: &str, locality: &str) -> bool {
    let city = locality.split(',').next().unwrap_or(locality).trim();
    !city.is_empty() && query.to_lowercase().contains(&city.to_lowercase())
}
