//! HTML feed row parser.
//!
//! Rows are located by id (`row_<n>`, 1-based) rather than by walking the
//! table, matching how the dispatch page addresses them. Each row's element
//! children are, in order: timestamp (carrying the `active` class when the
//! incident is in progress), incident id, level, units, location, type.
//!
//! Parsing is a pure function of the document and the row bound.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use dispatch_feed_models::Incident;
use scraper::{ElementRef, Html, Selector};

/// Format of the timestamp cell, e.g. `"11/25/2020 8:21:21 PM"`.
pub const TIMESTAMP_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

/// CSS class marking an in-progress incident.
pub const ACTIVE_CLASS: &str = "active";

/// Number of cells a row must have to be parsed.
const CELL_COUNT: usize = 6;

static ROW_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"[id^="row_"]"#).expect("valid selector"));

static ACTIVE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".active").expect("valid selector"));

/// Why a present row could not be turned into an [`Incident`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowError {
    /// The row had fewer cells than the feed layout requires.
    #[error("expected {CELL_COUNT} cells, found {found}")]
    TooFewCells {
        /// Number of element children found.
        found: usize,
    },

    /// The level cell was not a non-negative integer.
    #[error("invalid level '{value}'")]
    InvalidSeverity {
        /// Raw cell text.
        value: String,
    },

    /// The timestamp cell did not match [`TIMESTAMP_FORMAT`].
    #[error("invalid timestamp '{value}': {message}")]
    InvalidTimestamp {
        /// Raw cell text.
        value: String,
        /// Underlying chrono parse error.
        message: String,
    },
}

/// A row that was present in the document but skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    /// 0-based row position.
    pub row: usize,
    /// What was wrong with it.
    pub reason: RowError,
}

/// Result of parsing one feed document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedParse {
    /// Successfully parsed records in ascending row order.
    pub incidents: Vec<Incident>,
    /// Rows that were present but malformed.
    pub failures: Vec<RowFailure>,
    /// Number of row positions within the bound that had no element.
    pub missing: usize,
}

/// Parses up to `row_limit` rows (`row_1` ..= `row_<row_limit>`) from a
/// dispatch feed document.
///
/// Never fails as a whole: absent rows are counted in
/// [`FeedParse::missing`], malformed rows are logged and recorded in
/// [`FeedParse::failures`].
#[must_use]
pub fn parse_feed(body: &str, row_limit: usize) -> FeedParse {
    let document = Html::parse_document(body);

    let mut rows: BTreeMap<&str, ElementRef<'_>> = BTreeMap::new();
    for element in document.select(&ROW_SELECTOR) {
        if let Some(id) = element.value().id() {
            rows.entry(id).or_insert(element);
        }
    }

    let mut result = FeedParse::default();

    for row in 0..row_limit {
        let id = format!("row_{}", row + 1);
        let Some(element) = rows.get(id.as_str()) else {
            result.missing += 1;
            continue;
        };

        match parse_row(row, *element) {
            Ok(incident) => result.incidents.push(incident),
            Err(reason) => {
                log::warn!("Skipping feed row {row} ({id}): {reason}");
                result.failures.push(RowFailure { row, reason });
            }
        }
    }

    log::debug!(
        "Parsed {} incidents ({} malformed, {} missing) from {} row slots",
        result.incidents.len(),
        result.failures.len(),
        result.missing,
        row_limit
    );

    result
}

fn parse_row(row: usize, element: ElementRef<'_>) -> Result<Incident, RowError> {
    let cells: Vec<ElementRef<'_>> = element.child_elements().collect();
    if cells.len() < CELL_COUNT {
        return Err(RowError::TooFewCells { found: cells.len() });
    }

    let severity_text = cell_text(cells[2]);
    let severity_level = severity_text
        .parse::<u32>()
        .map_err(|_| RowError::InvalidSeverity {
            value: severity_text.clone(),
        })?;

    let timestamp_text = cell_text(cells[0]);
    let timestamp = NaiveDateTime::parse_from_str(&timestamp_text, TIMESTAMP_FORMAT).map_err(
        |e| RowError::InvalidTimestamp {
            value: timestamp_text.clone(),
            message: e.to_string(),
        },
    )?;

    Ok(Incident {
        id: row,
        generation: 0,
        is_active: is_active(cells[0]),
        timestamp,
        incident_id: cell_text(cells[1]),
        severity_level,
        units: split_units(&cell_text(cells[3])),
        location_text: cell_text(cells[4]),
        label: cell_text(cells[5]),
    })
}

/// Concatenated text of a cell with whitespace runs collapsed.
fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_active(cell: ElementRef<'_>) -> bool {
    cell.value().classes().any(|c| c == ACTIVE_CLASS)
        || cell.select(&ACTIVE_SELECTOR).next().is_some()
}

/// Splits a unit cell on whitespace, dropping empty segments.
#[must_use]
pub fn split_units(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}
