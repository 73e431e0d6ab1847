#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Dispatch incident records and label classification.
//!
//! An [`Incident`] is one row of the real-time 911 dispatch feed. Records
//! are produced in bulk by the feed parser and never mutated after they are
//! published. Each record carries the fetch generation that produced it so
//! that downstream consumers can key per-incident state by [`LocationKey`]
//! instead of the bare row position, which is reused on every fetch.

pub use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Identifies an incident across fetch cycles: the fetch generation that
/// produced it plus its row position within that fetch.
///
/// Ordering is by generation first, then row, so a key-ordered projection
/// of per-incident state follows feed order within a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocationKey {
    /// Fetch generation (0 for records that were parsed but never published).
    pub generation: u64,
    /// 0-based row position within the fetched feed.
    pub row: usize,
}

impl LocationKey {
    /// Creates a key from a generation and row position.
    #[must_use]
    pub const fn new(generation: u64, row: usize) -> Self {
        Self { generation, row }
    }
}

impl std::fmt::Display for LocationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.generation, self.row)
    }
}

/// One parsed dispatch event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    /// 0-based row position in the parsed feed. Unique within one fetch,
    /// not stable across fetches.
    pub id: usize,
    /// Fetch generation this record was published in.
    pub generation: u64,
    /// Whether the incident is currently in progress.
    pub is_active: bool,
    /// Dispatch time, in the dispatch center's local wall-clock time.
    pub timestamp: NaiveDateTime,
    /// External incident identifier from the feed (e.g. `"F200123456"`).
    pub incident_id: String,
    /// Response level reported by the feed.
    pub severity_level: u32,
    /// Responding unit codes in feed order.
    pub units: Vec<String>,
    /// Free-text address. Not guaranteed to be a complete postal address.
    pub location_text: String,
    /// Free-text incident type description (e.g. `"Aid Response"`).
    pub label: String,
}

impl Incident {
    /// Returns the cross-cycle key for this record.
    #[must_use]
    pub const fn key(&self) -> LocationKey {
        LocationKey::new(self.generation, self.id)
    }

    /// Returns a copy of this record stamped with `generation`.
    #[must_use]
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Classifies [`Self::label`] against [`ICON_RULES`].
    #[must_use]
    pub fn icon(&self) -> Option<IncidentIcon> {
        classify_label(&self.label)
    }

    /// Human-readable unit count, e.g. `"1 unit"` or `"3 units"`.
    #[must_use]
    pub fn unit_count_label(&self) -> String {
        match self.units.len() {
            1 => "1 unit".to_string(),
            n => format!("{n} units"),
        }
    }

    /// Unit codes joined with `", "`.
    #[must_use]
    pub fn units_joined(&self) -> String {
        self.units.join(", ")
    }
}

/// Map marker icon assigned to an incident by keyword classification.
///
/// The serialized form is the symbol name the presentation layer renders.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum IncidentIcon {
    /// Medical aid.
    #[serde(rename = "cross")]
    #[strum(serialize = "cross")]
    Cross,
    /// Any fire.
    #[serde(rename = "flame")]
    #[strum(serialize = "flame")]
    Flame,
    /// Motor vehicle incidents.
    #[serde(rename = "car")]
    #[strum(serialize = "car")]
    Car,
    /// Scenes involving violence.
    #[serde(rename = "exclamationmark.shield")]
    #[strum(serialize = "exclamationmark.shield")]
    Shield,
    /// Water rescue and water problems.
    #[serde(rename = "drop")]
    #[strum(serialize = "drop")]
    Drop,
    /// Investigations.
    #[serde(rename = "magnifyingglass")]
    #[strum(serialize = "magnifyingglass")]
    MagnifyingGlass,
    /// Low acuity responses.
    #[serde(rename = "person")]
    #[strum(serialize = "person")]
    Person,
    /// Electrical hazards.
    #[serde(rename = "bolt")]
    #[strum(serialize = "bolt")]
    Bolt,
}

/// A single classification rule: if the label contains any of `keywords`
/// (case-insensitive), the incident gets `icon`.
#[derive(Debug, Clone, Copy)]
pub struct IconRule {
    /// Lowercase substrings, any of which triggers the rule.
    pub keywords: &'static [&'static str],
    /// Icon assigned when the rule matches.
    pub icon: IncidentIcon,
}

impl IconRule {
    /// Returns `true` if `lowercase_label` contains any keyword.
    #[must_use]
    pub fn matches(&self, lowercase_label: &str) -> bool {
        self.keywords.iter().any(|k| lowercase_label.contains(k))
    }
}

/// Ordered classification table. Evaluated top to bottom; first match wins,
/// so "Motor Vehicle Fire" is a [`IncidentIcon::Flame`].
pub const ICON_RULES: &[IconRule] = &[
    IconRule {
        keywords: &["aid response", "medic response"],
        icon: IncidentIcon::Cross,
    },
    IconRule {
        keywords: &["fire"],
        icon: IncidentIcon::Flame,
    },
    IconRule {
        keywords: &["motor vehicle"],
        icon: IncidentIcon::Car,
    },
    IconRule {
        keywords: &["violence"],
        icon: IncidentIcon::Shield,
    },
    IconRule {
        keywords: &["water"],
        icon: IncidentIcon::Drop,
    },
    IconRule {
        keywords: &["investigate"],
        icon: IncidentIcon::MagnifyingGlass,
    },
    IconRule {
        keywords: &["low acuity"],
        icon: IncidentIcon::Person,
    },
    IconRule {
        keywords: &["wires down", "electric"],
        icon: IncidentIcon::Bolt,
    },
];

/// Classifies a free-text incident label into an icon.
///
/// Returns `None` when no rule matches; consumers fall back to showing the
/// severity level.
#[must_use]
pub fn classify_label(label: &str) -> Option<IncidentIcon> {
    let lower = label.to_lowercase();
    ICON_RULES
        .iter()
        .find(|rule| rule.matches(&lower))
        .map(|rule| rule.icon)
}
