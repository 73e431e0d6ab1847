#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Dispatch data pipeline.
//!
//! Wires the feed, the geocode cache and the published application state
//! together:
//!
//! - [`fetcher::DataFetcher`] retrieves and parses the feed and publishes
//!   whole [`fetcher::IncidentSnapshot`]s, newest generation wins.
//! - [`aggregator::LocationAggregator`] resolves the current snapshot's
//!   locations through the shared cache and publishes the resolved set and
//!   the map display region.
//! - [`context::DispatchContext`] owns one of each, built once from a
//!   [`config::DispatchConfig`] and shared by every consumer.
//!
//! Published state lives in `tokio::sync::watch` channels, so observers
//! always see complete, immutable snapshots.

pub mod aggregator;
pub mod config;
pub mod context;
pub mod fetcher;

#[cfg(test)]
pub(crate) mod test_support;

pub use aggregator::{LocationAggregator, ResolveSummary};
pub use config::{ConfigError, DispatchConfig};
pub use context::DispatchContext;
pub use dispatch_feed::FeedError;
pub use dispatch_feed_models::{Incident, IncidentIcon, LocationKey, NaiveDateTime};
pub use dispatch_geocoder::GeocodeError;
pub use dispatch_geocoder_models::{Coordinate, Region, RegionSpan, ResolvedLocation};
pub use fetcher::{DataFetcher, FetchOutcome, IncidentSnapshot};

/// Errors surfaced by the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Feed retrieval failed.
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    /// Geocoding failed.
    #[error("Geocode error: {0}")]
    Geocode(#[from] GeocodeError),

    /// Configuration could not be loaded.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// A background task panicked or was cancelled.
    #[error("Task error: {0}")]
    Join(#[from] tokio::task::JoinError),
}
