#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geocoding for dispatch incident locations.
//!
//! Dispatch locations are free text ("2853 NW Market St", "5th Ave / Pine
//! St") rather than structured addresses, so they are resolved with a
//! natural-language place search biased toward the service area:
//!
//! - [`PlaceSearch`] is the external resolver seam.
//!   [`nominatim::NominatimSearch`] implements it against Nominatim /
//!   `OpenStreetMap`.
//! - [`query`] turns raw location text into a search query.
//! - [`cache::GeocodeCache`] memoizes successful resolutions by exact
//!   location text for the lifetime of the process.

pub mod cache;
pub mod nominatim;
pub mod query;

use async_trait::async_trait;
use thiserror::Error;

pub use dispatch_geocoder_models::{Coordinate, Region, RegionSpan, ResolvedLocation};

/// Errors from geocoding operations.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response parsing failed.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimited,
}

/// A natural-language place search service.
#[async_trait]
pub trait PlaceSearch: Send + Sync {
    /// Short provider name for log messages (e.g. `"nominatim"`).
    fn name(&self) -> &str;

    /// Searches for `query`, preferring results inside `region`.
    ///
    /// Returns candidate coordinates in the service's ranking order. An
    /// empty result means the service found nothing.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] if the service could not be queried.
    async fn search(&self, query: &str, region: &Region) -> Result<Vec<Coordinate>, GeocodeError>;
}
