//! Nominatim / `OpenStreetMap` place search client.
//!
//! The public instance allows **1 request per second** and requires an
//! identifying `User-Agent`. [`NominatimSearch`] enforces the configured
//! minimum interval between requests itself, so concurrent callers are
//! serialized rather than rejected.
//!
//! See <https://nominatim.org/release-docs/develop/api/Search/>

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{Coordinate, GeocodeError, PlaceSearch, Region};

/// Public Nominatim search endpoint.
pub const DEFAULT_BASE_URL: &str = "https://nominatim.openstreetmap.org/search";

/// Connection settings for [`NominatimSearch`].
#[derive(Debug, Clone)]
pub struct NominatimConfig {
    /// Search endpoint URL.
    pub base_url: String,
    /// Value of the `User-Agent` header.
    pub user_agent: String,
    /// Minimum delay between consecutive requests.
    pub rate_limit: Duration,
    /// Maximum candidates requested per search.
    pub result_limit: u32,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// [`PlaceSearch`] backed by a Nominatim instance.
#[derive(Debug)]
pub struct NominatimSearch {
    client: reqwest::Client,
    base_url: String,
    rate_limit: Duration,
    result_limit: u32,
    last_request: Mutex<Option<Instant>>,
}

impl NominatimSearch {
    /// Creates a client from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &NominatimConfig) -> Result<Self, GeocodeError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            rate_limit: config.rate_limit,
            result_limit: config.result_limit.max(1),
            last_request: Mutex::new(None),
        })
    }

    /// Waits until at least `rate_limit` has passed since the previous
    /// request, then records the current request time.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.rate_limit {
                tokio::time::sleep(self.rate_limit - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[async_trait]
impl PlaceSearch for NominatimSearch {
    fn name(&self) -> &'static str {
        "nominatim"
    }

    async fn search(&self, query: &str, region: &Region) -> Result<Vec<Coordinate>, GeocodeError> {
        self.throttle().await;

        let viewbox = viewbox_param(region);
        let limit = self.result_limit.to_string();

        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("q", query),
                ("viewbox", viewbox.as_str()),
                ("bounded", "0"),
                ("format", "jsonv2"),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GeocodeError::RateLimited);
        }

        let body: serde_json::Value = resp.error_for_status()?.json().await?;
        parse_response(&body)
    }
}

/// Formats a region as Nominatim's `viewbox=<x1>,<y1>,<x2>,<y2>` value
/// (west, north, east, south).
#[must_use]
pub fn viewbox_param(region: &Region) -> String {
    let bbox = region.bounding_box();
    format!(
        "{:.6},{:.6},{:.6},{:.6}",
        bbox.west, bbox.north, bbox.east, bbox.south
    )
}

/// Parses a Nominatim JSON response into candidate coordinates.
fn parse_response(body: &serde_json::Value) -> Result<Vec<Coordinate>, GeocodeError> {
    let results = body.as_array().ok_or_else(|| GeocodeError::Parse {
        message: "Nominatim response is not an array".to_string(),
    })?;

    results
        .iter()
        .map(|result| {
            let lat = result["lat"]
                .as_str()
                .and_then(|s| s.parse::<f64>().ok())
                .ok_or_else(|| GeocodeError::Parse {
                    message: "Missing lat in Nominatim response".to_string(),
                })?;

            let lon = result["lon"]
                .as_str()
                .and_then(|s| s.parse::<f64>().ok())
                .ok_or_else(|| GeocodeError::Parse {
                    message: "Missing lon in Nominatim response".to_string(),
                })?;

            Ok(Coordinate::new(lat, lon))
        })
        .collect()
}
