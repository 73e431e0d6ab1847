//! In-process fakes shared by the pipeline tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dispatch_feed::{FeedError, FeedSource};
use dispatch_geocoder::{GeocodeError, PlaceSearch};
use dispatch_geocoder_models::{Coordinate, Region};

/// One scripted feed response.
struct Step {
    delay: Duration,
    body: Option<String>,
}

/// Feed source that replays scripted responses in call order, then keeps
/// returning `fallback`.
pub struct ScriptedFeed {
    calls: AtomicUsize,
    steps: Mutex<VecDeque<Step>>,
    fallback: String,
}

impl ScriptedFeed {
    pub fn new(fallback: String) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            steps: Mutex::new(VecDeque::new()),
            fallback,
        }
    }

    /// Queues a successful response delivered after `delay`.
    pub fn then(self, delay: Duration, body: String) -> Self {
        self.steps.lock().unwrap().push_back(Step {
            delay,
            body: Some(body),
        });
        self
    }

    /// Queues a failed response delivered after `delay`.
    pub fn then_fail(self, delay: Duration) -> Self {
        self.steps
            .lock()
            .unwrap()
            .push_back(Step { delay, body: None });
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedSource for ScriptedFeed {
    fn describe(&self) -> &'static str {
        "scripted feed"
    }

    async fn fetch(&self) -> Result<String, FeedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().unwrap().pop_front();
        let Some(step) = step else {
            return Ok(self.fallback.clone());
        };

        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }

        step.body.ok_or_else(|| FeedError::Status {
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            url: "scripted".to_string(),
        })
    }
}

/// Place search answering from a fixed query table. Unknown queries find
/// nothing.
#[derive(Default)]
pub struct MapSearch {
    coordinates: BTreeMap<String, Coordinate>,
    delays: BTreeMap<String, Duration>,
    failing: BTreeSet<String>,
    calls: AtomicUsize,
}

impl MapSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, query: &str, latitude: f64, longitude: f64) -> Self {
        self.coordinates
            .insert(query.to_string(), Coordinate::new(latitude, longitude));
        self
    }

    pub fn with_delay(mut self, query: &str, delay: Duration) -> Self {
        self.delays.insert(query.to_string(), delay);
        self
    }

    pub fn failing(mut self, query: &str) -> Self {
        self.failing.insert(query.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaceSearch for MapSearch {
    fn name(&self) -> &'static str {
        "map"
    }

    async fn search(
        &self,
        query: &str,
        _region: &Region,
    ) -> Result<Vec<Coordinate>, GeocodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(query) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(query) {
            return Err(GeocodeError::RateLimited);
        }
        Ok(self.coordinates.get(query).copied().into_iter().collect())
    }
}

/// One well-formed feed row at position `n` (1-based).
pub fn feed_row(n: usize, incident_id: &str, location: &str, label: &str) -> String {
    format!(
        r#"<tr id="row_{n}"><td>11/25/2020 8:21:21 PM</td><td>{incident_id}</td><td>1</td><td>E1</td><td>{location}</td><td>{label}</td></tr>"#
    )
}

pub fn feed_body(rows: &[String]) -> String {
    format!(
        "<html><body><table>{}</table></body></html>",
        rows.concat()
    )
}

/// Three-row page: an active aid response, a collision and a fire.
pub fn sample_feed() -> String {
    feed_body(&[
        r#"<tr id="row_1"><td class="active">11/25/2020 8:21:21 PM</td><td>F200123456</td><td>1</td><td>M16 E16</td><td>2853 NW Market St</td><td>Aid Response</td></tr>"#.to_string(),
        r#"<tr id="row_2"><td>11/25/2020 7:59:02 PM</td><td>F200123455</td><td>1</td><td>E2  L6 </td><td>5th Ave / Pine St</td><td>Motor Vehicle Collision</td></tr>"#.to_string(),
        r#"<tr id="row_3"><td>11/25/2020 7:40:10 AM</td><td>F200123454</td><td>2</td><td>E10 E25 L9 B5 SAFT2</td><td>1100 3rd Ave</td><td>Structure Fire</td></tr>"#.to_string(),
    ])
}

/// Search table resolving every location in [`sample_feed`].
pub fn sample_search() -> MapSearch {
    MapSearch::new()
        .with("2853 NW Market St", 47.668_6, -122.391_5)
        .with("5th Ave & Pine St", 47.611_6, -122.336_2)
        .with("1100 3rd Ave", 47.606_2, -122.334_4)
}
