//! The process-wide dispatch context.
//!
//! One [`DispatchContext`] is built at startup and shared via [`Arc`] by
//! every consumer. It owns the fetcher, the geocode cache and the location
//! aggregator, and exposes their published state as `watch` receivers.

use std::sync::{Arc, Mutex, PoisonError};

use dispatch_feed::FeedSource;
use dispatch_feed::http::HttpFeedSource;
use dispatch_feed_models::Incident;
use dispatch_geocoder::PlaceSearch;
use dispatch_geocoder::cache::GeocodeCache;
use dispatch_geocoder::nominatim::NominatimSearch;
use dispatch_geocoder_models::{Region, ResolvedLocation};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::DispatchError;
use crate::aggregator::{LocationAggregator, ResolveSummary};
use crate::config::DispatchConfig;
use crate::fetcher::{DataFetcher, FetchOutcome, IncidentSnapshot};

/// Shared application state for the dispatch pipeline.
///
/// Background tasks started by [`Self::start`] are aborted when the context
/// is dropped.
pub struct DispatchContext {
    config: DispatchConfig,
    fetcher: Arc<DataFetcher>,
    cache: Arc<GeocodeCache>,
    aggregator: Arc<LocationAggregator>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchContext")
            .field("fetcher", &self.fetcher)
            .field("cache", &self.cache)
            .field("aggregator", &self.aggregator)
            .finish_non_exhaustive()
    }
}

impl DispatchContext {
    /// Wires a context from explicit feed and search implementations.
    #[must_use]
    pub fn new(
        config: DispatchConfig,
        feed: Arc<dyn FeedSource>,
        search: Arc<dyn PlaceSearch>,
    ) -> Self {
        let fetcher = Arc::new(DataFetcher::new(feed, config.row_limit));
        let cache = Arc::new(
            GeocodeCache::new(search, config.bias_region())
                .with_locality(config.geocoder.locality.clone()),
        );
        let aggregator = Arc::new(LocationAggregator::new(
            Arc::clone(&fetcher),
            Arc::clone(&cache),
            config.geocode_concurrency,
            config.display_region(),
        ));

        Self {
            config,
            fetcher,
            cache,
            aggregator,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Wires a context against the live feed and Nominatim.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if an HTTP client cannot be built.
    pub fn from_config(config: DispatchConfig) -> Result<Self, DispatchError> {
        let feed = HttpFeedSource::new(
            &config.feed_url,
            config.request_timeout(),
            config.max_retries,
        )?;
        let search = NominatimSearch::new(&config.nominatim())?;

        log::debug!(
            "Feed: {}, geocoder: {}",
            feed.url(),
            config.geocoder.base_url
        );

        Ok(Self::new(config, Arc::new(feed), Arc::new(search)))
    }

    /// Starts the implicit first fetch and, if configured, the periodic
    /// refresh loop. Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(self) -> Arc<Self> {
        let fetcher = Arc::clone(&self.fetcher);
        let initial = tokio::spawn(async move {
            fetcher.fetch_now().await;
        });

        let mut handles = vec![initial];
        if let Some(period) = self.config.refresh_interval() {
            handles.push(self.fetcher.spawn_refresh_loop(period));
        }
        self.lock_tasks().extend(handles);

        Arc::new(self)
    }

    /// The configuration the context was built from.
    #[must_use]
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// The shared geocode cache.
    #[must_use]
    pub fn cache(&self) -> &GeocodeCache {
        &self.cache
    }

    /// Subscribes to published incident snapshots.
    #[must_use]
    pub fn incidents(&self) -> watch::Receiver<Arc<IncidentSnapshot>> {
        self.fetcher.subscribe()
    }

    /// The latest published snapshot. Empty with generation 0 until the
    /// first fetch succeeds.
    #[must_use]
    pub fn current_incidents(&self) -> Arc<IncidentSnapshot> {
        self.fetcher.current()
    }

    /// Subscribes to the resolved location set.
    #[must_use]
    pub fn locations(&self) -> watch::Receiver<Arc<Vec<ResolvedLocation>>> {
        self.aggregator.locations()
    }

    /// The resolved locations for the current generation, in row order.
    #[must_use]
    pub fn current_locations(&self) -> Arc<Vec<ResolvedLocation>> {
        self.aggregator.current()
    }

    /// Subscribes to the map display region.
    #[must_use]
    pub fn region(&self) -> watch::Receiver<Region> {
        self.aggregator.region()
    }

    /// Replaces the map display region.
    pub fn set_region(&self, region: Region) {
        self.aggregator.set_region(region);
    }

    /// Zooms the display region to `location`'s marker region.
    pub fn focus_on(&self, location: &ResolvedLocation) {
        self.aggregator.focus_on(location);
    }

    /// Restores the configured display region.
    pub fn reset_region(&self) {
        self.aggregator.reset_region();
    }

    /// Fetches the feed now. See [`DataFetcher::fetch_now`].
    pub async fn fetch_now(&self) -> FetchOutcome {
        self.fetcher.fetch_now().await
    }

    /// Starts the initial location resolve once. See
    /// [`LocationAggregator::ensure_started`].
    pub fn ensure_locations_started(&self) -> bool {
        self.aggregator.ensure_started()
    }

    /// Re-resolves the current snapshot's locations in the background.
    pub fn refresh_locations(&self) -> JoinHandle<ResolveSummary> {
        self.aggregator.refresh()
    }

    /// Resolves a single incident through the shared cache without touching
    /// the published location set.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Geocode`] if the lookup failed.
    pub async fn lookup_single(
        &self,
        incident: &Incident,
    ) -> Result<Option<ResolvedLocation>, DispatchError> {
        self.cache
            .lookup(incident)
            .await
            .map_err(DispatchError::from)
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for DispatchContext {
    fn drop(&mut self) {
        for handle in self.lock_tasks().drain(..) {
            handle.abort();
        }
    }
}
