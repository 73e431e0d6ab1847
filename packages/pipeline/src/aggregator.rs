//! Resolved incident locations and the map display region.
//!
//! [`LocationAggregator::fetch_all`] resolves every incident of the current
//! snapshot through the shared [`GeocodeCache`] with bounded concurrency and
//! merges each success into a store keyed by [`LocationKey`]. The store only
//! ever holds one generation: results for an older generation are discarded
//! and the first result of a newer one clears it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dispatch_feed_models::LocationKey;
use dispatch_geocoder::cache::GeocodeCache;
use dispatch_geocoder_models::{Region, ResolvedLocation};
use futures::stream::{self, StreamExt as _};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::fetcher::DataFetcher;

/// Counts from one [`LocationAggregator::fetch_all`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveSummary {
    /// Generation of the snapshot that was resolved.
    pub generation: u64,
    /// Locations merged into the store.
    pub resolved: usize,
    /// Incidents the geocoder found no match for.
    pub unresolved: usize,
    /// Lookups that failed.
    pub failed: usize,
    /// Resolutions dropped because a newer generation reached the store
    /// first.
    pub discarded: usize,
}

#[derive(Debug, Default)]
struct Store {
    generation: u64,
    locations: BTreeMap<LocationKey, ResolvedLocation>,
}

/// Resolves incident locations and publishes the resolved set.
pub struct LocationAggregator {
    fetcher: Arc<DataFetcher>,
    cache: Arc<GeocodeCache>,
    concurrency: usize,
    started: AtomicBool,
    store: Mutex<Store>,
    locations_tx: watch::Sender<Arc<Vec<ResolvedLocation>>>,
    region_tx: watch::Sender<Region>,
    default_region: Region,
}

impl std::fmt::Debug for LocationAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationAggregator")
            .field("concurrency", &self.concurrency)
            .field("started", &self.started.load(Ordering::SeqCst))
            .field("resolved", &self.locations_tx.borrow().len())
            .field("region", &*self.region_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl LocationAggregator {
    /// Creates an aggregator over `fetcher`'s snapshots. The published
    /// region starts at `default_region`.
    #[must_use]
    pub fn new(
        fetcher: Arc<DataFetcher>,
        cache: Arc<GeocodeCache>,
        concurrency: usize,
        default_region: Region,
    ) -> Self {
        let (locations_tx, _) = watch::channel(Arc::new(Vec::new()));
        let (region_tx, _) = watch::channel(default_region);

        Self {
            fetcher,
            cache,
            concurrency: concurrency.max(1),
            started: AtomicBool::new(false),
            store: Mutex::new(Store::default()),
            locations_tx,
            region_tx,
            default_region,
        }
    }

    /// Subscribes to the resolved set, ordered by [`LocationKey`].
    #[must_use]
    pub fn locations(&self) -> watch::Receiver<Arc<Vec<ResolvedLocation>>> {
        self.locations_tx.subscribe()
    }

    /// The most recently published resolved set.
    #[must_use]
    pub fn current(&self) -> Arc<Vec<ResolvedLocation>> {
        Arc::clone(&self.locations_tx.borrow())
    }

    /// Resolves every incident in the fetcher's current snapshot.
    ///
    /// Lookups run `concurrency` at a time and complete in any order; each
    /// success is merged and published as soon as it arrives. Lookup
    /// failures are logged and counted, never propagated.
    pub async fn fetch_all(&self) -> ResolveSummary {
        let snapshot = self.fetcher.current();
        let generation = snapshot.generation;
        self.advance(generation);

        log::info!(
            "Resolving {} incident locations for generation {generation} (concurrency={})",
            snapshot.len(),
            self.concurrency
        );

        let mut summary = ResolveSummary {
            generation,
            ..ResolveSummary::default()
        };

        let cache = Arc::clone(&self.cache);
        let lookups = stream::iter(snapshot.incidents.clone().into_iter().map(move |incident| {
            let cache = Arc::clone(&cache);
            async move {
                let result = cache.lookup(&incident).await;
                (incident, result)
            }
        }))
        .buffer_unordered(self.concurrency);
        let mut lookups = std::pin::pin!(lookups);

        while let Some((incident, result)) = lookups.next().await {
            match result {
                Ok(Some(location)) => {
                    if self.merge(location) {
                        summary.resolved += 1;
                    } else {
                        summary.discarded += 1;
                    }
                }
                Ok(None) => {
                    log::debug!(
                        "No location for row {} ('{}')",
                        incident.id,
                        incident.location_text
                    );
                    summary.unresolved += 1;
                }
                Err(e) => {
                    log::warn!(
                        "Geocoding row {} ('{}') failed: {e}",
                        incident.id,
                        incident.location_text
                    );
                    summary.failed += 1;
                }
            }
        }

        log::info!(
            "Generation {generation}: {} resolved, {} unresolved, {} failed, {} discarded",
            summary.resolved,
            summary.unresolved,
            summary.failed,
            summary.discarded
        );

        summary
    }

    /// Starts the initial resolve pass once.
    ///
    /// The first call spawns a task that waits for the first published
    /// fetch and then runs [`Self::fetch_all`]. Returns `true` if this call
    /// started it; later calls do nothing and return `false`.
    pub fn ensure_started(self: &Arc<Self>) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            return false;
        }

        let aggregator = Arc::clone(self);
        tokio::spawn(async move {
            let mut rx = aggregator.fetcher.subscribe();
            let ready = rx.wait_for(|snapshot| snapshot.generation > 0).await.is_ok();
            if !ready {
                log::warn!("Feed publisher closed before the first fetch");
                return;
            }
            aggregator.fetch_all().await;
        });

        true
    }

    /// Spawns a deliberate [`Self::fetch_all`] pass.
    pub fn refresh(self: &Arc<Self>) -> JoinHandle<ResolveSummary> {
        let aggregator = Arc::clone(self);
        tokio::spawn(async move { aggregator.fetch_all().await })
    }

    /// Subscribes to the map display region.
    #[must_use]
    pub fn region(&self) -> watch::Receiver<Region> {
        self.region_tx.subscribe()
    }

    #[must_use]
    pub fn current_region(&self) -> Region {
        *self.region_tx.borrow()
    }

    /// Replaces the display region, e.g. after the user pans the map.
    pub fn set_region(&self, region: Region) {
        self.region_tx.send_replace(region);
    }

    /// Zooms the display region onto a single marker.
    pub fn focus_on(&self, location: &ResolvedLocation) {
        self.set_region(location.marker_region());
    }

    /// Restores the configured default display region.
    pub fn reset_region(&self) {
        self.set_region(self.default_region);
    }

    /// Moves the store to `generation`, clearing it if that is newer than
    /// what it holds.
    fn advance(&self, generation: u64) {
        let mut store = self.lock_store();
        if generation > store.generation {
            self.reset(&mut store, generation);
        }
    }

    /// Merges one resolution. Returns `false` if it belongs to an older
    /// generation than the store holds and was discarded.
    fn merge(&self, location: ResolvedLocation) -> bool {
        let mut store = self.lock_store();
        let generation = location.incident.generation;

        if generation < store.generation {
            log::debug!(
                "Discarding stale location {} (store is at generation {})",
                location.key(),
                store.generation
            );
            return false;
        }
        if generation > store.generation {
            self.reset(&mut store, generation);
        }

        store.locations.insert(location.key(), location);
        self.publish(&store);
        true
    }

    fn reset(&self, store: &mut Store, generation: u64) {
        log::debug!(
            "Location store moving from generation {} to {generation}",
            store.generation
        );
        store.generation = generation;
        store.locations.clear();
        self.publish(store);
    }

    /// Publishes the store's key-ordered projection. Called with the store
    /// lock held so publications follow merge order.
    fn publish(&self, store: &Store) {
        self.locations_tx
            .send_replace(Arc::new(store.locations.values().cloned().collect()));
    }

    fn lock_store(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
