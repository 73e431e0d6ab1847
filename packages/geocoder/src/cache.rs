//! In-memory geocode cache keyed by exact location text.
//!
//! Only successful resolutions are stored. "No match" and resolver errors
//! leave the slot empty so the next lookup asks the resolver again.
//! Concurrent misses for the same text share one resolver call: the first
//! caller resolves while the others wait on the same slot.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use dispatch_feed_models::Incident;
use tokio::sync::OnceCell;

use crate::query::build_search_query;
use crate::{Coordinate, GeocodeError, PlaceSearch, Region, ResolvedLocation};

/// Why a slot was left empty.
enum Miss {
    NotFound,
    Failed(GeocodeError),
}

/// Memoizing front for a [`PlaceSearch`].
///
/// One instance is shared (via [`Arc`]) by every consumer in the process.
pub struct GeocodeCache {
    search: Arc<dyn PlaceSearch>,
    bias_region: Region,
    locality: Option<String>,
    slots: Mutex<BTreeMap<String, Arc<OnceCell<Coordinate>>>>,
}

impl std::fmt::Debug for GeocodeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeocodeCache")
            .field("search", &self.search.name())
            .field("bias_region", &self.bias_region)
            .field("locality", &self.locality)
            .field("entries", &self.len())
            .finish()
    }
}

impl GeocodeCache {
    /// Creates an empty cache that resolves misses with `search`, biased
    /// toward `bias_region`.
    #[must_use]
    pub fn new(search: Arc<dyn PlaceSearch>, bias_region: Region) -> Self {
        Self {
            search,
            bias_region,
            locality: None,
            slots: Mutex::new(BTreeMap::new()),
        }
    }

    /// Sets a locality (e.g. `"Seattle, WA"`) appended to search queries.
    #[must_use]
    pub fn with_locality(mut self, locality: Option<String>) -> Self {
        self.locality = locality;
        self
    }

    /// Region resolver queries are biased toward.
    #[must_use]
    pub const fn bias_region(&self) -> &Region {
        &self.bias_region
    }

    /// Resolves an incident's location.
    ///
    /// On a hit the cached coordinate is paired with *this* incident, even
    /// if it was first resolved for a different one.
    ///
    /// Returns `Ok(None)` when the resolver found nothing.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] if the resolver call failed. Nothing is
    /// cached in that case.
    pub async fn lookup(
        &self,
        incident: &Incident,
    ) -> Result<Option<ResolvedLocation>, GeocodeError> {
        Ok(self
            .resolve(&incident.location_text)
            .await?
            .map(|coordinate| ResolvedLocation::new(incident.clone(), coordinate)))
    }

    /// Resolves raw location text to a coordinate.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] if the resolver call failed.
    pub async fn resolve(&self, location_text: &str) -> Result<Option<Coordinate>, GeocodeError> {
        let slot = self.slot(location_text);

        if let Some(coordinate) = slot.get() {
            log::debug!("Geocode cache hit: '{location_text}'");
            return Ok(Some(*coordinate));
        }

        match slot
            .get_or_try_init(|| self.resolve_uncached(location_text))
            .await
        {
            Ok(coordinate) => Ok(Some(*coordinate)),
            Err(Miss::NotFound) => Ok(None),
            Err(Miss::Failed(e)) => Err(e),
        }
    }

    /// Returns the cached coordinate for `location_text`, if any.
    #[must_use]
    pub fn cached(&self, location_text: &str) -> Option<Coordinate> {
        self.lock_slots()
            .get(location_text)
            .and_then(|slot| slot.get().copied())
    }

    /// Number of resolved entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_slots()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    /// Returns `true` if nothing has been resolved yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_slots(
        &self,
    ) -> std::sync::MutexGuard<'_, BTreeMap<String, Arc<OnceCell<Coordinate>>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, location_text: &str) -> Arc<OnceCell<Coordinate>> {
        let mut slots = self.lock_slots();
        if let Some(slot) = slots.get(location_text) {
            return Arc::clone(slot);
        }
        let slot = Arc::new(OnceCell::new());
        slots.insert(location_text.to_owned(), Arc::clone(&slot));
        slot
    }

    async fn resolve_uncached(&self, location_text: &str) -> Result<Coordinate, Miss> {
        let Some(query) = build_search_query(location_text, self.locality.as_deref()) else {
            log::debug!("Not geocodable: '{location_text}'");
            return Err(Miss::NotFound);
        };

        log::debug!("Looking up '{location_text}' via {}", self.search.name());

        let candidates = self
            .search
            .search(&query, &self.bias_region)
            .await
            .map_err(|e| {
                log::warn!("{} error for '{location_text}': {e}", self.search.name());
                Miss::Failed(e)
            })?;

        candidates.into_iter().next().map_or_else(
            || {
                log::debug!("{}: no match for '{location_text}'", self.search.name());
                Err(Miss::NotFound)
            },
            |coordinate| {
                log::debug!("Found '{location_text}' at {coordinate}");
                Ok(coordinate)
            },
        )
    }
}
