//! Feed retrieval and snapshot publishing.
//!
//! Every [`DataFetcher::fetch_now`] call takes the next generation number
//! when it is issued. When its response has been parsed it is published only
//! if no newer generation was published in the meantime, so a slow response
//! can never overwrite a fresher one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dispatch_feed::{FeedSource, parser};
use dispatch_feed_models::Incident;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::DispatchError;

/// One complete, immutable incident collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncidentSnapshot {
    /// Fetch cycle that produced this collection; 0 before the first fetch.
    pub generation: u64,
    /// When the feed response was parsed.
    pub fetched_at: Option<DateTime<Utc>>,
    /// Parsed incidents in ascending row order.
    pub incidents: Vec<Incident>,
    /// Rows that were present in the page but malformed.
    pub skipped_rows: usize,
}

impl IncidentSnapshot {
    /// The state observers see before anything has been fetched.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of incidents that parsed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.incidents.len()
    }

    /// True before the first fetch and for a feed with no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.incidents.is_empty()
    }

    /// Returns the incident at 0-based row `row`, if it parsed.
    #[must_use]
    pub fn row(&self, row: usize) -> Option<&Incident> {
        self.incidents.iter().find(|incident| incident.id == row)
    }
}

/// What happened to one [`DataFetcher::fetch_now`] call.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The collection was published.
    Published {
        /// Generation the fetch was assigned.
        generation: u64,
        /// Incidents in the published collection.
        count: usize,
        /// Malformed rows that were skipped.
        skipped_rows: usize,
    },
    /// A newer generation was already published; this result was dropped.
    Superseded {
        /// Generation the fetch was assigned.
        generation: u64,
    },
    /// Retrieval failed; the previously published collection is unchanged.
    Failed {
        /// Generation the fetch was assigned.
        generation: u64,
        /// Why retrieval failed.
        error: DispatchError,
    },
}

impl FetchOutcome {
    /// Generation the fetch was assigned, whatever the outcome.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        match self {
            Self::Published { generation, .. }
            | Self::Superseded { generation }
            | Self::Failed { generation, .. } => *generation,
        }
    }

    /// Whether this fetch replaced the published collection.
    #[must_use]
    pub const fn is_published(&self) -> bool {
        matches!(self, Self::Published { .. })
    }
}

/// Retrieves the feed and publishes parsed snapshots.
pub struct DataFetcher {
    source: Arc<dyn FeedSource>,
    row_limit: usize,
    issued: AtomicU64,
    tx: watch::Sender<Arc<IncidentSnapshot>>,
}

impl std::fmt::Debug for DataFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFetcher")
            .field("source", &self.source.describe())
            .field("row_limit", &self.row_limit)
            .field("issued", &self.issued.load(Ordering::SeqCst))
            .field("published", &self.tx.borrow().generation)
            .finish()
    }
}

impl DataFetcher {
    /// Creates a fetcher with an empty generation-0 snapshot published.
    #[must_use]
    pub fn new(source: Arc<dyn FeedSource>, row_limit: usize) -> Self {
        let (tx, _) = watch::channel(Arc::new(IncidentSnapshot::empty()));
        Self {
            source,
            row_limit,
            issued: AtomicU64::new(0),
            tx,
        }
    }

    /// Subscribes to published snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<IncidentSnapshot>> {
        self.tx.subscribe()
    }

    /// The most recently published snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<IncidentSnapshot> {
        Arc::clone(&self.tx.borrow())
    }

    /// Retrieves and parses the feed once, publishing the result unless a
    /// newer generation got there first.
    ///
    /// Never panics on network or parse problems: failures are logged and
    /// reported in the returned [`FetchOutcome`].
    pub async fn fetch_now(&self) -> FetchOutcome {
        let generation = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        log::debug!(
            "Fetch {generation}: requesting {}",
            self.source.describe()
        );

        let body = match self.source.fetch().await {
            Ok(body) => body,
            Err(e) => {
                log::error!(
                    "Fetch {generation} from {} failed: {e}",
                    self.source.describe()
                );
                return FetchOutcome::Failed {
                    generation,
                    error: e.into(),
                };
            }
        };

        let row_limit = self.row_limit;
        let parsed =
            match tokio::task::spawn_blocking(move || parser::parse_feed(&body, row_limit)).await
            {
                Ok(parsed) => parsed,
                Err(e) => {
                    log::error!("Fetch {generation}: parse task failed: {e}");
                    return FetchOutcome::Failed {
                        generation,
                        error: e.into(),
                    };
                }
            };

        let skipped_rows = parsed.failures.len();
        let snapshot = Arc::new(IncidentSnapshot {
            generation,
            fetched_at: Some(Utc::now()),
            incidents: parsed
                .incidents
                .into_iter()
                .map(|incident| incident.with_generation(generation))
                .collect(),
            skipped_rows,
        });
        let count = snapshot.len();

        let published = self.tx.send_if_modified(|current| {
            if generation > current.generation {
                *current = Arc::clone(&snapshot);
                true
            } else {
                false
            }
        });

        if published {
            log::info!(
                "Fetch {generation}: published {count} incidents ({skipped_rows} rows skipped)"
            );
            FetchOutcome::Published {
                generation,
                count,
                skipped_rows,
            }
        } else {
            log::warn!("Fetch {generation}: superseded by a newer fetch, discarding");
            FetchOutcome::Superseded { generation }
        }
    }

    /// Spawns a task calling [`Self::fetch_now`] every `period`, starting
    /// one period from now. Abort the returned handle to stop it.
    pub fn spawn_refresh_loop(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let fetcher = Arc::clone(self);
        log::info!("Refreshing {} every {period:?}", fetcher.source.describe());

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                fetcher.fetch_now().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedFeed, feed_body, feed_row, sample_feed};
    use dispatch_feed_models::IncidentIcon;

    fn fetcher(feed: &Arc<ScriptedFeed>) -> Arc<DataFetcher> {
        Arc::new(DataFetcher::new(
            Arc::clone(feed) as Arc<dyn FeedSource>,
            200,
        ))
    }

    /// A page of `rows` incidents whose ids all start with `tag`.
    fn tagged_feed(tag: &str, rows: usize) -> String {
        feed_body(
            &(1..=rows)
                .map(|n| feed_row(n, &format!("{tag}-{n}"), "1100 3rd Ave", "Aid Response"))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn starts_with_empty_generation_zero() {
        let feed = Arc::new(ScriptedFeed::new(sample_feed()));
        let fetcher = fetcher(&feed);

        let current = fetcher.current();
        assert_eq!(current.generation, 0);
        assert!(current.is_empty());
        assert!(current.fetched_at.is_none());
        assert_eq!(feed.calls(), 0);
    }

    #[tokio::test]
    async fn publishes_parsed_snapshot() {
        let feed = Arc::new(ScriptedFeed::new(sample_feed()));
        let fetcher = fetcher(&feed);
        let mut rx = fetcher.subscribe();

        let outcome = fetcher.fetch_now().await;
        assert!(matches!(
            outcome,
            FetchOutcome::Published {
                generation: 1,
                count: 3,
                skipped_rows: 0
            }
        ));

        assert!(rx.has_changed().unwrap());
        let snapshot = Arc::clone(&rx.borrow_and_update());
        assert_eq!(snapshot.generation, 1);
        assert!(snapshot.fetched_at.is_some());
        assert!(snapshot.incidents.iter().all(|i| i.generation == 1));
        assert_eq!(snapshot.row(2).and_then(Incident::icon), Some(IncidentIcon::Flame));
    }

    #[tokio::test]
    async fn late_older_response_is_superseded() {
        let feed = Arc::new(
            ScriptedFeed::new(String::new())
                .then(Duration::from_millis(50), tagged_feed("A", 1))
                .then(Duration::ZERO, tagged_feed("B", 2)),
        );
        let fetcher = fetcher(&feed);

        let (a, b) = tokio::join!(fetcher.fetch_now(), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            fetcher.fetch_now().await
        });

        assert!(matches!(a, FetchOutcome::Superseded { generation: 1 }));
        assert!(matches!(b, FetchOutcome::Published { generation: 2, count: 2, .. }));

        let current = fetcher.current();
        assert_eq!(current.generation, 2);
        assert!(current.incidents.iter().all(|i| i.incident_id.starts_with("B-")));
    }

    #[tokio::test]
    async fn concurrent_fetches_never_mix_rows() {
        let mut feed = ScriptedFeed::new(String::new());
        for (tag, delay_ms, rows) in [("A", 30, 4), ("B", 10, 2), ("C", 20, 5), ("D", 0, 3)] {
            feed = feed.then(Duration::from_millis(delay_ms), tagged_feed(tag, rows));
        }
        let feed = Arc::new(feed);
        let fetcher = fetcher(&feed);

        let mut rx = fetcher.subscribe();
        let observer = tokio::spawn(async move {
            let mut seen = Vec::new();
            while rx.changed().await.is_ok() {
                let snapshot = Arc::clone(&rx.borrow_and_update());
                seen.push(snapshot);
            }
            seen
        });

        let outcomes = futures::future::join_all((0..4).map(|_| fetcher.fetch_now())).await;
        let newest = outcomes
            .iter()
            .filter(|o| o.is_published())
            .map(FetchOutcome::generation)
            .max()
            .unwrap();
        assert_eq!(newest, 4);

        let current = fetcher.current();
        assert_eq!(current.generation, 4);
        assert_eq!(current.len(), 3);

        drop(fetcher);
        for snapshot in observer.await.unwrap() {
            let tag = &snapshot.incidents[0].incident_id[..1];
            assert!(
                snapshot
                    .incidents
                    .iter()
                    .all(|i| i.incident_id.starts_with(tag) && i.generation == snapshot.generation),
                "mixed snapshot: {snapshot:?}"
            );
        }
    }

    #[tokio::test]
    async fn failure_keeps_previous_snapshot() {
        let feed = Arc::new(
            ScriptedFeed::new(sample_feed())
                .then(Duration::ZERO, sample_feed())
                .then_fail(Duration::ZERO),
        );
        let fetcher = fetcher(&feed);

        assert!(fetcher.fetch_now().await.is_published());

        let failed = fetcher.fetch_now().await;
        assert!(matches!(
            failed,
            FetchOutcome::Failed {
                generation: 2,
                error: DispatchError::Feed(_)
            }
        ));
        assert_eq!(fetcher.current().generation, 1);
        assert_eq!(fetcher.current().len(), 3);

        assert!(matches!(
            fetcher.fetch_now().await,
            FetchOutcome::Published { generation: 3, .. }
        ));
    }

    #[tokio::test]
    async fn skipped_rows_are_reported() {
        let body = feed_body(&[
            feed_row(1, "F1", "1100 3rd Ave", "Aid Response"),
            r#"<tr id="row_2"><td>11/25/2020 8:21:21 PM</td><td>F2</td><td>high</td><td>E1</td><td>Pike St</td><td>Aid Response</td></tr>"#.to_string(),
        ]);
        let feed = Arc::new(ScriptedFeed::new(body));
        let fetcher = fetcher(&feed);

        assert!(matches!(
            fetcher.fetch_now().await,
            FetchOutcome::Published {
                count: 1,
                skipped_rows: 1,
                ..
            }
        ));
        assert_eq!(fetcher.current().skipped_rows, 1);
    }

    #[tokio::test]
    async fn refresh_loop_fetches_periodically() {
        let feed = Arc::new(ScriptedFeed::new(sample_feed()));
        let fetcher = fetcher(&feed);

        let handle = fetcher.spawn_refresh_loop(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(90)).await;
        handle.abort();

        assert!(feed.calls() >= 2, "only {} fetches", feed.calls());
        assert!(fetcher.current().generation >= 2);
    }
}
