use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use pageflow_core::config::Config;
use pageflow_core::error::HitError;
use pageflow_core::identity::MokaLookupCache;
use pageflow_core::sanitize::SanitizedHit;
use pageflow_core::store::HitStore;
use pageflow_core::tracker::{TrackOutcome, Tracker};
use pageflow_duckdb::DuckDbBackend;

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`].
pub struct AppState {
    /// The DuckDB backend. Also serves as the tracker's [`HitStore`].
    pub db: Arc<DuckDbBackend>,

    /// Parsed configuration, loaded once at startup from environment variables.
    pub config: Arc<Config>,

    pub tracker: Arc<Tracker>,

    /// Producer side of the bounded beacon queue.
    beacon_tx: mpsc::Sender<SanitizedHit>,

    /// Consumer side, taken exactly once by [`AppState::run_beacon_worker`].
    beacon_rx: Mutex<Option<mpsc::Receiver<SanitizedHit>>>,
}

impl AppState {
    pub fn new(db: DuckDbBackend, config: Config) -> Self {
        let db = Arc::new(db);
        let tracker = Tracker::new(
            Arc::clone(&db) as Arc<dyn HitStore>,
            Arc::new(MokaLookupCache::new(config.lookup_cache_ttl())),
            config.tracking(),
        );
        let (beacon_tx, beacon_rx) = mpsc::channel(config.beacon_queue_size);

        Self {
            db,
            config: Arc::new(config),
            tracker: Arc::new(tracker),
            beacon_tx,
            beacon_rx: Mutex::new(Some(beacon_rx)),
        }
    }

    /// Run one hit through the tracker and log the result.
    ///
    /// Failures never reach the browser, so this returns nothing.
    pub async fn ingest(&self, hit: SanitizedHit) {
        match self.tracker.track(hit).await {
            Ok(TrackOutcome::Created {
                event_id,
                session_id,
                new_session,
                goals_recorded,
            }) => debug!(
                event_id,
                session_id, new_session, goals_recorded, "Page view recorded"
            ),
            Ok(TrackOutcome::Updated {
                event_id,
                time_on_page,
                ..
            }) => debug!(event_id, time_on_page, "Time on page updated"),
            Err(e @ HitError::Unclassifiable) => info!(reason = %e, "Hit skipped"),
            Err(e @ HitError::MissingRequiredFields(_)) => warn!(reason = %e, "Hit skipped"),
            Err(e) => error!(error = %e, "Hit write failed"),
        }
    }

    /// Hand a hit to the beacon worker without waiting for it.
    ///
    /// Returns `false` when the queue is full or the worker is gone; the hit
    /// is dropped in that case.
    pub fn enqueue_beacon(&self, hit: SanitizedHit) -> bool {
        match self.beacon_tx.try_send(hit) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    capacity = self.config.beacon_queue_size,
                    "Beacon queue full, dropping hit"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Beacon worker stopped, dropping hit");
                false
            }
        }
    }

    /// Background loop: drain the beacon queue one hit at a time.
    ///
    /// Spawned as a `tokio::spawn` task in `main.rs`. A second call returns
    /// immediately because the receiver has already been taken.
    pub async fn run_beacon_worker(self: Arc<Self>) {
        let Some(mut rx) = self.beacon_rx.lock().await.take() else {
            warn!("Beacon worker already running");
            return;
        };
        while let Some(hit) = rx.recv().await {
            self.ingest(hit).await;
        }
    }
}
