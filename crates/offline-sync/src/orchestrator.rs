//! Sync Orchestrator: pulls backend state into the local store, one entity type at a time.

use log::{debug, info, warn};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

use plaasjapie_core::clock::Clock;
use plaasjapie_core::ports::{EventFilter, LocalStore, RemoteBackend};
use plaasjapie_core::sync::{EntitySyncOutcome, SyncEntityType, SyncPhase, SyncReport};
use plaasjapie_core::{Error, Result};

use crate::connectivity::ConnectivityMonitor;
use crate::image_cache::ImageCache;
use crate::outbox::OutboxManager;

/// Events edited this long before the last pull started are fetched again, absorbing clock
/// skew between device and backend.
pub const EVENTS_PULL_OVERLAP_MS: i64 = 5 * 60 * 1000;

/// Records stored for one entity type plus the image URLs they reference.
struct Pulled {
    records: usize,
    image_urls: Vec<String>,
}

pub struct SyncOrchestrator {
    store: Arc<dyn LocalStore>,
    backend: Arc<dyn RemoteBackend>,
    connectivity: ConnectivityMonitor,
    outbox: Arc<OutboxManager>,
    images: Option<Arc<ImageCache>>,
    clock: Arc<dyn Clock>,
    event_filter: EventFilter,
    cycle_mutex: Mutex<()>,
    phase: StdMutex<SyncPhase>,
    last_report: StdMutex<Option<SyncReport>>,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn LocalStore>,
        backend: Arc<dyn RemoteBackend>,
        connectivity: ConnectivityMonitor,
        outbox: Arc<OutboxManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            backend,
            connectivity,
            outbox,
            images: None,
            clock,
            event_filter: EventFilter::default(),
            cycle_mutex: Mutex::new(()),
            phase: StdMutex::new(SyncPhase::Idle),
            last_report: StdMutex::new(None),
        }
    }

    /// Prefetch images referenced by pulled records into `images`.
    pub fn with_image_prefetch(mut self, images: Arc<ImageCache>) -> Self {
        self.images = Some(images);
        self
    }

    /// Base filter for every event pull; `updated_since` is filled from the ledger.
    pub fn with_event_filter(mut self, filter: EventFilter) -> Self {
        self.event_filter = filter;
        self
    }

    pub fn current_phase(&self) -> SyncPhase {
        self.phase.lock().map(|phase| *phase).unwrap_or(SyncPhase::Idle)
    }

    pub fn last_report(&self) -> Option<SyncReport> {
        self.last_report.lock().ok().and_then(|report| report.clone())
    }

    /// Replays the outbox, then pulls profiles, matches and events for `user_id`.
    ///
    /// Fails only with [`Error::Offline`]. Every other failure is scoped to its entity type and
    /// reported in the returned [`SyncReport`]; a type's ledger entry moves only when that type
    /// was fetched and stored.
    pub async fn perform_full_sync(&self, user_id: &str) -> Result<SyncReport> {
        let _cycle_guard = self.cycle_mutex.lock().await;

        if !self.connectivity.is_online() {
            debug!("[Sync] Full sync skipped: device is offline");
            return Err(Error::Offline);
        }

        let started_at = self.clock.now_millis();
        let mut outcomes = Vec::with_capacity(SyncEntityType::ALL.len());
        let mut image_urls = Vec::new();

        self.set_phase(SyncPhase::Syncing(SyncEntityType::Messages));
        let replay_started_at = self.clock.now_millis();
        let replay = match self.outbox.replay_pending().await {
            Ok(report) => Some(report),
            Err(err) => {
                warn!("[Sync] Outbox replay failed: {}", err);
                outcomes.push(self.fail(SyncEntityType::Messages, err.to_string()));
                None
            }
        };
        if let Some(report) = &replay {
            let outcome = if report.is_complete() {
                self.finish(SyncEntityType::Messages, report.delivered, replay_started_at)
                    .await
            } else {
                let reason = report
                    .last_error
                    .clone()
                    .unwrap_or_else(|| format!("{} messages still pending", report.remaining));
                self.fail(SyncEntityType::Messages, reason)
            };
            outcomes.push(outcome);
        }

        for entity in SyncEntityType::PULLED {
            self.set_phase(SyncPhase::Syncing(entity));
            // The ledger records when the pull started, so edits made while it runs are
            // picked up by the next incremental pull.
            let pull_started_at = self.clock.now_millis();
            let pulled = match entity {
                SyncEntityType::Profiles => self.pull_profile(user_id).await,
                SyncEntityType::Matches => self.pull_matches(user_id).await,
                SyncEntityType::Events => self.pull_events().await,
                SyncEntityType::Messages => continue,
            };
            let outcome = match pulled {
                Ok(pulled) => {
                    image_urls.extend(pulled.image_urls);
                    self.finish(entity, pulled.records, pull_started_at).await
                }
                Err(err) => {
                    warn!("[Sync] {} failed: {}", entity, err);
                    self.fail(entity, err.to_string())
                }
            };
            outcomes.push(outcome);
        }
        self.set_phase(SyncPhase::Idle);

        if let Some(images) = &self.images {
            if !image_urls.is_empty() {
                let total = image_urls.len();
                let resolved = images.prefetch(image_urls).await;
                debug!("[Sync] Prefetched {}/{} images", resolved, total);
            }
        }

        let report = SyncReport {
            started_at,
            finished_at: self.clock.now_millis(),
            outcomes,
            replay,
        };
        info!(
            "[Sync] Full sync finished in {}ms: succeeded={:?} failed={:?}",
            report.duration_ms(),
            report.succeeded(),
            report.failed()
        );
        if let Ok(mut last) = self.last_report.lock() {
            *last = Some(report.clone());
        }
        Ok(report)
    }

    async fn pull_profile(&self, user_id: &str) -> Result<Pulled> {
        let mut profile = self.backend.fetch_profile(user_id).await?;
        if profile.id.trim().is_empty() {
            profile.id = user_id.to_string();
        }
        let image_urls = profile.image_urls().into_iter().map(String::from).collect();
        let id = profile.id.clone();
        self.store.upsert_profile(&id, profile).await?;
        Ok(Pulled {
            records: 1,
            image_urls,
        })
    }

    async fn pull_matches(&self, user_id: &str) -> Result<Pulled> {
        let matches = self.backend.fetch_matches(user_id).await?;
        let mut pulled = Pulled {
            records: 0,
            image_urls: Vec::new(),
        };
        for record in matches {
            if record.id.trim().is_empty() {
                warn!("[Sync] Skipping match without id");
                continue;
            }
            let urls: Vec<String> = record
                .profile
                .as_ref()
                .map(|p| p.image_urls().into_iter().map(String::from).collect())
                .unwrap_or_default();
            let id = record.id.clone();
            match self.store.upsert_match(&id, record).await {
                Ok(()) => {
                    pulled.records += 1;
                    pulled.image_urls.extend(urls);
                }
                Err(Error::InvalidRecord(reason)) => {
                    warn!("[Sync] Skipping match '{}': {}", id, reason);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(pulled)
    }

    async fn pull_events(&self) -> Result<Pulled> {
        let since = self
            .store
            .get_ledger_timestamp(SyncEntityType::Events)
            .unwrap_or(0);
        let since = if since > 0 {
            (since - EVENTS_PULL_OVERLAP_MS).max(1)
        } else {
            0
        };
        let filter = self.event_filter.clone().with_updated_since(since);
        let events = self.backend.fetch_events(&filter).await?;
        let mut pulled = Pulled {
            records: 0,
            image_urls: Vec::new(),
        };
        for record in events {
            if record.id.trim().is_empty() {
                warn!("[Sync] Skipping event without id");
                continue;
            }
            let url = record.image_url.clone().filter(|u| !u.is_empty());
            let id = record.id.clone();
            match self.store.upsert_event(&id, record).await {
                Ok(()) => {
                    pulled.records += 1;
                    pulled.image_urls.extend(url);
                }
                Err(Error::InvalidRecord(reason)) => {
                    warn!("[Sync] Skipping event '{}': {}", id, reason);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(pulled)
    }

    /// Advances the ledger for a type that was fully stored to the moment its pull started.
    async fn finish(
        &self,
        entity: SyncEntityType,
        records: usize,
        started_at: i64,
    ) -> EntitySyncOutcome {
        if let Err(err) = self.store.set_ledger_timestamp(entity, started_at).await {
            warn!("[Sync] Ledger update for {} failed: {}", entity, err);
            return self.fail(entity, err.to_string());
        }
        self.set_phase(SyncPhase::Succeeded(entity));
        debug!("[Sync] {} synced ({} records)", entity, records);
        EntitySyncOutcome::succeeded(entity, records)
    }

    fn fail(&self, entity: SyncEntityType, error: String) -> EntitySyncOutcome {
        self.set_phase(SyncPhase::Failed(entity));
        EntitySyncOutcome::failed(entity, error)
    }

    fn set_phase(&self, next: SyncPhase) {
        if let Ok(mut phase) = self.phase.lock() {
            *phase = next;
        }
    }
}
