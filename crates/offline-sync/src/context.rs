//! Composition root: wires the store, the backend and the sync components together.

use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use plaasjapie_backend::BackendClient;
use plaasjapie_core::cache::{CacheListing, CachedRecord};
use plaasjapie_core::clock::{Clock, SystemClock};
use plaasjapie_core::ports::{EventFilter, LocalStore, ReachabilityProbe, RemoteBackend};
use plaasjapie_core::records::{EventRecord, MatchRecord, MessagePayload, ProfileRecord};
use plaasjapie_core::sync::{
    OutboxMessage, ReplayReport, SendOutcome, SyncLedgerEntry, SyncPhase, SyncReport,
};
use plaasjapie_core::{DisabledStore, Error, Result};
use plaasjapie_storage_sqlite::OfflineCacheRepository;

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::image_cache::ImageCache;
use crate::orchestrator::SyncOrchestrator;
use crate::outbox::OutboxManager;
use crate::scheduler::SyncScheduler;

/// Everything the UI layer talks to. Owns its collaborators; nothing is global.
pub struct OfflineSyncEngine {
    store: Arc<dyn LocalStore>,
    connectivity: ConnectivityMonitor,
    outbox: Arc<OutboxManager>,
    orchestrator: Arc<SyncOrchestrator>,
    images: Option<Arc<ImageCache>>,
    scheduler: SyncScheduler,
    offline_cache_enabled: bool,
}

impl OfflineSyncEngine {
    /// Builds the engine with the HTTP backend described by `config`.
    pub async fn from_config(
        config: SyncConfig,
        probe: Arc<dyn ReachabilityProbe>,
        access_token: Option<String>,
    ) -> Result<Self> {
        let client = BackendClient::new(&config.api_base_url)
            .map_err(|e| Error::Config(format!("Failed to build backend client: {}", e)))?;
        client.set_access_token(access_token);
        Ok(Self::bootstrap(config, Arc::new(client), probe).await)
    }

    /// Opens the local store and wires the engine. A store that cannot be opened degrades the
    /// engine to network-only mode instead of failing.
    pub async fn bootstrap(
        config: SyncConfig,
        backend: Arc<dyn RemoteBackend>,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let (store, enabled) = open_store(&config, Arc::clone(&clock)).await;
        Self::assemble(config, store, enabled, backend, probe, clock)
    }

    /// Wires the engine around an already opened store.
    pub fn with_store(
        config: SyncConfig,
        store: Arc<dyn LocalStore>,
        backend: Arc<dyn RemoteBackend>,
        probe: Arc<dyn ReachabilityProbe>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::assemble(config, store, true, backend, probe, clock)
    }

    fn assemble(
        config: SyncConfig,
        store: Arc<dyn LocalStore>,
        offline_cache_enabled: bool,
        backend: Arc<dyn RemoteBackend>,
        probe: Arc<dyn ReachabilityProbe>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let connectivity = ConnectivityMonitor::new(probe);
        let outbox = Arc::new(OutboxManager::new(
            Arc::clone(&store),
            Arc::clone(&backend),
            connectivity.clone(),
        ));

        let images = match ImageCache::new(config.image_cache_dir.clone()) {
            Ok(cache) => Some(Arc::new(cache)),
            Err(err) => {
                warn!("[OfflineSync] Image cache disabled: {}", err);
                None
            }
        };

        let event_filter = EventFilter {
            category: config.event_category.clone(),
            ..EventFilter::default()
        };
        let mut orchestrator = SyncOrchestrator::new(
            Arc::clone(&store),
            backend,
            connectivity.clone(),
            Arc::clone(&outbox),
            clock,
        )
        .with_event_filter(event_filter);
        if config.prefetch_images {
            if let Some(cache) = &images {
                orchestrator = orchestrator.with_image_prefetch(Arc::clone(cache));
            }
        }
        let orchestrator = Arc::new(orchestrator);

        let scheduler = SyncScheduler::new(
            Arc::clone(&orchestrator),
            connectivity.clone(),
            config.sync_interval_secs,
            config.connectivity_poll_interval(),
        );

        Self {
            store,
            connectivity,
            outbox,
            orchestrator,
            images,
            scheduler,
            offline_cache_enabled,
        }
    }

    /// False when the engine runs in network-only mode.
    pub fn offline_cache_enabled(&self) -> bool {
        self.offline_cache_enabled
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn list_profiles(&self) -> CacheListing<ProfileRecord> {
        self.store.list_profiles().unwrap_or_else(|err| {
            warn!("[OfflineSync] Profiles unavailable: {}", err);
            CacheListing::default()
        })
    }

    pub fn get_profile(&self, id: &str) -> Option<CachedRecord<ProfileRecord>> {
        self.store.get_profile(id).unwrap_or_else(|err| {
            warn!("[OfflineSync] Profile '{}' unavailable: {}", id, err);
            None
        })
    }

    pub fn list_matches(&self) -> CacheListing<MatchRecord> {
        self.store.list_matches().unwrap_or_else(|err| {
            warn!("[OfflineSync] Matches unavailable: {}", err);
            CacheListing::default()
        })
    }

    pub fn list_events(&self) -> CacheListing<EventRecord> {
        self.store.list_events().unwrap_or_else(|err| {
            warn!("[OfflineSync] Events unavailable: {}", err);
            CacheListing::default()
        })
    }

    pub fn conversation_history(&self, match_id: &str) -> Vec<OutboxMessage> {
        self.outbox.conversation_history(match_id)
    }

    pub fn pending_message_count(&self) -> usize {
        self.outbox.pending_count()
    }

    pub async fn send(
        &self,
        match_id: &str,
        sender_id: &str,
        payload: MessagePayload,
    ) -> Result<SendOutcome> {
        self.outbox.send(match_id, sender_id, payload).await
    }

    pub async fn perform_full_sync(&self, user_id: &str) -> Result<SyncReport> {
        self.orchestrator.perform_full_sync(user_id).await
    }

    pub fn sync_phase(&self) -> SyncPhase {
        self.orchestrator.current_phase()
    }

    pub fn last_sync_report(&self) -> Option<SyncReport> {
        self.orchestrator.last_report()
    }

    /// Ledger rows for every entity type. Empty when the store cannot be read.
    pub fn ledger(&self) -> Vec<SyncLedgerEntry> {
        self.store.list_ledger().unwrap_or_else(|err| {
            warn!("[OfflineSync] Ledger unavailable: {}", err);
            Vec::new()
        })
    }

    pub async fn resolve_image(&self, url: &str) -> Result<PathBuf> {
        match &self.images {
            Some(images) => images.resolve(url).await,
            None => Err(Error::image_unavailable(url, "image cache disabled")),
        }
    }

    /// Called when the app returns to the foreground.
    pub async fn on_foreground(&self) -> Result<ReplayReport> {
        self.outbox.replay_pending().await
    }

    pub async fn start_background_sync(&self, user_id: &str) {
        self.scheduler.start(user_id).await;
    }

    pub async fn stop_background_sync(&self) {
        self.scheduler.stop().await;
    }

    pub async fn background_sync_running(&self) -> bool {
        self.scheduler.is_running().await
    }
}

async fn open_store(config: &SyncConfig, clock: Arc<dyn Clock>) -> (Arc<dyn LocalStore>, bool) {
    let data_dir = config.data_dir_str();
    let opened = OfflineCacheRepository::open_with_clock(&data_dir, config.upsert_policy, clock);
    let repository = match opened {
        Ok(repository) => repository,
        Err(err) => return disabled(err),
    };
    if let Err(err) = repository.initialize().await {
        return disabled(err);
    }

    info!("[OfflineSync] Offline cache ready in {}", data_dir);
    (Arc::new(repository), true)
}

fn disabled(err: Error) -> (Arc<dyn LocalStore>, bool) {
    warn!(
        "[OfflineSync] Offline cache unavailable, continuing network-only: {}",
        err
    );
    (Arc::new(DisabledStore::new(err.to_string())), false)
}
