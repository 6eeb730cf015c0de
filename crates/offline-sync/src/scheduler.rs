//! Background sync loop: syncs (outbox replay first) on reconnect and runs periodic full syncs.

use log::{debug, info, warn};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use plaasjapie_core::sync::{periodic_delay_ms, SYNC_INTERVAL_JITTER_SECS};
use plaasjapie_core::Error;

use crate::connectivity::ConnectivityMonitor;
use crate::orchestrator::SyncOrchestrator;

/// Owns the single cancellable background task of the engine.
pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    connectivity: ConnectivityMonitor,
    sync_interval_secs: u64,
    poll_interval: Duration,
    background_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        connectivity: ConnectivityMonitor,
        sync_interval_secs: u64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            connectivity,
            sync_interval_secs,
            poll_interval,
            background_task: Mutex::new(None),
        }
    }

    /// Starts the loop for `user_id`. A running loop is left alone; a finished one is respawned.
    pub async fn start(&self, user_id: &str) {
        let mut guard = self.background_task.lock().await;
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return;
            }
            guard.take();
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        let connectivity = self.connectivity.clone();
        let sync_interval_secs = self.sync_interval_secs;
        let poll_interval = self.poll_interval;
        let user_id = user_id.to_string();

        info!("[Scheduler] Starting background sync for '{}'", user_id);
        let handle = tokio::spawn(async move {
            let mut was_online = false;
            let mut next_sync_at = Instant::now() + next_delay(sync_interval_secs);
            loop {
                let online = connectivity.is_online();
                if online && !was_online {
                    // The full sync replays the outbox before pulling anything.
                    info!("[Scheduler] Connectivity restored, syncing");
                    run_full_sync(&orchestrator, &user_id).await;
                    next_sync_at = Instant::now() + next_delay(sync_interval_secs);
                } else if online && Instant::now() >= next_sync_at {
                    run_full_sync(&orchestrator, &user_id).await;
                    next_sync_at = Instant::now() + next_delay(sync_interval_secs);
                }
                was_online = online;

                tokio::time::sleep(poll_interval).await;
            }
        });
        *guard = Some(handle);
    }

    pub async fn stop(&self) {
        let mut guard = self.background_task.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
            info!("[Scheduler] Background sync stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.background_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

async fn run_full_sync(orchestrator: &SyncOrchestrator, user_id: &str) {
    match orchestrator.perform_full_sync(user_id).await {
        Ok(report) if report.is_complete() => {}
        Ok(report) => debug!("[Scheduler] Sync incomplete, failed={:?}", report.failed()),
        // Went offline between the sample and the pass.
        Err(Error::Offline) => {}
        Err(err) => warn!("[Scheduler] Background sync failed: {}", err),
    }
}

fn next_delay(interval_secs: u64) -> Duration {
    let jitter_bound = SYNC_INTERVAL_JITTER_SECS.saturating_mul(1000);
    let jitter_ms = if jitter_bound > 0 {
        rand::thread_rng().gen_range(0..jitter_bound)
    } else {
        0
    };
    Duration::from_millis(periodic_delay_ms(interval_secs, jitter_ms))
}
