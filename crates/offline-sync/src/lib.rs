//! Offline-first sync engine: connectivity, outbox, pull orchestration, image cache and the
//! background scheduler, assembled by [`OfflineSyncEngine`].

pub mod config;
pub mod connectivity;
pub mod context;
pub mod image_cache;
pub mod orchestrator;
pub mod outbox;
pub mod scheduler;

pub use config::SyncConfig;
pub use connectivity::{ConnectivityMonitor, SharedNetworkState};
pub use context::OfflineSyncEngine;
pub use image_cache::ImageCache;
pub use orchestrator::SyncOrchestrator;
pub use outbox::OutboxManager;
pub use scheduler::SyncScheduler;
