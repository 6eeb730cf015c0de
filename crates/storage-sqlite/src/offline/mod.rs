//! SQLite persistence for the offline cache and message outbox.

mod model;
mod repository;

pub use model::{EventDB, MatchDB, MessageDB, SyncStatusDB, UserProfileDB};
pub use repository::OfflineCacheRepository;
