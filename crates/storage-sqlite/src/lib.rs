//! SQLite implementation of the Plaasjapie local store.
//!
//! A single database file holds the cached profiles, matches and events, the message outbox
//! and the sync ledger. Reads use pooled connections; writes are funnelled through one writer
//! thread so each write runs in its own transaction.

pub mod db;
pub mod errors;
pub mod offline;
pub mod schema;

pub use db::{DbPool, WriteHandle, DB_FILE_NAME};
pub use errors::StorageError;
pub use offline::OfflineCacheRepository;
