//! Error taxonomy shared by every crate of the offline sync engine.

use thiserror::Error;

use crate::sync::SyncEntityType;

/// Result type alias for offline sync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the local store, the outbox, the orchestrator and the image cache.
#[derive(Debug, Error)]
pub enum Error {
    /// The on-device database could not be opened. Callers degrade to network-only mode.
    #[error("Local storage unavailable: {0}")]
    StorageUnavailable(String),

    /// An outbox append reused an identifier that is already persisted.
    #[error("Outbox message '{0}' already exists")]
    DuplicateMessageId(String),

    /// A sync pass was requested while the backend is unreachable.
    #[error("Device is offline")]
    Offline,

    /// A remote read failed for one entity type.
    #[error("Remote fetch failed for {entity}: {message}")]
    RemoteFetch {
        entity: SyncEntityType,
        message: String,
    },

    /// A remote message send failed.
    #[error("Remote send failed: {0}")]
    RemoteSend(String),

    /// A remote image could not be made available locally.
    #[error("Image unavailable for '{url}': {reason}")]
    ImageUnavailable { url: String, reason: String },

    /// A record was rejected at the store boundary.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Query or transaction failure inside an opened store.
    #[error("Database error: {0}")]
    Database(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Missing or malformed configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        Self::StorageUnavailable(message.into())
    }

    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord(message.into())
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    pub fn remote_fetch(entity: SyncEntityType, message: impl Into<String>) -> Self {
        Self::RemoteFetch {
            entity,
            message: message.into(),
        }
    }

    pub fn remote_send(message: impl Into<String>) -> Self {
        Self::RemoteSend(message.into())
    }

    pub fn image_unavailable(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ImageUnavailable {
            url: url.into(),
            reason: reason.into(),
        }
    }
}
