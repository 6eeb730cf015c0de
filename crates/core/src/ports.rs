//! Seams between the sync engine and its collaborators: the local store, the remote
//! backend and the platform's reachability signal.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheListing, CachedRecord, OutboxListing};
use crate::errors::Result;
use crate::records::{EventRecord, MatchRecord, MessagePayload, ProfileRecord};
use crate::sync::{NewOutboxMessage, OutboxMessage, SyncEntityType, SyncLedgerEntry};

/// On-device persistence. The only component that touches the database file.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Creates missing tables and seeds the ledger. Safe to call on every start.
    async fn initialize(&self) -> Result<()>;

    async fn upsert_profile(&self, id: &str, profile: ProfileRecord) -> Result<()>;
    async fn upsert_match(&self, id: &str, record: MatchRecord) -> Result<()>;
    async fn upsert_event(&self, id: &str, record: EventRecord) -> Result<()>;

    fn get_profile(&self, id: &str) -> Result<Option<CachedRecord<ProfileRecord>>>;
    fn list_profiles(&self) -> Result<CacheListing<ProfileRecord>>;
    fn list_matches(&self) -> Result<CacheListing<MatchRecord>>;
    fn list_events(&self) -> Result<CacheListing<EventRecord>>;

    /// Inserts an unsent message. Fails with `DuplicateMessageId` when the id exists.
    async fn append_outbox_message(&self, message: NewOutboxMessage) -> Result<OutboxMessage>;
    /// Records a message the backend already accepted, stored as sent in a single write.
    async fn append_sent_message(
        &self,
        message: NewOutboxMessage,
        remote_id: String,
    ) -> Result<OutboxMessage>;
    /// Unsent messages, oldest first.
    fn list_unsent_messages(&self) -> Result<OutboxListing>;
    /// Every locally authored message of a conversation, oldest first.
    fn list_conversation_messages(&self, match_id: &str) -> Result<Vec<OutboxMessage>>;
    /// Flips the sent flag. Returns false when the row was absent or already sent.
    async fn mark_message_sent(&self, id: &str, remote_id: Option<String>) -> Result<bool>;
    async fn record_send_failure(&self, id: &str, error: String) -> Result<()>;

    /// Returns 0 for types that were never synced or never seeded.
    fn get_ledger_timestamp(&self, entity: SyncEntityType) -> Result<i64>;
    async fn set_ledger_timestamp(&self, entity: SyncEntityType, value: i64) -> Result<()>;
    fn list_ledger(&self) -> Result<Vec<SyncLedgerEntry>>;
}

/// Filter forwarded to the backend's event listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilter {
    pub category: Option<String>,
    pub saved_by: Option<String>,
    pub start_date: Option<String>,
    /// Only events changed after this epoch-millis stamp, when the backend supports it.
    pub updated_since: Option<i64>,
    pub limit: Option<u32>,
}

impl EventFilter {
    pub fn with_updated_since(mut self, since: i64) -> Self {
        self.updated_since = (since > 0).then_some(since);
        self
    }
}

/// Remote document backend, reduced to the calls the sync engine needs.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    async fn fetch_profile(&self, user_id: &str) -> Result<ProfileRecord>;
    async fn fetch_matches(&self, user_id: &str) -> Result<Vec<MatchRecord>>;
    async fn fetch_events(&self, filter: &EventFilter) -> Result<Vec<EventRecord>>;
    /// Returns the backend-issued message identifier.
    async fn send_message(
        &self,
        match_id: &str,
        sender_id: &str,
        payload: &MessagePayload,
    ) -> Result<String>;
}

/// Snapshot of the platform network signal. `None` means the platform does not know yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkState {
    pub is_connected: Option<bool>,
    pub is_internet_reachable: Option<bool>,
}

impl NetworkState {
    pub fn online() -> Self {
        Self {
            is_connected: Some(true),
            is_internet_reachable: Some(true),
        }
    }

    pub fn offline() -> Self {
        Self {
            is_connected: Some(false),
            is_internet_reachable: Some(false),
        }
    }
}

/// Platform reachability primitive, polled synchronously.
pub trait ReachabilityProbe: Send + Sync {
    fn current(&self) -> NetworkState;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updated_since_is_dropped_for_never_synced() {
        let filter = EventFilter::default().with_updated_since(0);
        assert_eq!(filter.updated_since, None);
        let filter = EventFilter::default().with_updated_since(1_700_000_000_000);
        assert_eq!(filter.updated_since, Some(1_700_000_000_000));
    }
}
