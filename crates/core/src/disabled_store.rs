//! Local store used when the device cannot open its database.
//!
//! Reads behave like a fresh install and writes report `StorageUnavailable`, so the engine keeps
//! running in network-only mode.

use async_trait::async_trait;

use crate::cache::{CacheListing, CachedRecord, OutboxListing};
use crate::errors::{Error, Result};
use crate::ports::LocalStore;
use crate::records::{EventRecord, MatchRecord, ProfileRecord};
use crate::sync::{NewOutboxMessage, OutboxMessage, SyncEntityType, SyncLedgerEntry};

#[derive(Debug, Clone)]
pub struct DisabledStore {
    reason: String,
}

impl DisabledStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    fn unavailable(&self) -> Error {
        Error::storage_unavailable(self.reason.clone())
    }
}

#[async_trait]
impl LocalStore for DisabledStore {
    async fn initialize(&self) -> Result<()> {
        Err(self.unavailable())
    }

    async fn upsert_profile(&self, _id: &str, _profile: ProfileRecord) -> Result<()> {
        Err(self.unavailable())
    }

    async fn upsert_match(&self, _id: &str, _record: MatchRecord) -> Result<()> {
        Err(self.unavailable())
    }

    async fn upsert_event(&self, _id: &str, _record: EventRecord) -> Result<()> {
        Err(self.unavailable())
    }

    fn get_profile(&self, _id: &str) -> Result<Option<CachedRecord<ProfileRecord>>> {
        Ok(None)
    }

    fn list_profiles(&self) -> Result<CacheListing<ProfileRecord>> {
        Ok(CacheListing::default())
    }

    fn list_matches(&self) -> Result<CacheListing<MatchRecord>> {
        Ok(CacheListing::default())
    }

    fn list_events(&self) -> Result<CacheListing<EventRecord>> {
        Ok(CacheListing::default())
    }

    async fn append_outbox_message(&self, _message: NewOutboxMessage) -> Result<OutboxMessage> {
        Err(self.unavailable())
    }

    async fn append_sent_message(
        &self,
        _message: NewOutboxMessage,
        _remote_id: String,
    ) -> Result<OutboxMessage> {
        Err(self.unavailable())
    }

    fn list_unsent_messages(&self) -> Result<OutboxListing> {
        Ok(OutboxListing::default())
    }

    fn list_conversation_messages(&self, _match_id: &str) -> Result<Vec<OutboxMessage>> {
        Ok(Vec::new())
    }

    async fn mark_message_sent(&self, _id: &str, _remote_id: Option<String>) -> Result<bool> {
        Ok(false)
    }

    async fn record_send_failure(&self, _id: &str, _error: String) -> Result<()> {
        Ok(())
    }

    fn get_ledger_timestamp(&self, _entity: SyncEntityType) -> Result<i64> {
        Ok(0)
    }

    async fn set_ledger_timestamp(&self, _entity: SyncEntityType, _value: i64) -> Result<()> {
        Err(self.unavailable())
    }

    fn list_ledger(&self) -> Result<Vec<SyncLedgerEntry>> {
        Ok(SyncEntityType::ALL
            .iter()
            .map(|entity| SyncLedgerEntry {
                entity: *entity,
                last_sync_at: 0,
            })
            .collect())
    }
}
