//! Offline sync domain models: entity types, outbox rows and the sync ledger.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::records::MessagePayload;

/// Entity types tracked by the sync ledger, in the order a full sync visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEntityType {
    Messages,
    Profiles,
    Matches,
    Events,
}

impl SyncEntityType {
    /// Every ledger row seeded at initialization.
    pub const ALL: [SyncEntityType; 4] = [
        SyncEntityType::Messages,
        SyncEntityType::Profiles,
        SyncEntityType::Matches,
        SyncEntityType::Events,
    ];

    /// Types pulled from the backend after the outbox replay.
    pub const PULLED: [SyncEntityType; 3] = [
        SyncEntityType::Profiles,
        SyncEntityType::Matches,
        SyncEntityType::Events,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncEntityType::Messages => "messages",
            SyncEntityType::Profiles => "profiles",
            SyncEntityType::Matches => "matches",
            SyncEntityType::Events => "events",
        }
    }
}

impl fmt::Display for SyncEntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncEntityType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "messages" => Ok(SyncEntityType::Messages),
            "profiles" => Ok(SyncEntityType::Profiles),
            "matches" => Ok(SyncEntityType::Matches),
            "events" => Ok(SyncEntityType::Events),
            other => Err(format!("Unknown sync entity type '{}'", other)),
        }
    }
}

/// One ledger row: the last successful pull for an entity type (0 = never synced).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLedgerEntry {
    pub entity: SyncEntityType,
    pub last_sync_at: i64,
}

/// Message authored on this device, persisted until the backend accepts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxMessage {
    pub id: String,
    pub match_id: String,
    pub sender_id: String,
    pub payload: MessagePayload,
    pub sent: bool,
    pub created_at: i64,
    pub sent_at: Option<i64>,
    pub remote_id: Option<String>,
    pub attempt_count: i32,
    pub last_error: Option<String>,
}

/// Append request for the outbox. The store assigns `created_at` and the local sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOutboxMessage {
    pub id: String,
    pub match_id: String,
    pub sender_id: String,
    pub payload: MessagePayload,
}

impl NewOutboxMessage {
    pub fn new(
        id: impl Into<String>,
        match_id: impl Into<String>,
        sender_id: impl Into<String>,
        payload: MessagePayload,
    ) -> Self {
        Self {
            id: id.into(),
            match_id: match_id.into(),
            sender_id: sender_id.into(),
            payload,
        }
    }
}

/// How a cache upsert treats an existing row with the same identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertPolicy {
    /// Replace unconditionally; the last executed write wins.
    #[default]
    Unconditional,
    /// Replace only when the incoming stamp is strictly newer than the stored one.
    NewerOnly,
}

impl UpsertPolicy {
    /// Decides whether an incoming write stamped `incoming_updated_at` replaces the stored row.
    pub fn should_overwrite(&self, existing_updated_at: Option<i64>, incoming_updated_at: i64) -> bool {
        match (self, existing_updated_at) {
            (_, None) => true,
            (UpsertPolicy::Unconditional, Some(_)) => true,
            (UpsertPolicy::NewerOnly, Some(existing)) => incoming_updated_at > existing,
        }
    }
}

impl FromStr for UpsertPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "unconditional" | "" => Ok(UpsertPolicy::Unconditional),
            "newer_only" | "newer-only" => Ok(UpsertPolicy::NewerOnly),
            other => Err(format!("Unknown upsert policy '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_names_match_ledger_rows() {
        let names = SyncEntityType::ALL
            .iter()
            .map(|entity| entity.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["messages", "profiles", "matches", "events"]);

        for entity in SyncEntityType::ALL {
            assert_eq!(entity.as_str().parse::<SyncEntityType>(), Ok(entity));
        }
        assert!("tombstones".parse::<SyncEntityType>().is_err());
    }

    #[test]
    fn entity_serialization_matches_ledger_names() {
        let json = serde_json::to_string(&SyncEntityType::Matches).expect("serialize entity");
        assert_eq!(json, "\"matches\"");
    }

    #[test]
    fn unconditional_policy_always_overwrites() {
        let policy = UpsertPolicy::Unconditional;
        assert!(policy.should_overwrite(None, 1));
        assert!(policy.should_overwrite(Some(200), 100));
    }

    #[test]
    fn newer_only_policy_rejects_older_and_equal_stamps() {
        let policy = UpsertPolicy::NewerOnly;
        assert!(policy.should_overwrite(None, 1));
        assert!(policy.should_overwrite(Some(100), 200));
        assert!(!policy.should_overwrite(Some(200), 100));
        assert!(!policy.should_overwrite(Some(200), 200));
    }

    #[test]
    fn upsert_policy_parses_config_values() {
        assert_eq!("newer_only".parse(), Ok(UpsertPolicy::NewerOnly));
        assert_eq!("Unconditional".parse(), Ok(UpsertPolicy::Unconditional));
        assert!("sometimes".parse::<UpsertPolicy>().is_err());
    }
}
