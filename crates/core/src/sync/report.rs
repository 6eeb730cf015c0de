//! Outcome types reported by the outbox and the sync orchestrator.

use serde::{Deserialize, Serialize};

use super::model::SyncEntityType;

/// Result of submitting a message through the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SendOutcome {
    /// The backend accepted the message immediately.
    Delivered { message_id: String },
    /// The message was persisted locally and will be replayed.
    Pending { local_id: String, reason: String },
}

impl SendOutcome {
    pub fn id(&self) -> &str {
        match self {
            SendOutcome::Delivered { message_id } => message_id,
            SendOutcome::Pending { local_id, .. } => local_id,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, SendOutcome::Pending { .. })
    }
}

/// Summary of one outbox replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub attempted: usize,
    pub delivered: usize,
    /// Unsent rows still waiting after this pass.
    pub remaining: usize,
    /// Rows whose persisted payload no longer decodes; they are left in place.
    pub skipped_corrupt: usize,
    pub last_error: Option<String>,
}

impl ReplayReport {
    /// True when nothing deliverable is left pending.
    pub fn is_complete(&self) -> bool {
        self.remaining == 0 && self.last_error.is_none()
    }
}

/// Per-invocation state of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "entity", rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Syncing(SyncEntityType),
    Succeeded(SyncEntityType),
    Failed(SyncEntityType),
}

/// Terminal state of one entity type within a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EntitySyncState {
    Succeeded { records: usize },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySyncOutcome {
    pub entity: SyncEntityType,
    pub state: EntitySyncState,
}

impl EntitySyncOutcome {
    pub fn succeeded(entity: SyncEntityType, records: usize) -> Self {
        Self {
            entity,
            state: EntitySyncState::Succeeded { records },
        }
    }

    pub fn failed(entity: SyncEntityType, error: impl Into<String>) -> Self {
        Self {
            entity,
            state: EntitySyncState::Failed {
                error: error.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.state, EntitySyncState::Succeeded { .. })
    }
}

/// Aggregate result of a full sync pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub started_at: i64,
    pub finished_at: i64,
    pub outcomes: Vec<EntitySyncOutcome>,
    pub replay: Option<ReplayReport>,
}

impl SyncReport {
    /// At least one entity type succeeded. Partial success is a valid outcome.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().any(EntitySyncOutcome::is_success)
    }

    /// Every entity type succeeded.
    pub fn is_complete(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(EntitySyncOutcome::is_success)
    }

    pub fn outcome(&self, entity: SyncEntityType) -> Option<&EntitySyncOutcome> {
        self.outcomes.iter().find(|outcome| outcome.entity == entity)
    }

    pub fn succeeded(&self) -> Vec<SyncEntityType> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.is_success())
            .map(|outcome| outcome.entity)
            .collect()
    }

    pub fn failed(&self) -> Vec<SyncEntityType> {
        self.outcomes
            .iter()
            .filter(|outcome| !outcome.is_success())
            .map(|outcome| outcome.entity)
            .collect()
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcomes: Vec<EntitySyncOutcome>) -> SyncReport {
        SyncReport {
            started_at: 10,
            finished_at: 25,
            outcomes,
            replay: None,
        }
    }

    #[test]
    fn partial_success_is_success_but_not_complete() {
        let report = report(vec![
            EntitySyncOutcome::succeeded(SyncEntityType::Profiles, 1),
            EntitySyncOutcome::succeeded(SyncEntityType::Matches, 3),
            EntitySyncOutcome::failed(SyncEntityType::Events, "HTTP 503"),
        ]);
        assert!(report.is_success());
        assert!(!report.is_complete());
        assert_eq!(report.failed(), vec![SyncEntityType::Events]);
        assert_eq!(
            report.succeeded(),
            vec![SyncEntityType::Profiles, SyncEntityType::Matches]
        );
        assert_eq!(report.duration_ms(), 15);
    }

    #[test]
    fn all_failed_is_not_success() {
        let report = report(vec![EntitySyncOutcome::failed(SyncEntityType::Profiles, "x")]);
        assert!(!report.is_success());
        assert!(!report.is_complete());
    }

    #[test]
    fn replay_report_completion() {
        assert!(ReplayReport::default().is_complete());
        let pending = ReplayReport {
            attempted: 2,
            delivered: 1,
            remaining: 1,
            skipped_corrupt: 0,
            last_error: Some("HTTP 500".to_string()),
        };
        assert!(!pending.is_complete());
    }

    #[test]
    fn send_outcome_exposes_identifier() {
        let pending = SendOutcome::Pending {
            local_id: "local-1".to_string(),
            reason: "offline".to_string(),
        };
        assert!(pending.is_pending());
        assert_eq!(pending.id(), "local-1");
        let delivered = SendOutcome::Delivered {
            message_id: "remote-1".to_string(),
        };
        assert!(!delivered.is_pending());
        assert_eq!(delivered.id(), "remote-1");
    }
}
