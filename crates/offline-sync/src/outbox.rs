//! Outbox Manager: user-authored messages are delivered now or persisted and replayed later.

use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use plaasjapie_core::ports::{LocalStore, RemoteBackend};
use plaasjapie_core::records::MessagePayload;
use plaasjapie_core::sync::{NewOutboxMessage, OutboxMessage, ReplayReport, SendOutcome};
use plaasjapie_core::{Error, Result};

use crate::connectivity::ConnectivityMonitor;

pub struct OutboxManager {
    store: Arc<dyn LocalStore>,
    backend: Arc<dyn RemoteBackend>,
    connectivity: ConnectivityMonitor,
    replay_mutex: Mutex<()>,
}

impl OutboxManager {
    pub fn new(
        store: Arc<dyn LocalStore>,
        backend: Arc<dyn RemoteBackend>,
        connectivity: ConnectivityMonitor,
    ) -> Self {
        Self {
            store,
            backend,
            connectivity,
            replay_mutex: Mutex::new(()),
        }
    }

    /// Sends a message, falling back to the outbox when offline or when the backend call fails.
    ///
    /// The returned id is the backend message id when delivered, otherwise the local id that
    /// the replay will reuse as its idempotency key. Fails only when the message could neither
    /// be delivered nor persisted.
    pub async fn send(
        &self,
        match_id: &str,
        sender_id: &str,
        mut payload: MessagePayload,
    ) -> Result<SendOutcome> {
        if match_id.trim().is_empty() || sender_id.trim().is_empty() {
            return Err(Error::invalid_record("Match id and sender id are required"));
        }
        payload.validate()?;

        let local_id = payload
            .client_message_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        payload.client_message_id = Some(local_id.clone());

        if !self.connectivity.is_online() {
            return self
                .enqueue(local_id, match_id, sender_id, payload, Error::Offline.to_string())
                .await;
        }

        {
            // Held so a concurrent replay cannot interleave with the immediate send.
            let _replay_guard = self.replay_mutex.lock().await;
            if !self.has_pending_for(match_id) {
                return match self.backend.send_message(match_id, sender_id, &payload).await {
                    Ok(message_id) => {
                        debug!("[Outbox] Delivered '{}' as '{}'", local_id, message_id);
                        self.record_delivered(&local_id, match_id, sender_id, payload, &message_id)
                            .await;
                        Ok(SendOutcome::Delivered { message_id })
                    }
                    Err(err) => {
                        warn!("[Outbox] Immediate send of '{}' failed: {}", local_id, err);
                        self.enqueue(local_id, match_id, sender_id, payload, err.to_string())
                            .await
                    }
                };
            }
        }

        // Earlier messages of this conversation are still queued; delivering this one now
        // would overtake them.
        self.enqueue(
            local_id.clone(),
            match_id,
            sender_id,
            payload,
            "queued behind earlier messages".to_string(),
        )
        .await?;
        let report = self.replay_pending().await?;
        let delivered = self
            .conversation_history(match_id)
            .into_iter()
            .find(|message| message.id == local_id && message.sent);
        Ok(match delivered {
            Some(message) => SendOutcome::Delivered {
                message_id: message.remote_id.unwrap_or(message.id),
            },
            None => SendOutcome::Pending {
                local_id,
                reason: report
                    .last_error
                    .unwrap_or_else(|| "queued behind earlier messages".to_string()),
            },
        })
    }

    fn has_pending_for(&self, match_id: &str) -> bool {
        self.store
            .list_unsent_messages()
            .map(|listing| listing.messages.iter().any(|m| m.match_id == match_id))
            .unwrap_or(false)
    }

    async fn enqueue(
        &self,
        local_id: String,
        match_id: &str,
        sender_id: &str,
        payload: MessagePayload,
        reason: String,
    ) -> Result<SendOutcome> {
        let message = NewOutboxMessage::new(local_id.clone(), match_id, sender_id, payload);
        match self.store.append_outbox_message(message).await {
            Ok(_) => {}
            // Already queued under this id by an earlier attempt.
            Err(Error::DuplicateMessageId(_)) => {}
            Err(err) => return Err(err),
        }

        info!("[Outbox] Queued '{}' for replay ({})", local_id, reason);
        Ok(SendOutcome::Pending { local_id, reason })
    }

    /// Keeps delivered messages in the local history. Best effort: the backend already has them.
    ///
    /// The row is written as sent in one step, so a replay can never pick it up.
    async fn record_delivered(
        &self,
        local_id: &str,
        match_id: &str,
        sender_id: &str,
        payload: MessagePayload,
        message_id: &str,
    ) {
        let message = NewOutboxMessage::new(local_id, match_id, sender_id, payload);
        match self
            .store
            .append_sent_message(message, message_id.to_string())
            .await
        {
            Ok(_) => {}
            // Queued earlier under the same client id; flip that row instead.
            Err(Error::DuplicateMessageId(_)) => {
                if let Err(err) = self
                    .store
                    .mark_message_sent(local_id, Some(message_id.to_string()))
                    .await
                {
                    warn!("[Outbox] Failed to mark delivered '{}' as sent: {}", local_id, err);
                }
            }
            Err(err) => debug!("[Outbox] Delivered '{}' not kept locally: {}", local_id, err),
        }
    }

    /// Replays unsent messages oldest first, stopping at the first failure.
    ///
    /// Concurrent calls are serialized so a row is never in flight twice.
    pub async fn replay_pending(&self) -> Result<ReplayReport> {
        let _replay_guard = self.replay_mutex.lock().await;

        if !self.connectivity.is_online() {
            let remaining = self
                .store
                .list_unsent_messages()
                .map(|listing| listing.messages.len())
                .unwrap_or(0);
            return Ok(ReplayReport {
                remaining,
                last_error: Some(Error::Offline.to_string()),
                ..ReplayReport::default()
            });
        }

        let listing = self.store.list_unsent_messages()?;
        let mut report = ReplayReport {
            skipped_corrupt: listing.corrupt_rows.len(),
            ..ReplayReport::default()
        };
        for row in &listing.corrupt_rows {
            warn!("[Outbox] Skipping unreadable message '{}': {}", row.id, row.reason);
        }

        let total = listing.messages.len();
        for message in listing.messages {
            report.attempted += 1;
            match self.deliver(&message).await {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    warn!(
                        "[Outbox] Replay stopped at '{}' after {} delivered: {}",
                        message.id, report.delivered, err
                    );
                    report.last_error = Some(err.to_string());
                    break;
                }
            }
        }
        report.remaining = total - report.delivered;

        if report.attempted > 0 {
            info!(
                "[Outbox] Replay delivered {}/{} (remaining {}, corrupt {})",
                report.delivered, total, report.remaining, report.skipped_corrupt
            );
        }
        Ok(report)
    }

    async fn deliver(&self, message: &OutboxMessage) -> Result<()> {
        let mut payload = message.payload.clone();
        if payload.client_message_id.is_none() {
            payload.client_message_id = Some(message.id.clone());
        }

        match self
            .backend
            .send_message(&message.match_id, &message.sender_id, &payload)
            .await
        {
            Ok(remote_id) => {
                self.store
                    .mark_message_sent(&message.id, Some(remote_id))
                    .await?;
                Ok(())
            }
            Err(err) => {
                if let Err(record_err) = self
                    .store
                    .record_send_failure(&message.id, err.to_string())
                    .await
                {
                    warn!(
                        "[Outbox] Failed to record send failure for '{}': {}",
                        message.id, record_err
                    );
                }
                Err(err)
            }
        }
    }

    /// Local message history of one conversation, oldest first. Never fails.
    pub fn conversation_history(&self, match_id: &str) -> Vec<OutboxMessage> {
        self.store
            .list_conversation_messages(match_id)
            .unwrap_or_else(|err| {
                warn!("[Outbox] History for '{}' unavailable: {}", match_id, err);
                Vec::new()
            })
    }

    pub fn pending_count(&self) -> usize {
        self.store
            .list_unsent_messages()
            .map(|listing| listing.messages.len())
            .unwrap_or(0)
    }
}
