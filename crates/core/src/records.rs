//! Typed payloads for cached rows and outgoing messages.
//!
//! Each record keeps unknown backend fields in `extra` so that a newer backend schema
//! survives a round trip through the local cache.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{Error, Result};

fn check_row_id(kind: &str, row_id: &str, record_id: &str) -> Result<()> {
    if row_id.trim().is_empty() {
        return Err(Error::invalid_record(format!("{} id must not be empty", kind)));
    }
    if !record_id.is_empty() && record_id != row_id {
        return Err(Error::invalid_record(format!(
            "{} payload id '{}' does not match row id '{}'",
            kind, record_id, row_id
        )));
    }
    Ok(())
}

/// Cached user profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gallery_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interests: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProfileRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Validates the record against the identifier it is stored under.
    pub fn validate(&self, row_id: &str) -> Result<()> {
        check_row_id("Profile", row_id, &self.id)
    }

    /// Remote image URLs referenced by this profile.
    pub fn image_urls(&self) -> Vec<&str> {
        self.image_url
            .iter()
            .chain(self.gallery_urls.iter())
            .map(String::as_str)
            .filter(|url| !url.is_empty())
            .collect()
    }
}

/// Preview of the newest message of a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessageSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub sender_id: String,
    #[serde(rename = "type", default = "LastMessageSummary::default_kind")]
    pub kind: String,
}

impl LastMessageSummary {
    fn default_kind() -> String {
        "text".to_string()
    }
}

/// Cached match between the current user and another user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    #[serde(default, alias = "matchId")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessageSummary>,
    /// Epoch milliseconds of the newest message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MatchRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self, row_id: &str) -> Result<()> {
        check_row_id("Match", row_id, &self.id)?;
        if let Some(profile) = &self.profile {
            if profile.id.is_empty() {
                return Err(Error::invalid_record(format!(
                    "Match '{}' embeds a profile without id",
                    row_id
                )));
            }
        }
        Ok(())
    }
}

/// Cached community event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// ISO-8601 date as issued by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendees: Option<u32>,
    #[serde(default)]
    pub saved: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EventRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self, row_id: &str) -> Result<()> {
        check_row_id("Event", row_id, &self.id)
    }
}

/// Body of a user-authored message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MessageBody {
    #[serde(rename_all = "camelCase")]
    Text { text: String },
    #[serde(rename_all = "camelCase")]
    Voice {
        voice_note_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
}

/// Outgoing message payload as sent to the backend and stored in the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    /// Stable client identifier, reused as the idempotency key on every attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
    #[serde(flatten)]
    pub body: MessageBody,
}

impl MessagePayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            client_message_id: None,
            receiver_id: None,
            body: MessageBody::Text { text: text.into() },
        }
    }

    pub fn voice(voice_note_url: impl Into<String>, duration_ms: Option<u64>) -> Self {
        Self {
            client_message_id: None,
            receiver_id: None,
            body: MessageBody::Voice {
                voice_note_url: voice_note_url.into(),
                duration_ms,
            },
        }
    }

    pub fn with_receiver(mut self, receiver_id: impl Into<String>) -> Self {
        self.receiver_id = Some(receiver_id.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        match &self.body {
            MessageBody::Text { text } if text.trim().is_empty() => {
                Err(Error::invalid_record("Text message must not be empty"))
            }
            MessageBody::Voice { voice_note_url, .. } if voice_note_url.trim().is_empty() => {
                Err(Error::invalid_record("Voice message requires a voice note URL"))
            }
            _ => Ok(()),
        }
    }
}
