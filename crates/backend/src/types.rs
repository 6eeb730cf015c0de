//! Wire types for the backend REST API.

use serde::{Deserialize, Serialize};

use plaasjapie_core::records::{EventRecord, MatchRecord, MessagePayload};

/// Error body returned by the API on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    #[serde(default)]
    pub error: Option<String>,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MatchesResponse {
    #[serde(default)]
    pub matches: Vec<MatchRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventsResponse {
    #[serde(default)]
    pub events: Vec<EventRecord>,
}

/// POST /api/v1/matches/{matchId}/messages
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest<'a> {
    pub sender_id: &'a str,
    #[serde(flatten)]
    pub payload: &'a MessagePayload,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub message_id: String,
}
