//! REST client for the Plaasjapie backend.
//!
//! Covers the four calls the sync engine needs: profile, matches and events reads plus
//! message submission. Reads are retried on transient failures; message submission is
//! attempted once because the outbox owns redelivery.

use async_trait::async_trait;
use log::debug;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::sleep;

use plaasjapie_core::ports::{EventFilter, RemoteBackend};
use plaasjapie_core::records::{EventRecord, MatchRecord, MessagePayload, ProfileRecord};
use plaasjapie_core::sync::SyncEntityType;

use crate::error::{ApiRetryClass, BackendError, Result};
use crate::types::*;

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;
const FETCH_MAX_ATTEMPTS: usize = 3;
const FETCH_BASE_BACKOFF_MS: u64 = 200;
const FETCH_MAX_BACKOFF_MS: u64 = 2_000;
const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

fn fetch_backoff_with_jitter(attempt: usize) -> Duration {
    let exp = (attempt.saturating_sub(1) as u32).min(8);
    let backoff =
        (FETCH_BASE_BACKOFF_MS.saturating_mul(1_u64 << exp)).min(FETCH_MAX_BACKOFF_MS);
    let jitter = rand::thread_rng().gen_range(0..=(backoff / 5).max(1));
    Duration::from_millis(backoff.saturating_add(jitter))
}

fn encode(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

/// Client for the Plaasjapie REST API.
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
    access_token: Arc<RwLock<Option<String>>>,
}

impl BackendClient {
    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("[Backend] Response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[Backend] Response error ({}): {}", status, preview);
    }

    /// Create a new backend client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The API origin (e.g., "https://api.plaasjapie.app")
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: Arc::new(RwLock::new(None)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replaces the bearer token sent with every request. `None` sends anonymous requests.
    pub fn set_access_token(&self, token: Option<String>) {
        match self.access_token.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }

    fn current_token(&self) -> Option<String> {
        match self.access_token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(token) = self.current_token() {
            let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| BackendError::auth("Invalid access token format"))?;
            headers.insert(AUTHORIZATION, auth_value);
        }

        Ok(headers)
    }

    /// Parse a JSON response body.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) {
                return Err(BackendError::api(
                    status.as_u16(),
                    format!("{}: {}", error.code, error.message),
                ));
            }
            return Err(BackendError::api(
                status.as_u16(),
                format!("Request failed: {}", body),
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            log::error!("[Backend] Failed to deserialize response: {}", e);
            BackendError::api(status.as_u16(), format!("Failed to parse response: {}", e))
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .headers(self.headers()?)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// GET with bounded retries on transient failures.
    async fn get_with_retry<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut attempt = 1;
        loop {
            match self.get_json(url).await {
                Ok(value) => return Ok(value),
                Err(err)
                    if attempt < FETCH_MAX_ATTEMPTS
                        && err.retry_class() == ApiRetryClass::Retryable =>
                {
                    let delay = fetch_backoff_with_jitter(attempt);
                    debug!(
                        "[Backend] GET {} failed (attempt {}/{}): {}; retrying in {:?}",
                        url, attempt, FETCH_MAX_ATTEMPTS, err, delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn events_url(&self, filter: &EventFilter) -> String {
        let mut params = Vec::new();
        if let Some(category) = filter.category.as_deref().filter(|c| !c.is_empty()) {
            params.push(format!("category={}", encode(category)));
        }
        if let Some(saved_by) = filter.saved_by.as_deref().filter(|s| !s.is_empty()) {
            params.push(format!("savedBy={}", encode(saved_by)));
        }
        if let Some(start_date) = filter.start_date.as_deref().filter(|d| !d.is_empty()) {
            params.push(format!("startDate={}", encode(start_date)));
        }
        if let Some(since) = filter.updated_since {
            params.push(format!("updatedSince={}", since));
        }
        if let Some(limit) = filter.limit {
            params.push(format!("limit={}", limit));
        }

        let mut url = format!("{}/api/v1/events", self.base_url);
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params.join("&"));
        }
        url
    }

    /// Get a user profile.
    ///
    /// GET /api/v1/users/{userId}
    pub async fn get_profile(&self, user_id: &str) -> Result<ProfileRecord> {
        if user_id.trim().is_empty() {
            return Err(BackendError::invalid_request("User id is required"));
        }
        let url = format!("{}/api/v1/users/{}", self.base_url, encode(user_id));
        let mut profile: ProfileRecord = self.get_with_retry(&url).await?;
        if profile.id.is_empty() {
            profile.id = user_id.to_string();
        }
        Ok(profile)
    }

    /// List the matches of a user, including the other participant's profile.
    ///
    /// GET /api/v1/users/{userId}/matches
    pub async fn list_matches(&self, user_id: &str) -> Result<Vec<MatchRecord>> {
        if user_id.trim().is_empty() {
            return Err(BackendError::invalid_request("User id is required"));
        }
        let url = format!("{}/api/v1/users/{}/matches", self.base_url, encode(user_id));
        let response: MatchesResponse = self.get_with_retry(&url).await?;
        Ok(response.matches)
    }

    /// List events.
    ///
    /// GET /api/v1/events?category=&savedBy=&startDate=&updatedSince=&limit=
    pub async fn list_events(&self, filter: &EventFilter) -> Result<Vec<EventRecord>> {
        let url = self.events_url(filter);
        debug!("[Backend] list_events URL: {}", url);
        let response: EventsResponse = self.get_with_retry(&url).await?;
        Ok(response.events)
    }

    /// Submit a message. The client message id, when present, is sent as the idempotency key
    /// so that a replay of an already-accepted message is not stored twice.
    ///
    /// POST /api/v1/matches/{matchId}/messages
    pub async fn post_message(
        &self,
        match_id: &str,
        sender_id: &str,
        payload: &MessagePayload,
    ) -> Result<String> {
        if match_id.trim().is_empty() || sender_id.trim().is_empty() {
            return Err(BackendError::invalid_request(
                "Match id and sender id are required",
            ));
        }

        let url = format!("{}/api/v1/matches/{}/messages", self.base_url, encode(match_id));
        let mut headers = self.headers()?;
        if let Some(key) = payload.client_message_id.as_deref() {
            let value = HeaderValue::from_str(key)
                .map_err(|_| BackendError::invalid_request("Invalid client message id"))?;
            headers.insert(IDEMPOTENCY_KEY_HEADER, value);
        }

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(&SendMessageRequest { sender_id, payload })
            .send()
            .await?;

        let created: SendMessageResponse = Self::parse_response(response).await?;
        if created.message_id.is_empty() {
            return Err(BackendError::invalid_request(
                "Backend accepted the message without returning an id",
            ));
        }
        Ok(created.message_id)
    }
}

#[async_trait]
impl RemoteBackend for BackendClient {
    async fn fetch_profile(&self, user_id: &str) -> plaasjapie_core::Result<ProfileRecord> {
        self.get_profile(user_id)
            .await
            .map_err(|e| e.into_fetch_error(SyncEntityType::Profiles))
    }

    async fn fetch_matches(&self, user_id: &str) -> plaasjapie_core::Result<Vec<MatchRecord>> {
        self.list_matches(user_id)
            .await
            .map_err(|e| e.into_fetch_error(SyncEntityType::Matches))
    }

    async fn fetch_events(
        &self,
        filter: &EventFilter,
    ) -> plaasjapie_core::Result<Vec<EventRecord>> {
        self.list_events(filter)
            .await
            .map_err(|e| e.into_fetch_error(SyncEntityType::Events))
    }

    async fn send_message(
        &self,
        match_id: &str,
        sender_id: &str,
        payload: &MessagePayload,
    ) -> plaasjapie_core::Result<String> {
        self.post_message(match_id, sender_id, payload)
            .await
            .map_err(BackendError::into_send_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_url_encodes_filter_values() {
        let client = BackendClient::new("https://api.example/").expect("client");
        let filter = EventFilter {
            category: Some("Boere Markte".to_string()),
            saved_by: Some("user-1".to_string()),
            start_date: None,
            updated_since: Some(1_700_000_000_000),
            limit: Some(20),
        };
        assert_eq!(
            client.events_url(&filter),
            "https://api.example/api/v1/events?category=Boere%20Markte&savedBy=user-1&updatedSince=1700000000000&limit=20"
        );
        assert_eq!(
            client.events_url(&EventFilter::default()),
            "https://api.example/api/v1/events"
        );
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let first = fetch_backoff_with_jitter(1);
        assert!(first >= Duration::from_millis(FETCH_BASE_BACKOFF_MS));
        let late = fetch_backoff_with_jitter(20);
        assert!(late <= Duration::from_millis(FETCH_MAX_BACKOFF_MS + FETCH_MAX_BACKOFF_MS / 5));
    }

    #[test]
    fn access_token_is_sent_as_bearer() {
        let client = BackendClient::new("https://api.example").expect("client");
        assert!(client.headers().expect("headers").get(AUTHORIZATION).is_none());

        client.set_access_token(Some("abc".to_string()));
        let headers = client.headers().expect("headers");
        assert_eq!(
            headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()),
            Some("Bearer abc")
        );
    }
}
