//! Runtime configuration for the offline sync engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use plaasjapie_core::sync::{
    UpsertPolicy, CONNECTIVITY_POLL_INTERVAL_SECS, SYNC_FOREGROUND_INTERVAL_SECS,
};
use plaasjapie_core::{Error, Result};

const ENV_API_URL: &str = "PLAASJAPIE_API_URL";
const ENV_DATA_DIR: &str = "PLAASJAPIE_DATA_DIR";
const ENV_IMAGE_CACHE_DIR: &str = "PLAASJAPIE_IMAGE_CACHE_DIR";
const ENV_SYNC_INTERVAL_SECS: &str = "PLAASJAPIE_SYNC_INTERVAL_SECS";
const ENV_CONNECTIVITY_POLL_SECS: &str = "PLAASJAPIE_CONNECTIVITY_POLL_SECS";
const ENV_UPSERT_POLICY: &str = "PLAASJAPIE_UPSERT_POLICY";
const ENV_PREFETCH_IMAGES: &str = "PLAASJAPIE_PREFETCH_IMAGES";
const ENV_EVENT_CATEGORY: &str = "PLAASJAPIE_EVENT_CATEGORY";

const DEFAULT_IMAGE_DIR_NAME: &str = "images";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Backend origin without trailing slash.
    pub api_base_url: String,
    /// Directory holding the database file.
    pub data_dir: PathBuf,
    pub image_cache_dir: PathBuf,
    pub sync_interval_secs: u64,
    pub connectivity_poll_secs: u64,
    pub upsert_policy: UpsertPolicy,
    pub prefetch_images: bool,
    /// Category applied to every event pull when set.
    pub event_category: Option<String>,
}

impl SyncConfig {
    pub fn new(api_base_url: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            api_base_url: api_base_url.into().trim().trim_end_matches('/').to_string(),
            image_cache_dir: data_dir.join(DEFAULT_IMAGE_DIR_NAME),
            data_dir,
            sync_interval_secs: SYNC_FOREGROUND_INTERVAL_SECS,
            connectivity_poll_secs: CONNECTIVITY_POLL_INTERVAL_SECS,
            upsert_policy: UpsertPolicy::default(),
            prefetch_images: true,
            event_category: None,
        }
    }

    /// Reads the configuration from `PLAASJAPIE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_base_url = read(ENV_API_URL).ok_or_else(|| {
            Error::Config(format!(
                "{} not configured. Remote sync is disabled.",
                ENV_API_URL
            ))
        })?;
        let data_dir = read(ENV_DATA_DIR).unwrap_or_else(|| ".".to_string());
        let mut config = Self::new(api_base_url, data_dir);

        if let Some(dir) = read(ENV_IMAGE_CACHE_DIR) {
            config.image_cache_dir = PathBuf::from(dir);
        }
        if let Some(value) = read(ENV_SYNC_INTERVAL_SECS) {
            config.sync_interval_secs = parse_secs(ENV_SYNC_INTERVAL_SECS, &value)?;
        }
        if let Some(value) = read(ENV_CONNECTIVITY_POLL_SECS) {
            config.connectivity_poll_secs = parse_secs(ENV_CONNECTIVITY_POLL_SECS, &value)?;
        }
        if let Some(value) = read(ENV_UPSERT_POLICY) {
            config.upsert_policy = value
                .parse()
                .map_err(|e: String| Error::Config(format!("{}: {}", ENV_UPSERT_POLICY, e)))?;
        }
        if let Some(value) = read(ENV_PREFETCH_IMAGES) {
            config.prefetch_images = parse_bool(ENV_PREFETCH_IMAGES, &value)?;
        }
        config.event_category = read(ENV_EVENT_CATEGORY);

        Ok(config)
    }

    pub fn data_dir_str(&self) -> String {
        self.data_dir.to_string_lossy().to_string()
    }

    pub fn connectivity_poll_interval(&self) -> Duration {
        Duration::from_secs(self.connectivity_poll_secs)
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64> {
    match value.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(Error::Config(format!(
            "{} must be a positive number of seconds, got '{}'",
            key, value
        ))),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{} must be true or false, got '{}'", key, value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn api_url_is_required() {
        let err = SyncConfig::from_lookup(lookup(&[])).expect_err("missing url");
        assert!(matches!(err, Error::Config(_)));
        let err = SyncConfig::from_lookup(lookup(&[(ENV_API_URL, "   ")])).expect_err("blank url");
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn defaults_apply_when_only_url_is_set() {
        let config =
            SyncConfig::from_lookup(lookup(&[(ENV_API_URL, "https://api.example/")])).expect("config");
        assert_eq!(config.api_base_url, "https://api.example");
        assert_eq!(config.data_dir, PathBuf::from("."));
        assert_eq!(config.image_cache_dir, PathBuf::from("./images"));
        assert_eq!(config.sync_interval_secs, SYNC_FOREGROUND_INTERVAL_SECS);
        assert_eq!(config.upsert_policy, UpsertPolicy::Unconditional);
        assert!(config.prefetch_images);
        assert_eq!(config.event_category, None);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = SyncConfig::from_lookup(lookup(&[
            (ENV_API_URL, "https://api.example"),
            (ENV_DATA_DIR, "/var/lib/plaasjapie"),
            (ENV_IMAGE_CACHE_DIR, "/tmp/pj-images"),
            (ENV_SYNC_INTERVAL_SECS, "120"),
            (ENV_CONNECTIVITY_POLL_SECS, "2"),
            (ENV_UPSERT_POLICY, "newer_only"),
            (ENV_PREFETCH_IMAGES, "false"),
            (ENV_EVENT_CATEGORY, "markte"),
        ]))
        .expect("config");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/plaasjapie"));
        assert_eq!(config.image_cache_dir, PathBuf::from("/tmp/pj-images"));
        assert_eq!(config.sync_interval_secs, 120);
        assert_eq!(config.connectivity_poll_interval(), Duration::from_secs(2));
        assert_eq!(config.upsert_policy, UpsertPolicy::NewerOnly);
        assert!(!config.prefetch_images);
        assert_eq!(config.event_category.as_deref(), Some("markte"));
    }

    #[test]
    fn invalid_values_are_config_errors() {
        for (key, value) in [
            (ENV_SYNC_INTERVAL_SECS, "0"),
            (ENV_CONNECTIVITY_POLL_SECS, "soon"),
            (ENV_UPSERT_POLICY, "sometimes"),
            (ENV_PREFETCH_IMAGES, "maybe"),
        ] {
            let result =
                SyncConfig::from_lookup(lookup(&[(ENV_API_URL, "https://api.example"), (key, value)]));
            assert!(matches!(result, Err(Error::Config(_))), "{} = {}", key, value);
        }
    }
}
