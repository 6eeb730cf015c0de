//! Image Cache: remote image URLs resolved to local files, downloaded at most once.

use futures::stream::{self, StreamExt};
use log::{debug, warn};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use plaasjapie_core::{Error, Result};

const DOWNLOAD_TIMEOUT_SECS: u64 = 30;
const PREFETCH_CONCURRENCY: usize = 4;
const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "webp", "heic"];
const FALLBACK_EXTENSION: &str = "img";

pub struct ImageCache {
    dir: PathBuf,
    client: Client,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ImageCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build image client: {}", e)))?;
        Ok(Self::with_client(dir, client))
    }

    pub fn with_client(dir: impl Into<PathBuf>, client: Client) -> Self {
        Self {
            dir: dir.into(),
            client,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic cache file name: hex SHA-256 of the full URL plus its image extension.
    pub fn file_name_for(url: &str) -> String {
        let digest = Sha256::digest(url.as_bytes());
        format!("{:x}.{}", digest, extension_of(url))
    }

    pub fn path_for(&self, url: &str) -> PathBuf {
        self.dir.join(Self::file_name_for(url))
    }

    /// Returns the local path if the image was already downloaded.
    pub async fn cached_path(&self, url: &str) -> Option<PathBuf> {
        let path = self.path_for(url);
        if is_file(&path).await {
            Some(path)
        } else {
            None
        }
    }

    /// Resolves `url` to a local file, downloading it when it is not cached yet.
    pub async fn resolve(&self, url: &str) -> Result<PathBuf> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::image_unavailable(url, "empty URL"));
        }

        let path = self.path_for(url);
        if is_file(&path).await {
            return Ok(path);
        }

        let url_lock = self.lock_for(url).await;
        let result = {
            let _download_guard = url_lock.lock().await;
            // Another caller may have finished the download while we waited.
            if is_file(&path).await {
                Ok(path)
            } else {
                self.download(url, &path).await.map(|_| path)
            }
        };
        self.release_lock(url, url_lock).await;
        result
    }

    /// Resolves many URLs with bounded concurrency. Returns how many are now cached locally.
    pub async fn prefetch<I, S>(&self, urls: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = urls
            .into_iter()
            .map(Into::into)
            .filter(|url| !url.trim().is_empty())
            .collect();
        unique.sort();
        unique.dedup();

        stream::iter(unique)
            .map(|url| async move {
                match self.resolve(&url).await {
                    Ok(_) => true,
                    Err(err) => {
                        debug!("[ImageCache] Prefetch skipped: {}", err);
                        false
                    }
                }
            })
            .buffer_unordered(PREFETCH_CONCURRENCY)
            .filter(|resolved| futures::future::ready(*resolved))
            .count()
            .await
    }

    /// Removes every cached image.
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::storage_unavailable(format!(
                "Failed to clear image cache {}: {}",
                self.dir.display(),
                err
            ))),
        }
    }

    async fn lock_for(&self, url: &str) -> Arc<Mutex<()>> {
        let mut in_flight = self.in_flight.lock().await;
        Arc::clone(
            in_flight
                .entry(url.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    async fn release_lock(&self, url: &str, url_lock: Arc<Mutex<()>>) {
        let mut in_flight = self.in_flight.lock().await;
        // Map entry plus ours: nobody else is waiting on this URL.
        if Arc::strong_count(&url_lock) <= 2 {
            in_flight.remove(url);
        }
    }

    async fn download(&self, url: &str, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            Error::image_unavailable(url, format!("cannot create cache directory: {}", e))
        })?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::image_unavailable(url, e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::image_unavailable(url, format!("HTTP {}", status.as_u16())));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::image_unavailable(url, e.to_string()))?;

        let part = path.with_extension(format!("{}.part", Uuid::new_v4().simple()));
        if let Err(err) = tokio::fs::write(&part, &bytes).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(Error::image_unavailable(url, err.to_string()));
        }
        if let Err(err) = tokio::fs::rename(&part, path).await {
            warn!("[ImageCache] Failed to move download into place: {}", err);
            let _ = tokio::fs::remove_file(&part).await;
            return Err(Error::image_unavailable(url, err.to_string()));
        }

        debug!("[ImageCache] Cached {} bytes for {}", bytes.len(), url);
        Ok(())
    }
}

fn extension_of(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next().unwrap_or(path);
    let Some((_, ext)) = file.rsplit_once('.') else {
        return FALLBACK_EXTENSION;
    };
    IMAGE_EXTENSIONS
        .iter()
        .find(|known| known.eq_ignore_ascii_case(ext))
        .copied()
        .unwrap_or(FALLBACK_EXTENSION)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}
