//! Idempotent raw downloads with retry, backoff and per-key deduplication.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use datasets::DatasetAdapter;
use zampy_common::artifact::partial_path;
use zampy_common::{
    ArtifactKey, ArtifactLayout, ArtifactStatus, DownloadArtifact, DownloadSettings, KeyLocks,
    Result, ZampyError,
};

use crate::index::{ArtifactIndex, IndexStats};

/// Whether the coordinator may contact the remote archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    #[default]
    Download,
    /// Only serve artifacts already on disk; never contact the remote.
    CachedOnly,
}

/// Bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &DownloadSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: settings.initial_backoff(),
            max_backoff: settings.max_backoff(),
        }
    }

    /// Delay before the attempt following one that waited `delay`.
    pub fn next_delay(&self, delay: Duration) -> Duration {
        std::cmp::min(delay * 2, self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&DownloadSettings::default())
    }
}

/// Front door for every raw download.
#[derive(Clone)]
pub struct DownloadCoordinator {
    index: ArtifactIndex,
    layout: ArtifactLayout,
    locks: Arc<KeyLocks>,
    policy: RetryPolicy,
    max_concurrent: usize,
}

impl DownloadCoordinator {
    pub fn new(
        index: ArtifactIndex,
        layout: ArtifactLayout,
        locks: Arc<KeyLocks>,
        settings: &DownloadSettings,
    ) -> Self {
        Self {
            index,
            layout,
            locks,
            policy: RetryPolicy::from_settings(settings),
            max_concurrent: settings.max_concurrent.max(1),
        }
    }

    pub fn index(&self) -> &ArtifactIndex {
        &self.index
    }

    /// Make sure the raw artifact for `key` is on disk.
    ///
    /// At most one request per key is in flight; a second caller waits and
    /// then finds the artifact complete.
    #[instrument(skip(self, adapter), fields(dataset = %key.dataset, key = %key))]
    pub async fn request(
        &self,
        adapter: &dyn DatasetAdapter,
        key: &ArtifactKey,
        mode: RequestMode,
    ) -> Result<DownloadArtifact> {
        let path = self
            .layout
            .raw_path(key, adapter.descriptor().raw_format.extension());
        let _guard = self.locks.lock(&format!("download:{}", key.id())).await;

        if let Some(record) = self.index.get(key).await? {
            if record.status == ArtifactStatus::Complete && record.path.exists() {
                debug!(path = %record.path.display(), "Artifact already complete, skipping download");
                return Ok(DownloadArtifact {
                    key: key.clone(),
                    path: record.path,
                });
            }
        }

        if mode == RequestMode::CachedOnly {
            if path.exists() {
                info!(path = %path.display(), "Adopting raw file found on disk");
                self.index.mark_pending(key, &path).await?;
                self.index.mark_complete(key, 0).await?;
                return Ok(DownloadArtifact {
                    key: key.clone(),
                    path,
                });
            }
            return Err(ZampyError::ArtifactMissing(key.id()));
        }

        self.index.mark_pending(key, &path).await?;
        self.download_with_retry(adapter, key, &path).await
    }

    async fn download_with_retry(
        &self,
        adapter: &dyn DatasetAdapter,
        key: &ArtifactKey,
        path: &Path,
    ) -> Result<DownloadArtifact> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp_path = partial_path(path);

        let mut attempts = 0;
        let mut delay = self.policy.initial_backoff;

        loop {
            attempts += 1;
            let error = match adapter.download(key, &temp_path).await {
                Ok(_) => match fs::rename(&temp_path, path).await {
                    Ok(()) => {
                        self.index.mark_complete(key, attempts).await?;
                        info!(
                            path = %path.display(),
                            attempts = attempts,
                            "Download completed"
                        );
                        return Ok(DownloadArtifact {
                            key: key.clone(),
                            path: path.to_path_buf(),
                        });
                    }
                    Err(e) => ZampyError::from(e),
                },
                Err(e) => e,
            };

            fs::remove_file(&temp_path).await.ok();

            if !error.is_transient() {
                warn!(error = %error, attempts = attempts, "Download failed permanently");
                self.index
                    .mark_failed(key, attempts, &error.to_string())
                    .await?;
                return Err(error);
            }

            if attempts >= self.policy.max_attempts {
                warn!(error = %error, attempts = attempts, "Download retries exhausted");
                self.index
                    .mark_failed(key, attempts, &error.to_string())
                    .await?;
                return Err(ZampyError::DownloadFailed {
                    key: key.id(),
                    attempts,
                    source: Box::new(error),
                });
            }

            warn!(
                error = %error,
                attempt = attempts,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Download failed, retrying"
            );
            self.index
                .record_attempt(key, attempts, &error.to_string())
                .await?;

            tokio::time::sleep(delay).await;
            delay = self.policy.next_delay(delay);
        }
    }

    /// Request several keys with at most `max_concurrent` in flight.
    ///
    /// Every key is attempted even if an earlier one fails, so successful
    /// downloads are cached for the next run. Results keep the order of
    /// `keys`; the first error (in key order) is returned.
    pub async fn request_all(
        &self,
        adapter: Arc<dyn DatasetAdapter>,
        keys: &[ArtifactKey],
        mode: RequestMode,
    ) -> Result<Vec<DownloadArtifact>> {
        let mut results: Vec<(usize, Result<DownloadArtifact>)> =
            stream::iter(keys.iter().enumerate())
                .map(|(i, key)| {
                    let adapter = adapter.clone();
                    async move { (i, self.request(adapter.as_ref(), key, mode).await) }
                })
                .buffer_unordered(self.max_concurrent)
                .collect()
                .await;

        results.sort_by_key(|(i, _)| *i);
        results.into_iter().map(|(_, r)| r).collect()
    }

    /// Index counts per status.
    pub async fn stats(&self) -> Result<IndexStats> {
        self.index.stats().await
    }
}
