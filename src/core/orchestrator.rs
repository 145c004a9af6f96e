//! Download orchestration
//!
//! One `handle` call drives the full lifecycle of a download: validate the
//! URL, take the per-URL lock, borrow a session from the pool, run the
//! platform extractor under the retry policy, verify the artifact on disk
//! and publish progress milestones along the way. The lock guard travels
//! inside the returned `CompletedDownload` so the key stays held while the
//! caller streams the file, and is released on drop no matter how streaming
//! ends.

use crate::core::lock::{DownloadLockRegistry, LockAttempt, LockGuard};
use crate::core::pool::ResourcePool;
use crate::core::progress::{ProgressStatus, ProgressTracker, ProgressUpdate};
use crate::core::retry::RetryPolicy;
use crate::error::VgrabError;
use crate::extractor::{
    ExtractedMedia, Extractor, MediaRequest, Platform, SessionFactory,
};
use crate::utils::filename::to_safe_filename;
use crate::utils::mime::{content_type_for, has_known_signature};
use crate::utils::url::{detect_platform, lock_key};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// An incoming download request
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    /// Explicit platform override; detected from the URL when absent
    #[serde(default)]
    pub platform: Option<Platform>,
    /// Desired container/format, e.g. "mp4" or "mp3"
    #[serde(default)]
    pub format: Option<String>,
    /// Desired quality, e.g. "720p"
    #[serde(default)]
    pub quality: Option<String>,
    /// Caller-chosen progress id; generated when absent
    #[serde(default)]
    pub id: Option<String>,
}

/// A finished download, ready to stream.
///
/// Holds the download lock until dropped so a duplicate request cannot start
/// while the artifact is still being served.
#[derive(Debug)]
pub struct CompletedDownload {
    pub download_id: String,
    pub artifact: ExtractedMedia,
    pub file_name: String,
    pub content_type: &'static str,
    lock_guard: Option<LockGuard>,
}

impl CompletedDownload {
    /// Detach the lock guard, transferring release responsibility to the
    /// caller (the server attaches it to the response stream).
    pub fn take_lock_guard(&mut self) -> Option<LockGuard> {
        self.lock_guard.take()
    }
}

/// Drives downloads end to end
pub struct Orchestrator {
    locks: DownloadLockRegistry,
    pool: ResourcePool<SessionFactory>,
    progress: ProgressTracker,
    retry: RetryPolicy,
    extractors: HashMap<Platform, Arc<dyn Extractor>>,
    downloads_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(
        locks: DownloadLockRegistry,
        pool: ResourcePool<SessionFactory>,
        progress: ProgressTracker,
        retry: RetryPolicy,
        downloads_dir: PathBuf,
    ) -> Self {
        Self {
            locks,
            pool,
            progress,
            retry,
            extractors: HashMap::new(),
            downloads_dir,
        }
    }

    /// Register the extractor for a platform, replacing any previous one
    pub fn register_extractor(&mut self, extractor: Arc<dyn Extractor>) {
        self.extractors.insert(extractor.platform(), extractor);
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn downloads_dir(&self) -> &PathBuf {
        &self.downloads_dir
    }

    /// Run one download to completion.
    ///
    /// Failures of a run that held the lock are published to the progress
    /// tracker before they propagate, so a polling client always sees why
    /// its download stopped. A duplicate rejection writes nothing: when the
    /// caller reuses the in-flight download's id, the record belongs to the
    /// live run and must keep describing it.
    pub async fn handle(&self, request: DownloadRequest) -> Result<CompletedDownload, VgrabError> {
        let platform = match request.platform {
            Some(platform) => platform,
            None => detect_platform(&request.url)?,
        };
        let download_id = request
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let key = lock_key(&request.url)?;
        let guard = match self.locks.try_acquire(&key, &download_id) {
            LockAttempt::Acquired { stale_owner_evicted } => {
                if stale_owner_evicted {
                    warn!("download {} evicted a stale lock on {}", download_id, key);
                }
                LockGuard::new(self.locks.clone(), key)
            }
            LockAttempt::Rejected { retry_after } => {
                let retry_after_secs = retry_after.as_secs().max(1);
                debug!(
                    "download {} rejected, key {} busy for another {}s",
                    download_id, key, retry_after_secs
                );
                return Err(VgrabError::AlreadyInProgress { retry_after_secs });
            }
        };

        self.progress.update(
            &download_id,
            ProgressUpdate::phase(ProgressStatus::Queued, 0),
        );

        info!("download {} started for {} ({})", download_id, request.url, platform);
        match self.run_locked(&download_id, platform, &request).await {
            Ok(artifact) => {
                self.progress.mark_complete(&download_id);
                let extension = artifact
                    .path
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or_else(|| artifact.media_type.default_extension())
                    .to_string();
                let title = artifact.title.as_deref().unwrap_or(&download_id);
                Ok(CompletedDownload {
                    file_name: to_safe_filename(title, &extension),
                    content_type: content_type_for(artifact.media_type, &extension),
                    download_id,
                    artifact,
                    lock_guard: Some(guard),
                })
            }
            Err(error) => {
                warn!("download {} failed: {}", download_id, error);
                self.progress.mark_error(&download_id, error.to_string());
                // Dropping the guard here frees the key for an immediate retry
                drop(guard);
                Err(error)
            }
        }
    }

    /// The locked section: session acquisition, extraction under retry,
    /// artifact verification.
    async fn run_locked(
        &self,
        download_id: &str,
        platform: Platform,
        request: &DownloadRequest,
    ) -> Result<ExtractedMedia, VgrabError> {
        let extractor = self
            .extractors
            .get(&platform)
            .ok_or_else(|| VgrabError::UnsupportedPlatform(platform.to_string()))?
            .clone();

        self.progress.update(
            download_id,
            ProgressUpdate::phase(ProgressStatus::Started, 5),
        );

        let session = self.pool.acquire().await?;
        self.progress.update(
            download_id,
            ProgressUpdate::phase(ProgressStatus::Initializing, 10),
        );

        let media_request = MediaRequest {
            url: request.url.clone(),
            format: request.format.clone(),
            quality: request.quality.clone(),
        };

        self.progress.update(
            download_id,
            ProgressUpdate::phase(ProgressStatus::Downloading, 20),
        );

        let artifact = self
            .retry
            .run(&format!("extract {}", request.url), || {
                let extractor = extractor.clone();
                let session = &session;
                let media_request = media_request.clone();
                let dest_dir = self.downloads_dir.clone();
                Box::pin(async move {
                    let media = extractor.extract(session, &media_request, &dest_dir).await?;
                    verify_artifact(&media).await?;
                    Ok(media)
                })
            })
            .await?;

        self.progress.update(
            download_id,
            ProgressUpdate::phase(ProgressStatus::Processing, 85),
        );

        // Return the session before the caller starts streaming; the slow
        // client should never pin a pooled session
        drop(session);

        self.progress.update(
            download_id,
            ProgressUpdate::phase(ProgressStatus::Finalizing, 95),
        );
        Ok(artifact)
    }
}

/// Check the artifact on disk before declaring success.
///
/// A failing artifact is deleted and reported as transient so the retry
/// policy re-runs the extraction instead of serving garbage.
async fn verify_artifact(media: &ExtractedMedia) -> Result<(), VgrabError> {
    let metadata = tokio::fs::metadata(&media.path).await.map_err(|_| {
        VgrabError::InvalidArtifact("extractor reported success but wrote no file".to_string())
    })?;

    if metadata.len() == 0 {
        let _ = tokio::fs::remove_file(&media.path).await;
        return Err(VgrabError::InvalidArtifact("artifact is empty".to_string()));
    }

    let mut head = [0u8; 16];
    let mut file = tokio::fs::File::open(&media.path).await?;
    let read = file.read(&mut head).await?;

    if !has_known_signature(&head[..read], media.media_type) {
        warn!(
            "artifact {} has no recognizable {} signature, discarding",
            media.path.display(),
            media.media_type.default_extension()
        );
        let _ = tokio::fs::remove_file(&media.path).await;
        return Err(VgrabError::InvalidArtifact(
            "artifact does not look like the expected media container".to_string(),
        ));
    }

    debug!(
        "artifact {} verified ({} bytes)",
        media.path.display(),
        metadata.len()
    );
    Ok(())
}
