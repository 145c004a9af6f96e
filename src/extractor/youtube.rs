//! YouTube extraction via the yt-dlp subprocess
//!
//! yt-dlp manages its own HTTP stack, fragment parallelism and muxing; this
//! extractor builds the tuned argument set, enforces a wall-clock timeout
//! and classifies stderr into errors the retry policy understands.

use crate::error::VgrabError;
use crate::extractor::{ExtractedMedia, Extractor, MediaRequest, MediaType, Platform, Session};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// yt-dlp invocation settings
#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    /// Path to the yt-dlp binary
    pub binary: PathBuf,
    /// Wall-clock limit for one invocation
    pub timeout: Duration,
    /// Parallel fragment downloads
    pub concurrent_fragments: u32,
    /// Per-fragment retry budget (yt-dlp internal)
    pub fragment_retries: u32,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("yt-dlp"),
            timeout: Duration::from_secs(180),
            concurrent_fragments: 16,
            fragment_retries: 10,
        }
    }
}

/// YouTube extractor shelling out to yt-dlp
pub struct YtDlpExtractor {
    config: YtDlpConfig,
}

impl YtDlpExtractor {
    pub fn new() -> Self {
        Self::with_config(YtDlpConfig::default())
    }

    pub fn with_config(config: YtDlpConfig) -> Self {
        Self { config }
    }

    fn build_args(&self, request: &MediaRequest, output: &Path) -> Vec<String> {
        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-part".to_string(),
            "--no-warnings".to_string(),
            "--no-check-certificates".to_string(),
            "--retries".to_string(),
            "3".to_string(),
            "--fragment-retries".to_string(),
            self.config.fragment_retries.to_string(),
            "--concurrent-fragments".to_string(),
            self.config.concurrent_fragments.to_string(),
            "--buffer-size".to_string(),
            "16K".to_string(),
            "--http-chunk-size".to_string(),
            "10M".to_string(),
            "-o".to_string(),
            output.to_string_lossy().into_owned(),
        ];

        if wants_audio(request) {
            args.extend([
                "-x".to_string(),
                "--audio-format".to_string(),
                "mp3".to_string(),
                "--audio-quality".to_string(),
                "0".to_string(),
            ]);
        } else {
            args.extend([
                "--merge-output-format".to_string(),
                "mp4".to_string(),
                "-f".to_string(),
                format_selector(request.quality.as_deref()).to_string(),
            ]);
        }

        args.push(request.url.clone());
        args
    }
}

impl Default for YtDlpExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    fn platform(&self) -> Platform {
        Platform::Youtube
    }

    async fn extract(
        &self,
        _session: &Session,
        request: &MediaRequest,
        dest_dir: &Path,
    ) -> Result<ExtractedMedia, VgrabError> {
        let media_type = if wants_audio(request) {
            MediaType::Audio
        } else {
            MediaType::Video
        };
        let output = dest_dir.join(format!(
            "{}.{}",
            Uuid::new_v4(),
            media_type.default_extension()
        ));

        let args = self.build_args(request, &output);
        debug!("running {:?} {:?}", self.config.binary, args);

        let child = Command::new(&self.config.binary)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let result = tokio::time::timeout(self.config.timeout, child)
            .await
            .map_err(|_| VgrabError::Timeout(format!("yt-dlp exceeded {:?}", self.config.timeout)))?
            .map_err(|e| VgrabError::ExtractionFailed(format!("could not spawn yt-dlp: {}", e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            warn!("yt-dlp failed: {}", stderr.trim());
            let _ = tokio::fs::remove_file(&output).await;
            return Err(classify_stderr(&stderr));
        }

        let size_bytes = tokio::fs::metadata(&output)
            .await
            .map_err(|_| {
                VgrabError::InvalidArtifact("yt-dlp reported success but wrote no file".to_string())
            })?
            .len();

        info!("yt-dlp produced {} ({} bytes)", output.display(), size_bytes);
        Ok(ExtractedMedia {
            path: output,
            media_type,
            size_bytes,
            title: None,
        })
    }
}

fn wants_audio(request: &MediaRequest) -> bool {
    request.format.as_deref() == Some("mp3")
}

/// Map a quality label to a yt-dlp format selector
fn format_selector(quality: Option<&str>) -> &'static str {
    match quality {
        Some("144p") => "bestvideo[height<=144]+bestaudio/worst",
        Some("240p") => "bestvideo[height<=240]+bestaudio/worst[height>144]",
        Some("360p") => "bestvideo[height<=360]+bestaudio/worst[height>240]",
        Some("480p") => "bestvideo[height<=480]+bestaudio/worst[height>360]",
        Some("720p") => "bestvideo[height<=720]+bestaudio/best[height>480]",
        Some("1080p") => "bestvideo[height<=1080]+bestaudio/best[height>720]",
        Some("1440p") => "bestvideo[height<=1440]+bestaudio/best[height>1080]",
        Some("2160p") => "bestvideo[height<=2160]+bestaudio/best[height>1440]",
        _ => "bestvideo+bestaudio/best",
    }
}

/// Classify a yt-dlp stderr dump into a typed error
fn classify_stderr(stderr: &str) -> VgrabError {
    let lower = stderr.to_lowercase();

    if lower.contains("private video") || lower.contains("sign in to confirm") {
        VgrabError::PrivateContent
    } else if lower.contains("video unavailable")
        || lower.contains("has been removed")
        || lower.contains("404")
    {
        VgrabError::MediaNotFound("video unavailable or removed".to_string())
    } else if lower.contains("429") || lower.contains("too many requests") {
        VgrabError::RateLimited
    } else if lower.contains("timed out") || lower.contains("timeout") {
        VgrabError::Timeout("yt-dlp network timeout".to_string())
    } else if lower.contains("connection reset")
        || lower.contains("unable to download")
        || lower.contains("503")
        || lower.contains("502")
    {
        VgrabError::ServiceUnavailable("transient yt-dlp network failure".to_string())
    } else {
        VgrabError::ExtractionFailed(stderr.trim().to_string())
    }
}
