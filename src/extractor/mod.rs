//! Platform extractors
//!
//! An extractor turns a source URL into a local media file. The orchestrator
//! treats extractors as opaque collaborators: they either produce an
//! `ExtractedMedia` under the destination directory or raise a classified
//! `VgrabError` the retry policy can branch on. New platforms plug in by
//! implementing `Extractor`; the orchestrator never changes.

pub mod instagram;
pub mod youtube;

pub use instagram::InstagramExtractor;
pub use youtube::YtDlpExtractor;

use crate::core::pool::ResourceFactory;
use crate::error::VgrabError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Browser user agent sent with every scraping request
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Supported source platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Youtube,
    Instagram,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Youtube => write!(f, "youtube"),
            Platform::Instagram => write!(f, "instagram"),
        }
    }
}

/// Kind of media an extraction produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Image,
    Audio,
}

impl MediaType {
    /// Default file extension for this kind of media
    pub fn default_extension(&self) -> &'static str {
        match self {
            MediaType::Video => "mp4",
            MediaType::Image => "jpg",
            MediaType::Audio => "mp3",
        }
    }
}

/// What the caller asked an extractor to fetch
#[derive(Debug, Clone)]
pub struct MediaRequest {
    pub url: String,
    /// Desired container/format, e.g. "mp4" or "mp3"
    pub format: Option<String>,
    /// Desired quality, e.g. "720p"
    pub quality: Option<String>,
}

/// A media file produced by an extractor run
#[derive(Debug, Clone)]
pub struct ExtractedMedia {
    pub path: PathBuf,
    pub media_type: MediaType,
    pub size_bytes: u64,
    /// Media title when the platform exposes one
    pub title: Option<String>,
}

/// A reusable scraping session: an HTTP client with a cookie store and
/// browser-like identity. Creation is the expensive part, so sessions live
/// in the resource pool and are reused across requests.
pub struct Session {
    pub client: reqwest::Client,
}

/// Builds pooled scraping sessions
pub struct SessionFactory {
    timeout: Duration,
}

impl SessionFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SessionFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl ResourceFactory for SessionFactory {
    type Resource = Session;

    async fn create(&self) -> Result<Session, VgrabError> {
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .cookie_store(true)
            .timeout(self.timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| VgrabError::ResourceCreation(e.to_string()))?;
        Ok(Session { client })
    }

    async fn destroy(&self, _session: Session) {
        // Dropping the client closes its connection pool
    }
}

/// Platform-specific media extraction
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Platform this extractor serves
    fn platform(&self) -> Platform;

    /// Fetch the media behind `request.url` into a file under `dest_dir`.
    ///
    /// Errors must be classified (network / timeout / not-found / forbidden /
    /// invalid structure) so the retry policy and the orchestrator can
    /// branch correctly.
    async fn extract(
        &self,
        session: &Session,
        request: &MediaRequest,
        dest_dir: &Path,
    ) -> Result<ExtractedMedia, VgrabError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_display() {
        assert_eq!(Platform::Youtube.to_string(), "youtube");
        assert_eq!(Platform::Instagram.to_string(), "instagram");
    }

    #[test]
    fn test_platform_deserializes_lowercase() {
        let platform: Platform = serde_json::from_str("\"instagram\"").unwrap();
        assert_eq!(platform, Platform::Instagram);
    }

    #[test]
    fn test_media_type_extensions() {
        assert_eq!(MediaType::Video.default_extension(), "mp4");
        assert_eq!(MediaType::Image.default_extension(), "jpg");
        assert_eq!(MediaType::Audio.default_extension(), "mp3");
    }

    #[tokio::test]
    async fn test_session_factory_builds_client() {
        let factory = SessionFactory::default();
        let session = factory.create().await.unwrap();
        factory.destroy(session).await;
    }
}
