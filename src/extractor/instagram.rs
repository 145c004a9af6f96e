//! Instagram extraction from public post pages
//!
//! Public posts expose their media in the page HTML; no browser automation
//! is needed. The media URL is resolved through a chain of fallbacks
//! (og:video, og:image, JSON-LD, script-embedded fields) and the resolved
//! URL is cached so repeated requests for a hot post skip the page fetch.

use crate::error::VgrabError;
use crate::extractor::{ExtractedMedia, Extractor, MediaRequest, MediaType, Platform, Session};
use async_trait::async_trait;
use futures_util::StreamExt;
use moka::future::Cache;
use regex::Regex;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

/// Smallest plausible media payload; anything below this is an error page
const MIN_MEDIA_BYTES: u64 = 1000;

/// TTL for resolved media URLs (Instagram CDN URLs expire quickly)
const RESOLVED_URL_TTL: Duration = Duration::from_secs(600);

/// A media URL resolved from a post page
#[derive(Debug, Clone)]
pub struct ResolvedMedia {
    pub url: String,
    pub media_type: MediaType,
}

/// Instagram extractor working off public page data
pub struct InstagramExtractor {
    resolved_cache: Cache<String, ResolvedMedia>,
}

impl InstagramExtractor {
    pub fn new() -> Self {
        Self {
            resolved_cache: Cache::builder()
                .time_to_live(RESOLVED_URL_TTL)
                .max_capacity(1024)
                .build(),
        }
    }

    async fn resolve(
        &self,
        session: &Session,
        post_url: &str,
    ) -> Result<ResolvedMedia, VgrabError> {
        if let Some(cached) = self.resolved_cache.get(post_url).await {
            debug!("resolved media URL from cache for {}", post_url);
            return Ok(cached);
        }

        let response = session
            .client
            .get(post_url)
            .header("Accept", "text/html,application/xhtml+xml,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Referer", "https://www.instagram.com/")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_page_status(status.as_u16()));
        }

        let html = response.text().await?;
        let resolved = resolve_from_html(&html).ok_or_else(|| {
            VgrabError::MediaNotFound(
                "could not find media in the post page; the post may be private or deleted"
                    .to_string(),
            )
        })?;

        self.resolved_cache
            .insert(post_url.to_string(), resolved.clone())
            .await;
        Ok(resolved)
    }
}

impl Default for InstagramExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for InstagramExtractor {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    async fn extract(
        &self,
        session: &Session,
        request: &MediaRequest,
        dest_dir: &Path,
    ) -> Result<ExtractedMedia, VgrabError> {
        let resolved = self.resolve(session, &request.url).await?;
        info!(
            "resolved {} media for {}",
            resolved.media_type.default_extension(),
            request.url
        );

        let output = dest_dir.join(format!(
            "{}.{}",
            Uuid::new_v4(),
            resolved.media_type.default_extension()
        ));

        let response = session
            .client
            .get(&resolved.url)
            .header("Referer", "https://www.instagram.com/")
            .header("Accept", "*/*")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            // A dead CDN URL often means the cached resolution went stale
            self.resolved_cache.invalidate(&request.url).await;
            return Err(classify_page_status(status.as_u16()));
        }

        let mut file = File::create(&output).await?;
        let mut stream = response.bytes_stream();
        let mut size_bytes = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            size_bytes += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        if size_bytes < MIN_MEDIA_BYTES {
            let _ = tokio::fs::remove_file(&output).await;
            return Err(VgrabError::InvalidArtifact(format!(
                "downloaded media is only {} bytes, likely an error page",
                size_bytes
            )));
        }

        Ok(ExtractedMedia {
            path: output,
            media_type: resolved.media_type,
            size_bytes,
            title: None,
        })
    }
}

fn classify_page_status(status: u16) -> VgrabError {
    match status {
        404 | 410 => VgrabError::MediaNotFound("post not found".to_string()),
        401 | 403 => VgrabError::PrivateContent,
        429 => VgrabError::RateLimited,
        500..=599 => VgrabError::ServiceUnavailable(format!("instagram returned {}", status)),
        other => VgrabError::ExtractionFailed(format!("unexpected status {}", other)),
    }
}

/// Resolve the media URL from a post page, trying each known location in
/// order of reliability.
pub fn resolve_from_html(html: &str) -> Option<ResolvedMedia> {
    // og:video meta tag (videos and reels)
    let og_video =
        Regex::new(r#"<meta\s+property=["']og:video(?::url)?["']\s+content=["']([^"']+)["']"#)
            .unwrap();
    if let Some(caps) = og_video.captures(html) {
        return Some(ResolvedMedia {
            url: unescape(&caps[1]),
            media_type: MediaType::Video,
        });
    }

    // JSON-LD structured data
    let json_ld =
        Regex::new(r#"<script[^>]+type=["']application/ld\+json["'][^>]*>([^<]+)</script>"#)
            .unwrap();
    if let Some(caps) = json_ld.captures(html) {
        if let Ok(data) = serde_json::from_str::<serde_json::Value>(&caps[1]) {
            if let Some(url) = data
                .pointer("/videoObject/contentUrl")
                .and_then(|v| v.as_str())
            {
                return Some(ResolvedMedia {
                    url: unescape(url),
                    media_type: MediaType::Video,
                });
            }
            if let Some(url) = data.pointer("/image/url").and_then(|v| v.as_str()) {
                return Some(ResolvedMedia {
                    url: unescape(url),
                    media_type: MediaType::Image,
                });
            }
        }
    }

    // Script-embedded video URL
    let video_url = Regex::new(r#""video_url":"([^"]+)""#).unwrap();
    if let Some(caps) = video_url.captures(html) {
        return Some(ResolvedMedia {
            url: unescape(&caps[1]),
            media_type: MediaType::Video,
        });
    }

    // og:image meta tag (photo posts)
    let og_image = Regex::new(r#"<meta\s+property=["']og:image["']\s+content=["']([^"']+)["']"#)
        .unwrap();
    if let Some(caps) = og_image.captures(html) {
        return Some(ResolvedMedia {
            url: unescape(&caps[1]),
            media_type: MediaType::Image,
        });
    }

    // Script-embedded display URL, the last resort for photos
    let display_url = Regex::new(r#""display_url":"([^"]+)""#).unwrap();
    if let Some(caps) = display_url.captures(html) {
        return Some(ResolvedMedia {
            url: unescape(&caps[1]),
            media_type: MediaType::Image,
        });
    }

    None
}

/// Undo the JSON string escaping Instagram applies to embedded URLs
fn unescape(url: &str) -> String {
    url.replace("\\u0026", "&").replace("\\/", "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::SessionFactory;
    use crate::core::pool::ResourceFactory;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_og_video() {
        let html = r#"<html><head>
            <meta property="og:video" content="https://cdn.example/v.mp4" />
            <meta property="og:image" content="https://cdn.example/i.jpg" />
        </head></html>"#;
        let resolved = resolve_from_html(html).unwrap();
        assert_eq!(resolved.url, "https://cdn.example/v.mp4");
        assert_eq!(resolved.media_type, MediaType::Video);
    }

    #[test]
    fn test_resolve_og_image_when_no_video() {
        let html = r#"<meta property="og:image" content="https://cdn.example/i.jpg" />"#;
        let resolved = resolve_from_html(html).unwrap();
        assert_eq!(resolved.media_type, MediaType::Image);
    }

    #[test]
    fn test_resolve_json_ld_video() {
        let html = r#"<script type="application/ld+json">
            {"videoObject":{"contentUrl":"https://cdn.example/ld.mp4"}}
        </script>"#;
        let resolved = resolve_from_html(html).unwrap();
        assert_eq!(resolved.url, "https://cdn.example/ld.mp4");
        assert_eq!(resolved.media_type, MediaType::Video);
    }

    #[test]
    fn test_resolve_script_video_url_unescapes() {
        let html = r#"{"video_url":"https:\/\/cdn.example\/v.mp4?a=1&b=2"}"#;
        let resolved = resolve_from_html(html).unwrap();
        assert_eq!(resolved.url, "https://cdn.example/v.mp4?a=1&b=2");
    }

    #[test]
    fn test_resolve_display_url_fallback() {
        let html = r#"{"display_url":"https:\/\/cdn.example\/photo.jpg"}"#;
        let resolved = resolve_from_html(html).unwrap();
        assert_eq!(resolved.media_type, MediaType::Image);
    }

    #[test]
    fn test_resolve_nothing_found() {
        assert!(resolve_from_html("<html><body>login required</body></html>").is_none());
    }

    #[test]
    fn test_classify_page_status() {
        assert!(matches!(
            classify_page_status(404),
            VgrabError::MediaNotFound(_)
        ));
        assert!(matches!(classify_page_status(403), VgrabError::PrivateContent));
        assert!(matches!(classify_page_status(429), VgrabError::RateLimited));
        assert!(matches!(
            classify_page_status(503),
            VgrabError::ServiceUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_extract_end_to_end_with_mock_server() {
        let mut server = mockito::Server::new_async().await;
        let media_body = vec![0xFFu8; 2048];

        let media_mock = server
            .mock("GET", "/media/v.jpg")
            .with_status(200)
            .with_body(media_body.clone())
            .create_async()
            .await;
        let page_html = format!(
            r#"<meta property="og:image" content="{}/media/v.jpg" />"#,
            server.url()
        );
        let page_mock = server
            .mock("GET", "/p/abc/")
            .with_status(200)
            .with_body(page_html)
            .create_async()
            .await;

        let extractor = InstagramExtractor::new();
        let session = SessionFactory::default().create().await.unwrap();
        let dest = TempDir::new().unwrap();
        let request = MediaRequest {
            url: format!("{}/p/abc/", server.url()),
            format: None,
            quality: None,
        };

        let media = extractor
            .extract(&session, &request, dest.path())
            .await
            .unwrap();
        assert_eq!(media.media_type, MediaType::Image);
        assert_eq!(media.size_bytes, 2048);
        assert!(media.path.exists());

        page_mock.assert_async().await;
        media_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_extract_rejects_tiny_media() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/media/v.jpg")
            .with_status(200)
            .with_body("too small")
            .create_async()
            .await;
        let page_html = format!(
            r#"<meta property="og:image" content="{}/media/v.jpg" />"#,
            server.url()
        );
        server
            .mock("GET", "/p/tiny/")
            .with_status(200)
            .with_body(page_html)
            .create_async()
            .await;

        let extractor = InstagramExtractor::new();
        let session = SessionFactory::default().create().await.unwrap();
        let dest = TempDir::new().unwrap();
        let request = MediaRequest {
            url: format!("{}/p/tiny/", server.url()),
            format: None,
            quality: None,
        };

        let err = extractor
            .extract(&session, &request, dest.path())
            .await
            .unwrap_err();
        assert!(matches!(err, VgrabError::InvalidArtifact(_)));
        // Invalid output must not linger on disk
        assert_eq!(std::fs::read_dir(dest.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_extract_private_post() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/p/priv/")
            .with_status(403)
            .create_async()
            .await;

        let extractor = InstagramExtractor::new();
        let session = SessionFactory::default().create().await.unwrap();
        let dest = TempDir::new().unwrap();
        let request = MediaRequest {
            url: format!("{}/p/priv/", server.url()),
            format: None,
            quality: None,
        };

        let err = extractor
            .extract(&session, &request, dest.path())
            .await
            .unwrap_err();
        assert!(matches!(err, VgrabError::PrivateContent));
    }
}
