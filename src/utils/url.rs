//! URL utilities: platform detection, normalization and lock keys

use crate::error::VgrabError;
use crate::extractor::Platform;
use sha2::{Digest, Sha256};
use url::Url;

/// Query parameters that never change which media a URL points to
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "igsh",
    "igshid",
    "feature",
    "si",
];

/// Detect the platform a source URL belongs to
pub fn detect_platform(url: &str) -> Result<Platform, VgrabError> {
    let parsed = Url::parse(url)?;

    match parsed.host_str() {
        Some("youtube.com") | Some("www.youtube.com") | Some("m.youtube.com")
        | Some("youtu.be") => Ok(Platform::Youtube),
        Some("instagram.com") | Some("www.instagram.com") => Ok(Platform::Instagram),
        Some(host) => Err(VgrabError::UnsupportedPlatform(host.to_string())),
        None => Err(VgrabError::InvalidUrl("missing host".to_string())),
    }
}

/// Normalize a source URL so that cosmetic variations map to the same
/// logical request: lowercased host, no fragment, no tracking parameters,
/// no trailing slash.
pub fn normalize_url(url: &str) -> Result<String, VgrabError> {
    let mut parsed = Url::parse(url)?;

    if parsed.host_str().is_none() {
        return Err(VgrabError::InvalidUrl("missing host".to_string()));
    }

    parsed.set_fragment(None);

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !TRACKING_PARAMS.contains(&key.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        let mut qp = parsed.query_pairs_mut();
        qp.clear()
            .extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }

    let mut normalized: String = parsed.into();
    while normalized.ends_with('/') {
        normalized.pop();
    }

    Ok(normalized)
}

/// Derive the de-duplication lock key for a source URL.
///
/// Two requests for the same logical media must map to the same key.
pub fn lock_key(url: &str) -> Result<String, VgrabError> {
    let normalized = normalize_url(url)?;
    let digest = Sha256::digest(normalized.as_bytes());
    Ok(hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_platform() {
        assert_eq!(
            detect_platform("https://www.youtube.com/watch?v=abc123").unwrap(),
            Platform::Youtube
        );
        assert_eq!(
            detect_platform("https://youtu.be/abc123").unwrap(),
            Platform::Youtube
        );
        assert_eq!(
            detect_platform("https://www.instagram.com/reel/XYZ/").unwrap(),
            Platform::Instagram
        );
    }

    #[test]
    fn test_detect_platform_rejects_unknown_host() {
        let err = detect_platform("https://example.com/video").unwrap_err();
        assert!(matches!(err, VgrabError::UnsupportedPlatform(_)));
    }

    #[test]
    fn test_detect_platform_rejects_garbage() {
        assert!(detect_platform("not a url at all").is_err());
    }

    #[test]
    fn test_normalize_strips_tracking_params() {
        let normalized =
            normalize_url("https://www.instagram.com/reel/XYZ/?igsh=token&utm_source=share")
                .unwrap();
        assert_eq!(normalized, "https://www.instagram.com/reel/XYZ");
    }

    #[test]
    fn test_normalize_keeps_meaningful_params() {
        let normalized =
            normalize_url("https://www.youtube.com/watch?v=abc123&utm_source=share").unwrap();
        assert_eq!(normalized, "https://www.youtube.com/watch?v=abc123");
    }

    #[test]
    fn test_lock_key_is_stable_across_variations() {
        let a = lock_key("https://www.instagram.com/reel/XYZ/").unwrap();
        let b = lock_key("https://www.instagram.com/reel/XYZ/?igsh=t#frag").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_lock_key_differs_for_different_media() {
        let a = lock_key("https://www.youtube.com/watch?v=one").unwrap();
        let b = lock_key("https://www.youtube.com/watch?v=two").unwrap();
        assert_ne!(a, b);
    }
}
