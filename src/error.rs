//! Error types for vgrab

use thiserror::Error;

/// Main error type for vgrab operations
#[derive(Debug, Error)]
pub enum VgrabError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Download already in progress for this URL")]
    AlreadyInProgress {
        /// Seconds until the current lock is guaranteed to be stale
        retry_after_secs: u64,
    },

    #[error("Media not found: {0}")]
    MediaNotFound(String),

    #[error("Content is private or restricted")]
    PrivateContent,

    #[error("Rate limited by target platform")]
    RateLimited,

    #[error("Upstream service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    #[error("Resource pool is shut down")]
    PoolShutdown,

    #[error("Resource creation failed: {0}")]
    ResourceCreation(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VgrabError {
    /// Check if the error is transient and worth retrying.
    ///
    /// Invalid artifacts count as transient: an empty or truncated file is
    /// usually a flaky upstream response, not a permanent condition.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VgrabError::Network(_)
                | VgrabError::Timeout(_)
                | VgrabError::RateLimited
                | VgrabError::ServiceUnavailable(_)
                | VgrabError::InvalidArtifact(_)
        )
    }

    /// Check if the error came from the target platform rejecting the content
    pub fn is_content_error(&self) -> bool {
        matches!(
            self,
            VgrabError::MediaNotFound(_) | VgrabError::PrivateContent
        )
    }

    /// HTTP status code for the caller-facing response.
    ///
    /// Only the server boundary consumes this; inner components never look
    /// at status codes.
    pub fn status_code(&self) -> u16 {
        match self {
            VgrabError::InvalidUrl(_) | VgrabError::UnsupportedPlatform(_) => 400,
            VgrabError::AlreadyInProgress { .. } => 429,
            VgrabError::MediaNotFound(_) => 404,
            VgrabError::PrivateContent => 403,
            VgrabError::RateLimited | VgrabError::ServiceUnavailable(_) => 503,
            VgrabError::Timeout(_) => 504,
            _ => 500,
        }
    }

    /// Retry-after hint in seconds, when one applies
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            VgrabError::AlreadyInProgress { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(VgrabError::Timeout("connect".to_string()).is_transient());
        assert!(VgrabError::RateLimited.is_transient());
        assert!(VgrabError::InvalidArtifact("empty file".to_string()).is_transient());

        assert!(!VgrabError::PrivateContent.is_transient());
        assert!(!VgrabError::InvalidUrl("nope".to_string()).is_transient());
        assert!(!VgrabError::MediaNotFound("gone".to_string()).is_transient());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(VgrabError::InvalidUrl("x".to_string()).status_code(), 400);
        assert_eq!(
            VgrabError::AlreadyInProgress {
                retry_after_secs: 12
            }
            .status_code(),
            429
        );
        assert_eq!(
            VgrabError::MediaNotFound("x".to_string()).status_code(),
            404
        );
        assert_eq!(VgrabError::PrivateContent.status_code(), 403);
        assert_eq!(VgrabError::RateLimited.status_code(), 503);
        assert_eq!(VgrabError::Internal("x".to_string()).status_code(), 500);
    }

    #[test]
    fn test_retry_after_hint() {
        let err = VgrabError::AlreadyInProgress {
            retry_after_secs: 17,
        };
        assert_eq!(err.retry_after(), Some(17));
        assert_eq!(VgrabError::RateLimited.retry_after(), None);
    }
}
