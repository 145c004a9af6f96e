//! # vgrab - social media download orchestration service
//!
//! Downloads media from supported platforms on demand and streams it
//! straight back to the caller, keeping nothing permanent on disk.
//!
//! ## Architecture
//!
//! - Per-URL locks de-duplicate concurrent requests for the same media
//! - A bounded pool reuses expensive scraping sessions
//! - Transient extraction failures retry with exponential backoff
//! - Progress is published per download and polled over HTTP
//! - A background scheduler reclaims aged artifacts from the temp area
//!
//! ## Example
//!
//! ```rust,no_run
//! use vgrab::core::{
//!     DownloadLockRegistry, DownloadRequest, Orchestrator, ProgressTracker,
//!     ResourcePool, RetryPolicy,
//! };
//! use vgrab::extractor::{SessionFactory, YtDlpExtractor};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut orchestrator = Orchestrator::new(
//!         DownloadLockRegistry::new(),
//!         ResourcePool::new(SessionFactory::default()),
//!         ProgressTracker::new(),
//!         RetryPolicy::new(),
//!         std::env::temp_dir().join("vgrab/downloads"),
//!     );
//!     orchestrator.register_extractor(Arc::new(YtDlpExtractor::new()));
//!
//!     let done = orchestrator
//!         .handle(DownloadRequest {
//!             url: "https://www.youtube.com/watch?v=VIDEO_ID".to_string(),
//!             platform: None,
//!             format: None,
//!             quality: Some("720p".to_string()),
//!             id: None,
//!         })
//!         .await?;
//!     println!("Downloaded: {}", done.file_name);
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod core;
pub mod error;
pub mod extractor;
pub mod server;
pub mod utils;

// Re-export main types
pub use crate::core::{
    CompletedDownload, DownloadLockRegistry, DownloadRequest, Orchestrator, ProgressTracker,
    ReclamationScheduler, ResourcePool, RetryPolicy,
};
pub use crate::error::VgrabError;

/// Result type alias for vgrab operations
pub type Result<T> = std::result::Result<T, VgrabError>;
