//! HTTP surface
//!
//! Three endpoints over the orchestration core: start a download and stream
//! the artifact back, poll progress, and trigger a manual cleanup. The
//! artifact and its URL lock are tied to the response body via a drop guard,
//! so disk space and the lock are reclaimed even when the client disconnects
//! mid-stream.

use crate::core::orchestrator::{DownloadRequest, Orchestrator};
use crate::core::progress::ProgressRecord;
use crate::core::reclaim::ReclamationScheduler;
use crate::core::lock::LockGuard;
use crate::error::VgrabError;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// Header carrying the operator secret for the cleanup endpoint
pub const CLEANUP_SECRET_HEADER: &str = "x-cleanup-secret";
/// Header exposing the progress id of a streamed download
pub const DOWNLOAD_ID_HEADER: &str = "x-download-id";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub scheduler: Arc<ReclamationScheduler>,
    /// When set, the cleanup endpoint requires this secret
    pub cleanup_secret: Option<String>,
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/download", post(download))
        .route("/api/progress", get(progress))
        .route("/api/cleanup", post(cleanup))
        .with_state(state)
}

/// Caller-facing error response
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    retry_after: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after: None,
        }
    }
}

impl From<VgrabError> for ApiError {
    fn from(error: VgrabError) -> Self {
        let status =
            StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self {
            status,
            message: error.to_string(),
            retry_after: error.retry_after(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({ "error": self.message });
        if let Some(secs) = self.retry_after {
            body["retryAfter"] = secs.into();
        }
        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = self.retry_after {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// POST /api/download: run a download and stream the artifact back.
///
/// Honors a single `Range: bytes=` request so interrupted clients can
/// resume while the artifact still exists.
async fn download(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<DownloadRequest>,
) -> Result<Response, ApiError> {
    let mut done = state.orchestrator.handle(request).await?;
    let lock_guard = done.take_lock_guard();
    let file_size = done.artifact.size_bytes;

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_range_header(v, file_size));

    let mut file = tokio::fs::File::open(&done.artifact.path)
        .await
        .map_err(VgrabError::from)?;

    let (status, start, end) = match range {
        Some((start, end)) => {
            file.seek(SeekFrom::Start(start))
                .await
                .map_err(VgrabError::from)?;
            (StatusCode::PARTIAL_CONTENT, start, end)
        }
        None => (StatusCode::OK, 0, file_size.saturating_sub(1)),
    };
    let content_length = end - start + 1;

    let stream = ArtifactStream {
        inner: ReaderStream::new(file.take(content_length)),
        _cleanup: ArtifactCleanup {
            path: done.artifact.path.clone(),
            lock_guard,
        },
    };

    debug!(
        "streaming {} ({} bytes, status {})",
        done.artifact.path.display(),
        content_length,
        status
    );

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, done.content_type)
        .header(header::CONTENT_LENGTH, content_length)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", done.file_name),
        )
        .header(DOWNLOAD_ID_HEADER, done.download_id.as_str());

    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", start, end, file_size),
        );
    }

    builder
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::from(VgrabError::Internal(e.to_string())))
}

#[derive(Debug, Deserialize)]
struct ProgressQuery {
    id: String,
}

/// GET /api/progress?id=: current progress record for a download
async fn progress(
    State(state): State<AppState>,
    Query(query): Query<ProgressQuery>,
) -> Result<Json<ProgressRecord>, ApiError> {
    state
        .orchestrator
        .progress()
        .get(&query.id)
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "no progress for this id"))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CleanupResponse {
    files_deleted: usize,
    bytes_freed: u64,
    aggressive: bool,
}

/// POST /api/cleanup: operator-triggered sweep. Idempotent.
async fn cleanup(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CleanupResponse>, ApiError> {
    if let Some(expected) = &state.cleanup_secret {
        let presented = headers
            .get(CLEANUP_SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        if presented != Some(expected.as_str()) {
            warn!("cleanup request rejected: bad or missing secret");
            return Err(ApiError::new(StatusCode::UNAUTHORIZED, "invalid secret"));
        }
    }

    let scheduler = state.scheduler.clone();
    let report = tokio::task::spawn_blocking(move || scheduler.force_cleanup())
        .await
        .map_err(|e| ApiError::from(VgrabError::Internal(e.to_string())))?;

    info!(
        "manual cleanup removed {} files ({} bytes)",
        report.files_deleted, report.bytes_freed
    );
    Ok(Json(CleanupResponse {
        files_deleted: report.files_deleted,
        bytes_freed: report.bytes_freed,
        aggressive: report.aggressive,
    }))
}

/// Parse a single-range `Range: bytes=` header against a known file size
fn parse_range_header(header: &str, file_size: u64) -> Option<(u64, u64)> {
    let spec = header.strip_prefix("bytes=")?;
    // Multi-range requests are not supported
    if spec.contains(',') {
        return None;
    }

    let (start_str, end_str) = spec.split_once('-')?;
    if start_str.is_empty() {
        // Suffix range: last N bytes
        let suffix: u64 = end_str.parse().ok()?;
        if suffix == 0 || file_size == 0 {
            return None;
        }
        let start = file_size.saturating_sub(suffix);
        return Some((start, file_size - 1));
    }

    let start: u64 = start_str.parse().ok()?;
    let end: u64 = if end_str.is_empty() {
        file_size.checked_sub(1)?
    } else {
        end_str.parse().ok()?
    };

    if start > end || end >= file_size {
        return None;
    }
    Some((start, end))
}

/// Deletes the artifact and releases the URL lock when the response body is
/// dropped, whether the stream completed or the client went away
struct ArtifactCleanup {
    path: PathBuf,
    lock_guard: Option<LockGuard>,
}

impl Drop for ArtifactCleanup {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("removed streamed artifact {}", self.path.display()),
            Err(e) => debug!("artifact {} already gone: {}", self.path.display(), e),
        }
        // lock_guard drops here, releasing the key
        self.lock_guard.take();
    }
}

/// Response body stream that owns the artifact cleanup guard
struct ArtifactStream {
    inner: ReaderStream<tokio::io::Take<tokio::fs::File>>,
    _cleanup: ArtifactCleanup,
}

impl Stream for ArtifactStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
