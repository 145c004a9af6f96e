//! Progress tracking for in-flight and recently finished downloads
//!
//! Records are merged on every update and expire on a sliding window: each
//! update pushes the expiry 30 minutes out, so a download polled by a client
//! stays visible while abandoned entries fall away on their own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Retention window after the last update
pub const DEFAULT_PROGRESS_RETENTION: Duration = Duration::from_secs(30 * 60);

/// Lifecycle phase of a download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Queued,
    Started,
    Initializing,
    Downloading,
    Processing,
    Finalizing,
    Completed,
    Error,
}

/// Caller-visible progress record
#[derive(Debug, Clone, Serialize)]
pub struct ProgressRecord {
    pub id: String,
    pub percent: u8,
    pub status: ProgressStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Partial fields merged into a record by `ProgressTracker::update`
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub percent: Option<u8>,
    pub status: Option<ProgressStatus>,
    pub error: Option<String>,
    pub speed: Option<String>,
    pub eta: Option<String>,
}

impl ProgressUpdate {
    /// Update carrying a phase and its percent milestone
    pub fn phase(status: ProgressStatus, percent: u8) -> Self {
        Self {
            percent: Some(percent),
            status: Some(status),
            ..Self::default()
        }
    }
}

struct Entry {
    record: ProgressRecord,
    expires_at: Instant,
}

/// Keyed progress store with sliding expiry
#[derive(Clone)]
pub struct ProgressTracker {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    retention: Duration,
}

impl ProgressTracker {
    /// Create a tracker with the default 30 minute retention
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_PROGRESS_RETENTION)
    }

    /// Create a tracker with a custom retention window
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            retention,
        }
    }

    /// Merge partial fields into the record for `id`, creating it if absent.
    ///
    /// Percent is monotonically non-decreasing: a lower value than the
    /// current one is clamped, never applied. Once a record reaches the
    /// `Error` status it is terminal and further updates are ignored.
    /// Reaching `Completed` forces percent to 100.
    pub fn update(&self, id: &str, update: ProgressUpdate) -> ProgressRecord {
        let mut entries = self.entries.lock().unwrap();

        // An expired record is dead even before lazy eviction removes it;
        // merging into it would revive stale state under a reused id
        if entries
            .get(id)
            .map_or(false, |entry| entry.expires_at <= Instant::now())
        {
            entries.remove(id);
        }

        let entry = entries.entry(id.to_string()).or_insert_with(|| Entry {
            record: ProgressRecord {
                id: id.to_string(),
                percent: 0,
                status: ProgressStatus::Queued,
                error: None,
                speed: None,
                eta: None,
                updated_at: Utc::now(),
            },
            expires_at: Instant::now() + self.retention,
        });

        if entry.record.status == ProgressStatus::Error {
            debug!("ignoring progress update for errored download {}", id);
            return entry.record.clone();
        }

        if let Some(percent) = update.percent {
            entry.record.percent = entry.record.percent.max(percent.min(100));
        }
        if let Some(status) = update.status {
            entry.record.status = status;
            if status == ProgressStatus::Completed {
                entry.record.percent = 100;
            }
        }
        if let Some(error) = update.error {
            entry.record.error = Some(error);
        }
        if let Some(speed) = update.speed {
            entry.record.speed = Some(speed);
        }
        if let Some(eta) = update.eta {
            entry.record.eta = Some(eta);
        }

        entry.record.updated_at = Utc::now();
        entry.expires_at = Instant::now() + self.retention;
        entry.record.clone()
    }

    /// Look up the record for `id`, evicting it lazily if expired
    pub fn get(&self, id: &str) -> Option<ProgressRecord> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(id) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.record.clone()),
            Some(_) => {
                entries.remove(id);
                None
            }
            None => None,
        }
    }

    /// Mark a download as finished successfully
    pub fn mark_complete(&self, id: &str) -> ProgressRecord {
        self.update(
            id,
            ProgressUpdate::phase(ProgressStatus::Completed, 100),
        )
    }

    /// Mark a download as failed. This is terminal for the record.
    pub fn mark_error(&self, id: &str, message: impl Into<String>) -> ProgressRecord {
        self.update(
            id,
            ProgressUpdate {
                status: Some(ProgressStatus::Error),
                error: Some(message.into()),
                ..ProgressUpdate::default()
            },
        )
    }

    /// Drop every expired record. Called from the reclamation scheduler's
    /// sweep so the map cannot grow without bound under churn.
    pub fn cleanup_expired(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of tracked records, including not-yet-evicted expired ones
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the tracker holds no records
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    const THRESHOLD: f64 = 1024.0;

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f64 = bytes as f64;
    let exp = (bytes_f64.ln() / THRESHOLD.ln()).floor() as usize;
    let exp = exp.min(UNITS.len() - 1);
    let value = bytes_f64 / THRESHOLD.powi(exp as i32);

    if exp == 0 {
        format!("{} {}", bytes, UNITS[exp])
    } else {
        format!("{:.1} {}", value, UNITS[exp])
    }
}
