//! Disk reclamation scheduler for the managed temp area
//!
//! Artifacts are normally deleted right after streaming, so the sweeps here
//! are the backstop for crashed requests and abandoned cache entries. Each
//! sweep deletes aged files per area; when the whole temp root outgrows its
//! size cap, a second pass runs with a much shorter age threshold. There is
//! no explicit coordination with in-flight downloads: the age thresholds are
//! chosen to exceed any realistic single-request duration.

use crate::core::progress::{format_bytes, ProgressTracker};
use crate::error::VgrabError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Name of the per-request artifact area under the temp root
pub const DOWNLOADS_SUBDIR: &str = "downloads";
/// Name of the reusable extraction-result area under the temp root
pub const CACHE_SUBDIR: &str = "cache";

/// Reclamation configuration
#[derive(Debug, Clone)]
pub struct ReclaimConfig {
    /// Max age for files in the downloads area
    pub max_file_age: Duration,
    /// Max age for files in the cache area
    pub max_cache_age: Duration,
    /// Age threshold for the aggressive pass
    pub aggressive_age: Duration,
    /// Total temp usage that triggers the aggressive pass
    pub max_temp_size: u64,
    /// Interval between sweeps
    pub sweep_interval: Duration,
    /// Interval between housekeeping reports
    pub report_interval: Duration,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            max_file_age: Duration::from_secs(5 * 60),
            max_cache_age: Duration::from_secs(30 * 60),
            aggressive_age: Duration::from_secs(2 * 60),
            max_temp_size: 500 * 1024 * 1024,
            sweep_interval: Duration::from_secs(60),
            report_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub files_deleted: usize,
    pub bytes_freed: u64,
    pub aggressive: bool,
}

/// Periodic temp-area sweeper with escalating aggressiveness
pub struct ReclamationScheduler {
    temp_root: PathBuf,
    downloads_dir: PathBuf,
    cache_dir: PathBuf,
    config: ReclaimConfig,
    progress: ProgressTracker,
    total_bytes_freed: AtomicU64,
}

impl ReclamationScheduler {
    /// Create a scheduler over `temp_root`, creating the managed
    /// subdirectories if needed
    pub fn new(
        temp_root: impl Into<PathBuf>,
        config: ReclaimConfig,
        progress: ProgressTracker,
    ) -> Result<Self, VgrabError> {
        let temp_root = temp_root.into();
        let downloads_dir = temp_root.join(DOWNLOADS_SUBDIR);
        let cache_dir = temp_root.join(CACHE_SUBDIR);
        fs::create_dir_all(&downloads_dir)?;
        fs::create_dir_all(&cache_dir)?;

        Ok(Self {
            temp_root,
            downloads_dir,
            cache_dir,
            config,
            progress,
            total_bytes_freed: AtomicU64::new(0),
        })
    }

    /// Per-request artifact area
    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    /// Reusable extraction-result area
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// One sweep: age-based deletion per area, then the aggressive pass if
    /// total usage exceeds the cap. Also drops expired progress records.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        self.delete_aged(&self.downloads_dir, self.config.max_file_age, &mut report);
        self.delete_aged(&self.cache_dir, self.config.max_cache_age, &mut report);

        let total = dir_size(&self.temp_root);
        if total > self.config.max_temp_size {
            info!(
                "temp usage {} exceeds cap {}, running aggressive pass",
                format_bytes(total),
                format_bytes(self.config.max_temp_size)
            );
            self.aggressive_pass(&mut report);
        }

        let expired = self.progress.cleanup_expired();
        if expired > 0 {
            debug!("dropped {} expired progress records", expired);
        }

        if report.files_deleted > 0 {
            info!(
                "sweep deleted {} files, freed {}{}",
                report.files_deleted,
                format_bytes(report.bytes_freed),
                if report.aggressive { " (aggressive)" } else { "" }
            );
        }
        self.total_bytes_freed
            .fetch_add(report.bytes_freed, Ordering::Relaxed);
        report
    }

    /// Operator-triggered cleanup: a normal sweep plus an unconditional
    /// aggressive pass. Safe to call at any time, including on an empty
    /// temp area.
    pub fn force_cleanup(&self) -> SweepReport {
        info!("manual cleanup triggered");
        let mut report = self.sweep();
        self.aggressive_pass(&mut report);
        report
    }

    /// Delete top-level entries in `dir` older than `max_age`: files, and
    /// directories once nothing is left inside them
    fn delete_aged(&self, dir: &Path, max_age: Duration, report: &mut SweepReport) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cannot read {}: {}", dir.display(), e);
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                let is_empty = fs::read_dir(&path)
                    .map(|mut children| children.next().is_none())
                    .unwrap_or(false);
                if is_empty && file_age(&path).map_or(false, |age| age > max_age) {
                    if fs::remove_dir(&path).is_ok() {
                        report.files_deleted += 1;
                        debug!("removed aged empty directory {}", path.display());
                    }
                }
                continue;
            }
            if !path.is_file() {
                continue;
            }
            if file_age(&path).map_or(false, |age| age > max_age) {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                match fs::remove_file(&path) {
                    Ok(()) => {
                        report.files_deleted += 1;
                        report.bytes_freed += size;
                    }
                    // Races with post-stream deletion are expected
                    Err(e) => debug!("could not delete {}: {}", path.display(), e),
                }
            }
        }
    }

    /// Recursive pass over the whole temp root with the short age threshold
    fn aggressive_pass(&self, report: &mut SweepReport) {
        report.aggressive = true;

        for entry in WalkDir::new(&self.temp_root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if file_age(path).map_or(false, |age| age > self.config.aggressive_age) {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                if fs::remove_file(path).is_ok() {
                    report.files_deleted += 1;
                    report.bytes_freed += size;
                }
            }
        }
    }

    /// Log a usage report. Runs on the slow housekeeping tick; Rust has no
    /// forced-GC facility, so this is observation only.
    pub fn report_usage(&self) {
        info!(
            "temp usage: {} (lifetime freed: {})",
            format_bytes(dir_size(&self.temp_root)),
            format_bytes(self.total_bytes_freed.load(Ordering::Relaxed))
        );
    }

    /// Spawn the periodic sweep and housekeeping tasks
    pub fn spawn(self: &Arc<Self>) {
        let sweeper = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweeper.config.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let scheduler = sweeper.clone();
                let _ = tokio::task::spawn_blocking(move || scheduler.sweep()).await;
            }
        });

        let reporter = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(reporter.config.report_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                reporter.report_usage();
            }
        });
    }
}

/// Age of a file from its modification time
fn file_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

/// Total size of all files under `path`, recursively
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
