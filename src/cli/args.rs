//! Command line argument parsing

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// vgrab - social media download orchestration service
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address to bind the HTTP server to
    #[arg(long, value_name = "ADDR", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    pub port: u16,

    /// Root of the managed temp area for artifacts and cache
    #[arg(long, value_name = "DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Maximum number of concurrent scraping sessions
    #[arg(long, default_value = "3")]
    pub max_sessions: usize,

    /// TTL for per-URL download locks (e.g., 30s, 1m)
    #[arg(long, value_name = "DURATION", default_value = "30s")]
    pub lock_timeout: humantime::Duration,

    /// Retries for transient extraction failures
    #[arg(long, default_value = "3")]
    pub retries: u32,

    /// Interval between disk reclamation sweeps
    #[arg(long, value_name = "DURATION", default_value = "1m")]
    pub sweep_interval: humantime::Duration,

    /// Temp usage cap that triggers aggressive reclamation, in megabytes
    #[arg(long, value_name = "MB", default_value = "500")]
    pub max_temp_mb: u64,

    /// Path to the yt-dlp binary
    #[arg(long, value_name = "PATH", default_value = "yt-dlp")]
    pub yt_dlp: PathBuf,

    /// Shared secret required by the cleanup endpoint; open when unset
    #[arg(long, value_name = "SECRET", env = "VGRAB_CLEANUP_SECRET")]
    pub cleanup_secret: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Lock TTL as a std Duration
    pub fn lock_timeout_duration(&self) -> Duration {
        self.lock_timeout.into()
    }

    /// Sweep interval as a std Duration
    pub fn sweep_interval_duration(&self) -> Duration {
        self.sweep_interval.into()
    }

    /// Temp usage cap in bytes
    pub fn max_temp_bytes(&self) -> u64 {
        self.max_temp_mb * 1024 * 1024
    }

    /// Temp root, defaulting to a vgrab directory under the system temp
    pub fn temp_root(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("vgrab"))
    }
}
