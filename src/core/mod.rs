//! Download lifecycle core: locks, pooling, retry, progress, reclamation
//! and the orchestrator that ties them together.

pub mod lock;
pub mod orchestrator;
pub mod pool;
pub mod progress;
pub mod reclaim;
pub mod retry;

pub use lock::{DownloadLockRegistry, LockAttempt, LockGuard, DEFAULT_LOCK_TIMEOUT};
pub use orchestrator::{CompletedDownload, DownloadRequest, Orchestrator};
pub use pool::{PoolConfig, PooledResource, ResourceFactory, ResourcePool};
pub use progress::{ProgressRecord, ProgressStatus, ProgressTracker, ProgressUpdate};
pub use reclaim::{ReclaimConfig, ReclamationScheduler, SweepReport};
pub use retry::{RetryConfig, RetryPolicy};
