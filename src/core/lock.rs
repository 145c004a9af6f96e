//! Per-URL download lock registry
//!
//! Prevents duplicate concurrent work on the same logical request. This is
//! not a queue: a rejected caller gets a retry-after hint and must come back
//! on its own. Entries auto-expire after `timeout` so a holder that crashed
//! without releasing can never block a key forever.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default lock TTL, matching the per-request ceiling of the transport
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct LockEntry {
    acquired_at: Instant,
    owner: String,
}

/// Outcome of a lock acquisition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    /// Lock granted; `stale_owner_evicted` is true when a timed-out entry
    /// from a previous holder was removed to make room
    Acquired { stale_owner_evicted: bool },
    /// Another request holds a live lock on this key
    Rejected { retry_after: Duration },
}

/// Registry of in-flight download locks keyed by normalized URL hash
#[derive(Debug, Clone)]
pub struct DownloadLockRegistry {
    locks: Arc<Mutex<HashMap<String, LockEntry>>>,
    timeout: Duration,
}

impl DownloadLockRegistry {
    /// Create a registry with the default 30 second TTL
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Create a registry with a custom TTL
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// Try to acquire the lock for `key` on behalf of `owner`.
    ///
    /// A live entry rejects the caller with the remaining TTL as a
    /// retry-after hint. A stale entry is evicted lazily and the lock is
    /// granted to the new owner.
    pub fn try_acquire(&self, key: &str, owner: &str) -> LockAttempt {
        let mut locks = self.locks.lock().unwrap();
        let now = Instant::now();

        let mut stale_owner_evicted = false;
        if let Some(entry) = locks.get(key) {
            let age = now.duration_since(entry.acquired_at);
            if age < self.timeout {
                let retry_after = self.timeout - age;
                debug!(
                    "lock rejected for key {} (held by {}, {:?} remaining)",
                    key, entry.owner, retry_after
                );
                return LockAttempt::Rejected { retry_after };
            }
            warn!(
                "evicting stale lock for key {} (owner {} never released)",
                key, entry.owner
            );
            locks.remove(key);
            stale_owner_evicted = true;
        }

        locks.insert(
            key.to_string(),
            LockEntry {
                acquired_at: now,
                owner: owner.to_string(),
            },
        );
        LockAttempt::Acquired { stale_owner_evicted }
    }

    /// Release the lock for `key`. Idempotent: releasing an absent key is a
    /// no-op.
    pub fn release(&self, key: &str) {
        let mut locks = self.locks.lock().unwrap();
        if locks.remove(key).is_some() {
            debug!("released lock for key {}", key);
        }
    }

    /// Number of entries currently in the registry, live or stale
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap().len()
    }

    /// Whether the registry holds no entries at all
    pub fn is_empty(&self) -> bool {
        self.locks.lock().unwrap().is_empty()
    }
}

impl Default for DownloadLockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that releases its lock on drop, on every exit path
#[derive(Debug)]
pub struct LockGuard {
    registry: DownloadLockRegistry,
    key: String,
}

impl LockGuard {
    pub fn new(registry: DownloadLockRegistry, key: String) -> Self {
        Self { registry, key }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.registry.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_acquire_succeeds() {
        let registry = DownloadLockRegistry::new();
        assert_eq!(
            registry.try_acquire("key1", "req-a"),
            LockAttempt::Acquired {
                stale_owner_evicted: false
            }
        );
    }

    #[test]
    fn test_second_acquire_is_rejected_with_hint() {
        let registry = DownloadLockRegistry::new();
        registry.try_acquire("key1", "req-a");

        match registry.try_acquire("key1", "req-b") {
            LockAttempt::Rejected { retry_after } => {
                assert!(retry_after <= DEFAULT_LOCK_TIMEOUT);
                assert!(retry_after > Duration::from_secs(25));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_different_keys_are_independent() {
        let registry = DownloadLockRegistry::new();
        registry.try_acquire("key1", "req-a");
        assert!(matches!(
            registry.try_acquire("key2", "req-b"),
            LockAttempt::Acquired { .. }
        ));
    }

    #[test]
    fn test_release_then_reacquire() {
        let registry = DownloadLockRegistry::new();
        registry.try_acquire("key1", "req-a");
        registry.release("key1");
        assert!(matches!(
            registry.try_acquire("key1", "req-b"),
            LockAttempt::Acquired {
                stale_owner_evicted: false
            }
        ));
    }

    #[test]
    fn test_release_is_idempotent() {
        let registry = DownloadLockRegistry::new();
        registry.release("never-acquired");
        registry.try_acquire("key1", "req-a");
        registry.release("key1");
        registry.release("key1");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stale_lock_is_evicted_without_release() {
        // Crash-safety: the first holder never calls release
        let registry = DownloadLockRegistry::with_timeout(Duration::from_millis(20));
        registry.try_acquire("key1", "crashed-req");

        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(
            registry.try_acquire("key1", "req-b"),
            LockAttempt::Acquired {
                stale_owner_evicted: true
            }
        );
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let registry = DownloadLockRegistry::new();
        registry.try_acquire("key1", "req-a");
        {
            let _guard = LockGuard::new(registry.clone(), "key1".to_string());
        }
        assert!(matches!(
            registry.try_acquire("key1", "req-b"),
            LockAttempt::Acquired {
                stale_owner_evicted: false
            }
        ));
    }
}
