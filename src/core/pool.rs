//! Bounded pool of expensive, reusable resources
//!
//! Scraping sessions are costly to create, so they are built lazily up to a
//! configured maximum and handed out one caller at a time. When the pool is
//! at capacity, `acquire` waits on a short poll interval until a resource
//! comes back. Creation failures propagate to the caller; retrying creation
//! is the caller's job (via the retry policy), never the pool's.

use crate::error::VgrabError;
use async_trait::async_trait;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Builds and tears down pool resources
#[async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    type Resource: Send + 'static;

    /// Create a fresh resource. Expensive; called lazily, never speculatively.
    async fn create(&self) -> Result<Self::Resource, VgrabError>;

    /// Destroy a resource on pool shutdown
    async fn destroy(&self, resource: Self::Resource);
}

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of live resources
    pub max_instances: usize,
    /// Poll interval while waiting for a resource at capacity
    pub poll_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_instances: 3,
            poll_interval: Duration::from_millis(100),
        }
    }
}

struct PoolState<R> {
    available: Vec<R>,
    total: usize,
    shutdown: bool,
}

/// Bounded resource pool with blocking acquire and graceful shutdown
pub struct ResourcePool<F: ResourceFactory> {
    factory: Arc<F>,
    state: Arc<Mutex<PoolState<F::Resource>>>,
    config: PoolConfig,
}

impl<F: ResourceFactory> Clone for ResourcePool<F> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            state: self.state.clone(),
            config: self.config.clone(),
        }
    }
}

impl<F: ResourceFactory> ResourcePool<F> {
    /// Create a pool with the default configuration
    pub fn new(factory: F) -> Self {
        Self::with_config(factory, PoolConfig::default())
    }

    /// Create a pool with a custom configuration
    pub fn with_config(factory: F, config: PoolConfig) -> Self {
        Self {
            factory: Arc::new(factory),
            state: Arc::new(Mutex::new(PoolState {
                available: Vec::new(),
                total: 0,
                shutdown: false,
            })),
            config,
        }
    }

    /// Acquire a resource, waiting if the pool is at capacity.
    ///
    /// The returned guard hands the resource back on drop.
    pub async fn acquire(&self) -> Result<PooledResource<F>, VgrabError> {
        loop {
            let must_create = {
                let mut state = self.state.lock().unwrap();
                if state.shutdown {
                    return Err(VgrabError::PoolShutdown);
                }
                if let Some(resource) = state.available.pop() {
                    return Ok(self.guard(resource));
                }
                if state.total < self.config.max_instances {
                    // Reserve the slot before the await so concurrent callers
                    // cannot overshoot max_instances
                    state.total += 1;
                    true
                } else {
                    false
                }
            };

            if must_create {
                match self.factory.create().await {
                    Ok(resource) => {
                        debug!("created pool resource ({} live)", self.live_count());
                        return Ok(self.guard(resource));
                    }
                    Err(e) => {
                        self.state.lock().unwrap().total -= 1;
                        return Err(e);
                    }
                }
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Destroy all resources. Idle ones are torn down here, concurrently;
    /// busy ones are torn down by their guards as they are dropped.
    pub async fn shutdown(&self) {
        let idle = {
            let mut state = self.state.lock().unwrap();
            state.shutdown = true;
            let idle = std::mem::take(&mut state.available);
            state.total -= idle.len();
            idle
        };

        info!("shutting down pool ({} idle resources)", idle.len());
        let teardowns = idle.into_iter().map(|r| self.factory.destroy(r));
        futures::future::join_all(teardowns).await;
    }

    /// Number of live resources, idle or busy
    pub fn live_count(&self) -> usize {
        self.state.lock().unwrap().total
    }

    /// Number of idle resources
    pub fn idle_count(&self) -> usize {
        self.state.lock().unwrap().available.len()
    }

    fn guard(&self, resource: F::Resource) -> PooledResource<F> {
        PooledResource {
            resource: Some(resource),
            pool: self.clone(),
        }
    }
}

/// RAII guard around an acquired resource.
///
/// Dropping the guard returns the resource to the pool, or destroys it if
/// the pool has shut down in the meantime.
pub struct PooledResource<F: ResourceFactory> {
    resource: Option<F::Resource>,
    pool: ResourcePool<F>,
}

impl<F: ResourceFactory> std::fmt::Debug for PooledResource<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledResource").finish_non_exhaustive()
    }
}

impl<F: ResourceFactory> Deref for PooledResource<F> {
    type Target = F::Resource;

    fn deref(&self) -> &Self::Target {
        self.resource.as_ref().expect("resource taken")
    }
}

impl<F: ResourceFactory> DerefMut for PooledResource<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource.as_mut().expect("resource taken")
    }
}

impl<F: ResourceFactory> Drop for PooledResource<F> {
    fn drop(&mut self) {
        let Some(resource) = self.resource.take() else {
            return;
        };

        let destroy = {
            let mut state = self.pool.state.lock().unwrap();
            if state.shutdown {
                state.total -= 1;
                true
            } else {
                state.available.push(resource);
                return;
            }
        };

        if destroy {
            let factory = self.pool.factory.clone();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { factory.destroy(resource).await });
            }
        }
    }
}
