//! Dispatch pool for task attempts
//!
//! A fixed number of execution slots shared by every tenant, fed from a
//! bounded [`AdmissionQueue`]. Slots are semaphore permits; a queued job is
//! spawned as soon as a permit is free and the permit is held until the job
//! finishes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, instrument, warn};

use super::admission::AdmissionQueue;

/// A unit of work run in one execution slot
pub type Job = BoxFuture<'static, ()>;

/// Dispatch pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchPoolConfig {
    /// Maximum concurrent attempts across all tenants
    pub max_concurrency: usize,

    /// Maximum jobs waiting for a slot
    pub queue_capacity: usize,
}

impl Default for DispatchPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
            queue_capacity: 1024,
        }
    }
}

impl DispatchPoolConfig {
    /// Set maximum concurrency
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Set admission queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

/// Dispatch pool errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The admission queue is full
    #[error("admission queue is full ({capacity} jobs)")]
    Saturated { capacity: usize },

    /// The pool no longer accepts work
    #[error("dispatch pool is shutting down")]
    ShuttingDown,

    /// In-flight jobs did not finish before the shutdown deadline
    #[error("graceful shutdown timed out with {in_flight} jobs in flight")]
    ShutdownTimeout { in_flight: usize },
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub in_flight: usize,
    pub queued: usize,
    pub max_concurrency: usize,
    pub queue_capacity: usize,
}

struct PoolInner {
    config: DispatchPoolConfig,
    permits: Arc<Semaphore>,
    queue: Mutex<AdmissionQueue<Job>>,
    accepting: AtomicBool,
    capacity_freed: Notify,
}

/// Bounded dispatch pool shared by all tenants
///
/// # Example
///
/// ```ignore
/// let pool = DispatchPool::new(DispatchPoolConfig::default().with_max_concurrency(8));
///
/// pool.enqueue("tenant-a", Box::pin(async move {
///     run_attempt().await;
/// }))?;
///
/// pool.shutdown(Duration::from_secs(30)).await?;
/// ```
#[derive(Clone)]
pub struct DispatchPool {
    inner: Arc<PoolInner>,
}

impl DispatchPool {
    /// Create a new dispatch pool
    pub fn new(config: DispatchPoolConfig) -> Self {
        // Every job passes through the queue, so it needs at least one place.
        let max_concurrency = config.max_concurrency.max(1);
        let queue_capacity = config.queue_capacity.max(1);
        Self {
            inner: Arc::new(PoolInner {
                permits: Arc::new(Semaphore::new(max_concurrency)),
                queue: Mutex::new(AdmissionQueue::new(queue_capacity)),
                accepting: AtomicBool::new(true),
                capacity_freed: Notify::new(),
                config: DispatchPoolConfig {
                    max_concurrency,
                    queue_capacity,
                },
            }),
        }
    }

    /// Queue a job on the tenant's lane and start it if a slot is free
    ///
    /// # Errors
    ///
    /// - [`PoolError::Saturated`] when the admission queue is full
    /// - [`PoolError::ShuttingDown`] after [`shutdown`](Self::shutdown)
    pub fn enqueue(&self, tenant_id: &str, job: Job) -> Result<(), PoolError> {
        if !self.is_accepting() {
            return Err(PoolError::ShuttingDown);
        }

        self.inner
            .queue
            .lock()
            .push(tenant_id, job)
            .map_err(|_| PoolError::Saturated {
                capacity: self.inner.config.queue_capacity,
            })?;

        pump(&self.inner);
        Ok(())
    }

    /// Wait until the admission queue has room again
    ///
    /// Returns immediately if it already has room or the pool is closed.
    pub async fn wait_for_capacity(&self) {
        let notified = self.inner.capacity_freed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if !self.inner.queue.lock().is_full() || !self.is_accepting() {
            return;
        }
        notified.await;
    }

    /// Whether new jobs are accepted
    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    /// Current counters
    pub fn stats(&self) -> PoolStats {
        let queued = self.inner.queue.lock().len();
        PoolStats {
            in_flight: self
                .inner
                .config
                .max_concurrency
                .saturating_sub(self.inner.permits.available_permits()),
            queued,
            max_concurrency: self.inner.config.max_concurrency,
            queue_capacity: self.inner.config.queue_capacity,
        }
    }

    /// Stop accepting work and wait for in-flight jobs
    ///
    /// Jobs still waiting in the admission queue are dropped without running;
    /// the number dropped is returned.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, timeout: Duration) -> Result<usize, PoolError> {
        if !self.inner.accepting.swap(false, Ordering::AcqRel) {
            return Ok(0);
        }

        let dropped = self.inner.queue.lock().drain().len();
        self.inner.capacity_freed.notify_waiters();
        info!(dropped, "Initiating graceful shutdown");

        let all = self.inner.config.max_concurrency as u32;
        match tokio::time::timeout(timeout, self.inner.permits.acquire_many(all)).await {
            Ok(Ok(permits)) => {
                self.inner.permits.close();
                drop(permits);
                info!("Dispatch pool stopped");
                Ok(dropped)
            }
            Ok(Err(_closed)) => Ok(dropped),
            Err(_elapsed) => {
                let in_flight = self.stats().in_flight;
                warn!(in_flight, "Shutdown timeout reached");
                Err(PoolError::ShutdownTimeout { in_flight })
            }
        }
    }
}

impl std::fmt::Debug for DispatchPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchPool")
            .field("stats", &self.stats())
            .field("accepting", &self.is_accepting())
            .finish()
    }
}

/// Start queued jobs while permits are available
fn pump(inner: &Arc<PoolInner>) {
    loop {
        let Ok(permit) = inner.permits.clone().try_acquire_owned() else {
            return;
        };

        let next = inner.queue.lock().pop();
        match next {
            Some((tenant_id, job)) => {
                debug!(%tenant_id, "dispatching job");
                inner.capacity_freed.notify_waiters();
                tokio::spawn(run_job(inner.clone(), permit, job));
            }
            None => {
                drop(permit);
                // A job pushed while we held the permit saw no free slot.
                if inner.queue.lock().is_empty() {
                    return;
                }
            }
        }
    }
}

async fn run_job(inner: Arc<PoolInner>, permit: OwnedSemaphorePermit, job: Job) {
    job.await;
    drop(permit);
    if inner.accepting.load(Ordering::Acquire) {
        pump(&inner);
    }
}
