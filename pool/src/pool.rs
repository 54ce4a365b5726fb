//! The worker pool: bounded acquire/release with FIFO waiters, retries,
//! idle reaping, and rotation-by-work-count.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use common::config::PoolConfig;

use crate::error::{PoolError, Result};
use crate::factory::ResourceFactory;
use crate::resource::PoolResource;
use crate::stats::PoolStats;

struct Idle<T> {
    resource: PoolResource<T>,
    since: Instant,
}

struct PoolInner<T> {
    free: VecDeque<Idle<T>>,
    in_use: usize,
    pending_create: usize,
    waiters: VecDeque<oneshot::Sender<PoolResource<T>>>,
    draining: bool,
}

impl<T> PoolInner<T> {
    fn total(&self) -> usize {
        self.free.len() + self.in_use + self.pending_create
    }
}

enum Grab<T> {
    Free(PoolResource<T>),
    Wait {
        rx: oneshot::Receiver<PoolResource<T>>,
        spawn_create: bool,
    },
    Drained,
}

struct PoolCore<F: ResourceFactory> {
    factory: Arc<F>,
    config: PoolConfig,
    inner: Mutex<PoolInner<F::Payload>>,
    stats: Arc<PoolStats>,
}

/// Bounded pool of renderer resources. A cheap-to-clone handle; all clones
/// share the same pool.
///
/// Exclusive ownership: while a caller holds a resource it is not on the
/// free list, and all page operations go through that caller. Everything
/// else (free list, waiter queue, occupancy counters) lives behind one lock
/// that is never held across factory calls.
pub struct WorkerPool<F: ResourceFactory> {
    core: Arc<PoolCore<F>>,
}

impl<F: ResourceFactory> Clone for WorkerPool<F> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<F: ResourceFactory> WorkerPool<F> {
    pub fn new(factory: Arc<F>, config: PoolConfig) -> Self {
        Self {
            core: Arc::new(PoolCore {
                factory,
                config,
                inner: Mutex::new(PoolInner {
                    free: VecDeque::new(),
                    in_use: 0,
                    pending_create: 0,
                    waiters: VecDeque::new(),
                    draining: false,
                }),
                stats: Arc::new(PoolStats::new()),
            }),
        }
    }

    pub fn stats(&self) -> Arc<PoolStats> {
        self.core.stats.clone()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.core.config
    }

    /// Current (free, in_use, pending_create) occupancy.
    pub async fn counts(&self) -> (usize, usize, usize) {
        let inner = self.core.inner.lock().await;
        (inner.free.len(), inner.in_use, inner.pending_create)
    }

    /// Warm the pool up to `min_workers` and start the background tasks
    /// (reaper, minimum-resources tick, stats bucket rotation).
    pub async fn start(&self) {
        self.ensure_min().await;

        let pool = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(
                pool.core.config.reaper_interval.max(1),
            ));
            loop {
                tick.tick().await;
                if pool.core.inner.lock().await.draining {
                    break;
                }
                pool.reap_idle().await;
            }
        });

        if self.core.config.resources_interval > 0 {
            let pool = self.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_millis(
                    pool.core.config.resources_interval,
                ));
                loop {
                    tick.tick().await;
                    if pool.core.inner.lock().await.draining {
                        break;
                    }
                    pool.ensure_min().await;
                }
            });
        }

        let pool = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(60));
            tick.tick().await; // immediate first tick
            loop {
                tick.tick().await;
                if pool.core.inner.lock().await.draining {
                    break;
                }
                pool.core.stats.rotate_bucket();
            }
        });
    }

    /// Take a resource, waiting at most `acquire_timeout`.
    ///
    /// Free resources are validated first; a failed validation destroys the
    /// resource (and schedules a replacement) before the next candidate is
    /// tried. With no free resource and headroom left, an async create is
    /// started and the caller queues FIFO behind any earlier waiters.
    pub async fn acquire(&self) -> Result<PoolResource<F::Payload>> {
        let deadline = Instant::now() + Duration::from_millis(self.core.config.acquire_timeout);

        loop {
            if Instant::now() >= deadline {
                return Err(PoolError::AcquireTimeout);
            }

            let grab = {
                let mut inner = self.core.inner.lock().await;
                if inner.draining {
                    Grab::Drained
                } else if let Some(idle) = inner.free.pop_front() {
                    inner.in_use += 1;
                    Grab::Free(idle.resource)
                } else {
                    let spawn_create = inner.total() < self.core.config.max_workers;
                    if spawn_create {
                        inner.pending_create += 1;
                    }
                    let (tx, rx) = oneshot::channel();
                    inner.waiters.push_back(tx);
                    Grab::Wait { rx, spawn_create }
                }
            };

            match grab {
                Grab::Drained => return Err(PoolError::Drained),
                Grab::Free(mut resource) => {
                    if self.core.factory.validate(&mut resource).await {
                        return Ok(resource);
                    }
                    debug!(id = %resource.id(), work = resource.work_count(), "resource failed validation, rotating");
                    {
                        let mut inner = self.core.inner.lock().await;
                        inner.in_use -= 1;
                    }
                    self.destroy_resource(resource).await;
                    self.maybe_spawn_create().await;
                }
                Grab::Wait { rx, spawn_create } => {
                    if spawn_create {
                        self.spawn_create();
                    }
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match tokio::time::timeout(remaining, rx).await {
                        Ok(Ok(resource)) => return Ok(resource),
                        // Sender dropped (drain, or a lapped handoff): retry.
                        Ok(Err(_)) => {}
                        Err(_) => return Err(PoolError::AcquireTimeout),
                    }
                }
            }
        }
    }

    /// Return a resource. Hands it to the oldest live waiter (validated
    /// first) or parks it on the free list.
    pub async fn release(&self, resource: PoolResource<F::Payload>) {
        let mut resource = resource;

        loop {
            let waiter = {
                let mut inner = self.core.inner.lock().await;
                inner.waiters.pop_front()
            };

            let Some(tx) = waiter else {
                let mut inner = self.core.inner.lock().await;
                inner.in_use -= 1;
                inner.free.push_back(Idle {
                    resource,
                    since: Instant::now(),
                });
                return;
            };

            if self.core.factory.validate(&mut resource).await {
                match tx.send(resource) {
                    // Handed over; stays accounted as in_use.
                    Ok(()) => return,
                    // Waiter timed out meanwhile; try the next one.
                    Err(back) => {
                        resource = back;
                        continue;
                    }
                }
            } else {
                debug!(id = %resource.id(), "resource retired on release handoff");
                {
                    let mut inner = self.core.inner.lock().await;
                    // The waiter keeps its place; a replacement create will
                    // serve it.
                    inner.waiters.push_front(tx);
                    inner.in_use -= 1;
                }
                self.destroy_resource(resource).await;
                self.maybe_spawn_create().await;
                return;
            }
        }
    }

    /// Stop accepting acquires, wait (bounded) for in-use resources to come
    /// back, then destroy everything idle. The engine itself is closed by
    /// the lifecycle owner afterwards.
    pub async fn drain(&self) {
        info!("draining worker pool");
        {
            let mut inner = self.core.inner.lock().await;
            inner.draining = true;
            inner.waiters.clear();
        }

        let deadline =
            Instant::now() + Duration::from_millis(self.core.config.destroy_timeout.max(1));
        loop {
            let victims: Vec<_> = {
                let mut inner = self.core.inner.lock().await;
                inner.free.drain(..).collect()
            };
            for idle in victims {
                self.destroy_resource(idle.resource).await;
            }

            let in_use = self.core.inner.lock().await.in_use;
            if in_use == 0 || Instant::now() >= deadline {
                if in_use > 0 {
                    warn!(in_use, "drain deadline hit with resources still out");
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    async fn reap_idle(&self) {
        let idle_after = Duration::from_millis(self.core.config.idle_timeout);
        let victims: Vec<_> = {
            let mut inner = self.core.inner.lock().await;
            let mut victims = Vec::new();
            while inner.total() > self.core.config.min_workers {
                match inner.free.front() {
                    Some(idle) if idle.since.elapsed() > idle_after => {
                        let idle = inner.free.pop_front().expect("front exists");
                        victims.push(idle);
                    }
                    _ => break,
                }
            }
            victims
        };
        for idle in victims {
            debug!(id = %idle.resource.id(), "reaping idle resource");
            self.destroy_resource(idle.resource).await;
        }
    }

    /// Top the pool back up to `min_workers`.
    async fn ensure_min(&self) {
        let deficit = {
            let mut inner = self.core.inner.lock().await;
            if inner.draining {
                0
            } else {
                let deficit = self.core.config.min_workers.saturating_sub(inner.total());
                inner.pending_create += deficit;
                deficit
            }
        };
        for _ in 0..deficit {
            self.spawn_create();
        }
    }

    /// Start one create if a waiter needs it or the pool is under minimum.
    async fn maybe_spawn_create(&self) {
        let spawn = {
            let mut inner = self.core.inner.lock().await;
            let needed = !inner.waiters.is_empty() || inner.total() < self.core.config.min_workers;
            if !inner.draining && needed && inner.total() < self.core.config.max_workers {
                inner.pending_create += 1;
                true
            } else {
                false
            }
        };
        if spawn {
            self.spawn_create();
        }
    }

    /// Run one create attempt in the background. `pending_create` must have
    /// been incremented by the caller; a failure schedules a retry after
    /// `create_retry_interval` without counting against capacity.
    fn spawn_create(&self) {
        let pool = self.clone();
        tokio::spawn(async move {
            let create_timeout = Duration::from_millis(pool.core.config.create_timeout.max(1));
            let outcome = tokio::time::timeout(create_timeout, pool.core.factory.create()).await;

            let resource = match outcome {
                Ok(Ok(resource)) => resource,
                Ok(Err(err)) => {
                    warn!(%err, "worker creation failed");
                    pool.finish_failed_create().await;
                    return;
                }
                Err(_) => {
                    warn!("worker creation timed out");
                    pool.finish_failed_create().await;
                    return;
                }
            };

            debug!(id = %resource.id(), work = resource.work_count(), "worker created");
            let leftover = {
                let mut inner = pool.core.inner.lock().await;
                inner.pending_create -= 1;
                if inner.draining {
                    Some(resource)
                } else {
                    let mut resource = Some(resource);
                    while let Some(tx) = inner.waiters.pop_front() {
                        match tx.send(resource.take().expect("resource present")) {
                            Ok(()) => {
                                inner.in_use += 1;
                                break;
                            }
                            Err(back) => resource = Some(back),
                        }
                    }
                    if let Some(resource) = resource.take() {
                        inner.free.push_back(Idle {
                            resource,
                            since: Instant::now(),
                        });
                    }
                    None
                }
            };
            // A create that loses the race with drain is torn down again.
            if let Some(resource) = leftover {
                pool.destroy_resource(resource).await;
            }
        });
    }

    async fn finish_failed_create(&self) {
        {
            let mut inner = self.core.inner.lock().await;
            inner.pending_create -= 1;
        }
        tokio::time::sleep(Duration::from_millis(
            self.core.config.create_retry_interval.max(1),
        ))
        .await;
        self.maybe_spawn_create().await;
    }

    async fn destroy_resource(&self, resource: PoolResource<F::Payload>) {
        let destroy_timeout = Duration::from_millis(self.core.config.destroy_timeout.max(1));
        if tokio::time::timeout(destroy_timeout, self.core.factory.destroy(resource))
            .await
            .is_err()
        {
            warn!("worker destruction timed out");
        }
    }
}
