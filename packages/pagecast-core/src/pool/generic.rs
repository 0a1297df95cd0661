//! Generic bounded pool with lazy warmup.
//!
//! Checkout concurrency is bounded by a semaphore sized to the maximum;
//! resources are created lazily once the idle set is empty. Warmup
//! happens on first acquisition, not at construction, so an idle host
//! never spawns browsers.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{OnceCell, Semaphore};

use super::{PoolError, PoolResult};

type FactoryFuture<T> = Pin<Box<dyn Future<Output = PoolResult<Arc<T>>> + Send>>;
type Factory<T> = Arc<dyn Fn() -> FactoryFuture<T> + Send + Sync>;

/// A resource that can live in a [`Pool`].
#[async_trait]
pub trait PoolResource: Send + Sync + 'static {
    /// Whether the resource may be handed out again.
    fn is_healthy(&self) -> bool;

    /// Tears the resource down. Called when a pool drops an unhealthy
    /// resource or shuts down.
    async fn close(&self);
}

/// Bounded pool of shared resources.
pub struct Pool<T: PoolResource> {
    factory: Factory<T>,
    min: usize,
    max: usize,
    idle: Mutex<VecDeque<Arc<T>>>,
    created: AtomicUsize,
    checkout: Arc<Semaphore>,
    warmup: OnceCell<()>,
    closed: AtomicBool,
}

impl<T: PoolResource> Pool<T> {
    /// Creates a pool with the given bounds and factory.
    pub fn new<F, Fut>(min: usize, max: usize, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PoolResult<Arc<T>>> + Send + 'static,
    {
        debug_assert!(max >= 1 && min <= max);
        Self {
            factory: Arc::new(move || Box::pin(factory()) as FactoryFuture<T>),
            min,
            max,
            idle: Mutex::new(VecDeque::new()),
            created: AtomicUsize::new(0),
            checkout: Arc::new(Semaphore::new(max)),
            warmup: OnceCell::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of resources currently alive (idle + checked out).
    pub fn size(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    /// Whether every checkout slot is in use.
    pub fn is_saturated(&self) -> bool {
        self.checkout.available_permits() == 0
    }

    /// Acquires a resource, waiting for capacity if saturated.
    ///
    /// The first acquisition warms the pool up to its minimum size.
    pub async fn acquire(&self) -> PoolResult<Arc<T>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        self.warmup
            .get_or_try_init(|| async {
                for _ in 0..self.min {
                    let resource = (self.factory)().await?;
                    self.created.fetch_add(1, Ordering::AcqRel);
                    self.idle.lock().push_back(resource);
                }
                Ok::<(), PoolError>(())
            })
            .await?;

        let permit = self
            .checkout
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        // Ownership of the slot transfers to the caller; `release` returns it.
        permit.forget();

        loop {
            let candidate = self.idle.lock().pop_front();
            match candidate {
                Some(resource) if resource.is_healthy() => return Ok(resource),
                Some(resource) => {
                    self.created.fetch_sub(1, Ordering::AcqRel);
                    tokio::spawn(async move { resource.close().await });
                }
                None => break,
            }
        }

        match (self.factory)().await {
            Ok(resource) => {
                self.created.fetch_add(1, Ordering::AcqRel);
                Ok(resource)
            }
            Err(e) => {
                self.checkout.add_permits(1);
                Err(e)
            }
        }
    }

    /// Returns a resource to the pool and frees its checkout slot.
    ///
    /// Unhealthy resources are closed instead of re-queued.
    pub fn release(&self, resource: Arc<T>) {
        if resource.is_healthy() && !self.closed.load(Ordering::Acquire) {
            self.idle.lock().push_back(resource);
        } else {
            self.created.fetch_sub(1, Ordering::AcqRel);
            tokio::spawn(async move { resource.close().await });
        }
        self.checkout.add_permits(1);
    }

    /// Shuts the pool down, closing every idle resource.
    ///
    /// Checked-out resources are closed as they are released.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.checkout.close();
        let drained: Vec<Arc<T>> = self.idle.lock().drain(..).collect();
        for resource in drained {
            self.created.fetch_sub(1, Ordering::AcqRel);
            resource.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Probe {
        healthy: AtomicBool,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PoolResource for Probe {
        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::Acquire)
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn probe_pool(min: usize, max: usize, closes: Arc<AtomicUsize>) -> Pool<Probe> {
        Pool::new(min, max, move || {
            let closes = closes.clone();
            async move {
                Ok(Arc::new(Probe {
                    healthy: AtomicBool::new(true),
                    closes,
                }))
            }
        })
    }

    #[tokio::test]
    async fn warmup_creates_min_resources() {
        let closes = Arc::new(AtomicUsize::new(0));
        let pool = probe_pool(2, 4, closes);
        let r = pool.acquire().await.unwrap();
        assert_eq!(pool.size(), 2);
        pool.release(r);
    }

    #[tokio::test]
    async fn saturation_blocks_until_release() {
        let closes = Arc::new(AtomicUsize::new(0));
        let pool = Arc::new(probe_pool(0, 1, closes));

        let first = pool.acquire().await.unwrap();
        assert!(pool.is_saturated());

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        // The waiter cannot proceed while the only slot is held.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        pool.release(first);
        let second = waiter.await.unwrap().unwrap();
        pool.release(second);
    }

    #[tokio::test]
    async fn unhealthy_resources_are_replaced() {
        let closes = Arc::new(AtomicUsize::new(0));
        let pool = probe_pool(1, 2, closes.clone());

        let r = pool.acquire().await.unwrap();
        r.healthy.store(false, Ordering::Release);
        pool.release(r);

        // The next acquire skips the dead resource and builds a fresh one.
        let fresh = pool.acquire().await.unwrap();
        assert!(fresh.is_healthy());
        tokio::task::yield_now().await;
        assert_eq!(closes.load(Ordering::Acquire), 1);
        pool.release(fresh);
    }

    #[tokio::test]
    async fn close_rejects_new_acquires() {
        let closes = Arc::new(AtomicUsize::new(0));
        let pool = probe_pool(1, 2, closes.clone());
        let r = pool.acquire().await.unwrap();
        pool.release(r);

        pool.close().await;
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
        assert_eq!(closes.load(Ordering::Acquire), 1);
    }
}
