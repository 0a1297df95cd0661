//! Two-tier browser/page acquisition.
//!
//! The outer pool rotates browsers; each browser owns an inner pool of
//! pages. Acquisition runs under one global lock: take a browser, take a
//! page from it, then either hand the browser straight back (it still has
//! page capacity) or park it on the deferred list until a page release
//! brings it below saturation. A periodic ticker walks the deferred list.
//!
//! The invariant this preserves: the outer idle set never contains a
//! saturated browser, and page capacity is the only thing that bounds
//! concurrent captures.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::browser::BrowserDriver;
use crate::config::{PoolConfig, RenderConfig};
use crate::events::EventEmitter;
use crate::page::{PageDriver, PageState};
use crate::preprocess::Preprocessor;

use super::generic::{Pool, PoolResource};
use super::PoolResult;

/// How often parked browsers are re-examined.
const DEFERRED_TICK: Duration = Duration::from_secs(5);

/// A checked-out page plus the browser that owns it.
pub struct PageLease {
    /// The page, ready for capture.
    pub page: Arc<PageDriver>,
    browser: Arc<BrowserDriver>,
}

impl PageLease {
    /// The owning browser (for diagnostics).
    pub fn browser(&self) -> &Arc<BrowserDriver> {
        &self.browser
    }
}

/// Two-tier pool of browsers and pages.
pub struct PagePool {
    browsers: Pool<BrowserDriver>,
    acquire_lock: tokio::sync::Mutex<()>,
    deferred: Arc<Mutex<Vec<Arc<BrowserDriver>>>>,
    ticker_cancel: CancellationToken,
}

impl PagePool {
    /// Builds the pool. Browsers launch lazily on first acquisition.
    pub fn new(
        config: Arc<RenderConfig>,
        pool_config: PoolConfig,
        preprocessor: Arc<Preprocessor>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Result<Arc<Self>, String> {
        pool_config.validate()?;
        config.validate()?;

        let browsers = {
            let config = config.clone();
            Pool::new(
                pool_config.num_browser_min,
                pool_config.num_browser_max,
                move || {
                    let config = config.clone();
                    let preprocessor = preprocessor.clone();
                    let emitter = emitter.clone();
                    async move {
                        BrowserDriver::launch(config, pool_config, preprocessor, emitter).await
                    }
                },
            )
        };

        let pool = Arc::new(Self {
            browsers,
            acquire_lock: tokio::sync::Mutex::new(()),
            deferred: Arc::new(Mutex::new(Vec::new())),
            ticker_cancel: CancellationToken::new(),
        });
        pool.spawn_deferred_ticker();
        Ok(pool)
    }

    fn spawn_deferred_ticker(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let cancel = self.ticker_cancel.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(DEFERRED_TICK);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {}
                }
                let Some(pool) = weak.upgrade() else { break };
                pool.release_unsaturated_deferred();
            }
        });
    }

    /// Moves parked browsers back into rotation once they have free
    /// page capacity again.
    fn release_unsaturated_deferred(&self) {
        let ready: Vec<Arc<BrowserDriver>> = {
            let mut deferred = self.deferred.lock();
            let (ready, still): (Vec<_>, Vec<_>) = deferred
                .drain(..)
                .partition(|b| !b.pages().is_saturated() || !b.is_healthy());
            *deferred = still;
            ready
        };
        for browser in ready {
            log::debug!("[Pool] Browser #{} back in rotation", browser.id());
            self.browsers.release(browser);
        }
    }

    /// Acquires a page, launching browsers up to the configured bounds.
    pub async fn acquire(&self) -> PoolResult<PageLease> {
        let _guard = self.acquire_lock.lock().await;

        let browser = self.browsers.acquire().await?;
        let page = match browser.pages().acquire().await {
            Ok(page) => page,
            Err(e) => {
                self.browsers.release(browser);
                return Err(e);
            }
        };

        if browser.pages().is_saturated() {
            // Parked until a page release frees capacity; the ticker
            // re-releases it into the outer pool.
            log::debug!("[Pool] Browser #{} saturated, deferring release", browser.id());
            self.deferred.lock().push(browser.clone());
        } else {
            self.browsers.release(browser.clone());
        }

        Ok(PageLease { page, browser })
    }

    /// Returns a lease. Stopped pages are reset back to `Ready`; pages
    /// that failed are discarded and replaced lazily.
    pub async fn release(&self, lease: PageLease) {
        let PageLease { page, browser } = lease;
        if matches!(
            page.state(),
            PageState::Stopped | PageState::Capturing | PageState::Paused
        ) {
            if let Err(e) = page.reset().await {
                log::warn!("[Pool] Page #{} reset failed: {}", page.id(), e);
            }
        }
        browser.pages().release(page);
        // An immediate check beats waiting up to a full tick.
        self.release_unsaturated_deferred();
    }

    /// Shuts down every browser and page.
    pub async fn shutdown(&self) {
        self.ticker_cancel.cancel();
        let deferred: Vec<Arc<BrowserDriver>> = self.deferred.lock().drain(..).collect();
        for browser in deferred {
            self.browsers.release(browser);
        }
        self.browsers.close().await;
    }
}
