//! Browser process driver.
//!
//! Owns one browser process, its DevTools connection, and an inner pool
//! of page drivers. Browsers are themselves pooled by
//! [`PagePool`](crate::pool::PagePool).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::process::Child;
use uuid::Uuid;

use crate::cdp::{launch, CdpConnection, CdpSession, LaunchedBrowser, LaunchOptions};
use crate::config::{PoolConfig, RenderConfig};
use crate::events::EventEmitter;
use crate::page::PageDriver;
use crate::paths::WorkDirs;
use crate::pool::{Pool, PoolError, PoolResource, PoolResult};
use crate::preprocess::Preprocessor;

/// Lifecycle states of a browser process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserState {
    Uninitialized,
    Ready,
    Stopped,
    Closed,
    /// The process died or the connection broke; never handed out again.
    Unavailabled,
}

/// Driver for one browser process.
pub struct BrowserDriver {
    id: Uuid,
    child: Mutex<Option<Child>>,
    conn: Arc<CdpConnection>,
    state: RwLock<BrowserState>,
    pages: Pool<PageDriver>,
}

impl BrowserDriver {
    /// Launches a browser process and wires its inner page pool.
    pub async fn launch(
        config: Arc<RenderConfig>,
        pool_config: PoolConfig,
        preprocessor: Arc<Preprocessor>,
        emitter: Arc<dyn EventEmitter>,
    ) -> PoolResult<Arc<Self>> {
        let dirs = WorkDirs::new(&config.work_dir);
        let opts = LaunchOptions {
            executable: config.browser_executable.clone(),
            user_data_dir: dirs.browser(),
            gpu: config.gpu,
            compatible_render_mode: config.compatible_render_mode,
            debug: config.debug,
            launch_timeout: config.browser_launch_timeout,
        };

        let LaunchedBrowser { child, ws_url } = launch(&opts)
            .await
            .map_err(|e| PoolError::Create(e.to_string()))?;
        let conn = CdpConnection::connect(&ws_url)
            .await
            .map_err(|e| PoolError::Create(e.to_string()))?;

        // The tab opened by the launch command line is claimed by the
        // first page the pool builds.
        let initial_target_claimed = Arc::new(AtomicBool::new(false));
        let pages = {
            let conn = conn.clone();
            let config = config.clone();
            let preprocessor = preprocessor.clone();
            let emitter = emitter.clone();
            let initial = initial_target_claimed;
            Pool::new(pool_config.num_page_min, pool_config.num_page_max, move || {
                let conn = conn.clone();
                let config = config.clone();
                let preprocessor = preprocessor.clone();
                let emitter = emitter.clone();
                let initial = initial.clone();
                async move {
                    let session = if initial.swap(true, Ordering::AcqRel) {
                        CdpSession::create_page(conn).await
                    } else {
                        match find_initial_target(&conn).await {
                            Some(target_id) => CdpSession::attach(conn, target_id).await,
                            None => CdpSession::create_page(conn).await,
                        }
                    }
                    .map_err(|e| PoolError::Create(e.to_string()))?;

                    PageDriver::create(session, config, preprocessor, emitter)
                        .await
                        .map_err(|e| PoolError::Create(e.to_string()))
                }
            })
        };

        let driver = Arc::new(Self {
            id: Uuid::new_v4(),
            child: Mutex::new(Some(child)),
            conn,
            state: RwLock::new(BrowserState::Ready),
            pages,
        });
        log::info!("[Browser] #{} launched", driver.id);
        Ok(driver)
    }

    /// Stable identifier for logging.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The inner page pool.
    pub fn pages(&self) -> &Pool<PageDriver> {
        &self.pages
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BrowserState {
        *self.state.read()
    }

    /// Closes every page, the connection, and the process.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.write();
            if *state == BrowserState::Closed {
                return;
            }
            *state = BrowserState::Stopped;
        }

        self.pages.close().await;
        if let Err(e) = self.conn.send("Browser.close", json!({})).await {
            log::debug!("[Browser] #{} graceful close failed: {}", self.id, e);
        }
        if let Some(mut child) = self.child.lock().take() {
            let _ = child.start_kill();
        }
        *self.state.write() = BrowserState::Closed;
        log::info!("[Browser] #{} closed", self.id);
    }
}

/// Finds the `about:blank` tab opened by the launch command line.
async fn find_initial_target(conn: &Arc<CdpConnection>) -> Option<String> {
    let targets = conn.send("Target.getTargets", json!({})).await.ok()?;
    targets["targetInfos"]
        .as_array()?
        .iter()
        .find(|t| t["type"] == "page" && !t["attached"].as_bool().unwrap_or(false))
        .and_then(|t| t["targetId"].as_str())
        .map(str::to_string)
}

#[async_trait]
impl PoolResource for BrowserDriver {
    fn is_healthy(&self) -> bool {
        matches!(self.state(), BrowserState::Ready)
    }

    async fn close(&self) {
        self.shutdown().await;
    }
}
