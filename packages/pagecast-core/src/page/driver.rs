//! Host-side controller for one browser tab.
//!
//! The driver owns the tab's protocol session, injects the capture
//! runtime, intercepts the preprocess RPC and font requests, exposes the
//! host-call surface the page uses to pace capture, and grabs composited
//! frames through begin-frame control.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch, Notify};
use uuid::Uuid;

use crate::cdp::{CdpError, CdpEvent, CdpSession};
use crate::config::{RenderConfig, TimeActionPolicy, VideoOptions};
use crate::encode::codec::FrameFormat;
use crate::error::{PagecastError, PagecastResult};
use crate::events::{EventEmitter, PageEvent};
use crate::media::AudioTrack;
use crate::paths::WorkDirs;
use crate::pool::PoolResource;
use crate::preprocess::{Preprocessor, PreprocessError, VideoPreprocessConfig};

use super::animations::CssAnimationTracker;
use super::scripts::{self, VendorScripts};

/// Lifecycle states of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Uninitialized,
    Ready,
    Capturing,
    Paused,
    Stopped,
    Closed,
    /// The renderer stalled or crashed; never handed out again.
    Unavailabled,
}

/// A host-registered action fired when virtual time reaches its key.
pub type TimeAction = Box<
    dyn Fn(Arc<PageDriver>) -> Pin<Box<dyn Future<Output = PagecastResult<()>> + Send>>
        + Send
        + Sync,
>;

/// Host-side controller for one tab.
pub struct PageDriver {
    id: Uuid,
    session: CdpSession,
    config: Arc<RenderConfig>,
    preprocessor: Arc<Preprocessor>,
    emitter: Arc<dyn EventEmitter>,

    state: RwLock<PageState>,
    options: RwLock<Option<VideoOptions>>,
    capture_url: Mutex<Option<String>>,
    config_script_id: Mutex<Option<String>>,

    animations: CssAnimationTracker,
    dom_loaded: AtomicBool,
    time_actions: Mutex<BTreeMap<u64, TimeAction>>,
    audios: Mutex<Vec<AudioTrack>>,
    next_audio_id: AtomicI32,

    frame_tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    load_notify: Notify,
    done_tx: watch::Sender<bool>,
    failure: Mutex<Option<PagecastError>>,
}

impl PageDriver {
    /// Initializes a driver over an attached session.
    ///
    /// Enables the protocol domains, registers the host binding, injects
    /// the capture runtime at document start, and spawns the event loop.
    pub async fn create(
        session: CdpSession,
        config: Arc<RenderConfig>,
        preprocessor: Arc<Preprocessor>,
        emitter: Arc<dyn EventEmitter>,
    ) -> PagecastResult<Arc<Self>> {
        let (done_tx, _) = watch::channel(false);
        let driver = Arc::new(Self {
            id: Uuid::new_v4(),
            session,
            config,
            preprocessor,
            emitter,
            state: RwLock::new(PageState::Uninitialized),
            options: RwLock::new(None),
            capture_url: Mutex::new(None),
            config_script_id: Mutex::new(None),
            animations: CssAnimationTracker::default(),
            dom_loaded: AtomicBool::new(false),
            time_actions: Mutex::new(BTreeMap::new()),
            audios: Mutex::new(Vec::new()),
            next_audio_id: AtomicI32::new(0),
            frame_tx: Mutex::new(None),
            load_notify: Notify::new(),
            done_tx,
            failure: Mutex::new(None),
        });

        driver.enable_domains().await?;
        driver.spawn_event_loop();
        *driver.state.write() = PageState::Ready;
        log::debug!("[Page] #{} ready", driver.id);
        Ok(driver)
    }

    async fn enable_domains(&self) -> PagecastResult<()> {
        let s = &self.session;
        s.send("Page.enable", json!({})).await?;
        s.send("Runtime.enable", json!({})).await?;
        s.send("Animation.enable", json!({})).await?;
        s.send("Page.setBypassCSP", json!({ "enabled": true })).await?;
        if let Some(agent) = &self.config.user_agent {
            s.send(
                "Emulation.setUserAgentOverride",
                json!({ "userAgent": agent }),
            )
            .await?;
        }
        s.send(
            "Fetch.enable",
            json!({ "patterns": [{ "urlPattern": "*" }] }),
        )
        .await?;
        s.send("Runtime.addBinding", json!({ "name": scripts::HOST_BINDING }))
            .await?;
        Ok(())
    }

    /// Stable identifier for logging.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PageState {
        *self.state.read()
    }

    /// First fatal failure recorded for this page, if any.
    pub fn take_failure(&self) -> Option<PagecastError> {
        self.failure.lock().take()
    }

    /// Registers a host action fired when virtual time reaches `at_ms`.
    pub fn add_time_action(&self, at_ms: u64, action: TimeAction) {
        self.time_actions.lock().insert(at_ms, action);
    }

    /// Audio tracks accumulated during the last capture.
    pub fn take_audios(&self) -> Vec<AudioTrack> {
        std::mem::take(&mut self.audios.lock())
    }

    /// Registers an audio track host-side (e.g. job-level background music).
    pub fn add_audio(&self, mut audio: AudioTrack) -> i32 {
        let id = self.next_audio_id.fetch_add(1, Ordering::AcqRel);
        audio.id = id;
        self.emitter.emit_page(PageEvent::AudioAdded {
            audio: audio.clone(),
        });
        self.audios.lock().push(audio);
        id
    }

    // ─────────────────────────────────────────────────────────────────
    // Capture setup
    // ─────────────────────────────────────────────────────────────────

    /// Applies output geometry and capture config ahead of navigation.
    ///
    /// Returns the receiver that will carry one encoded image per
    /// captured frame.
    pub async fn prepare(
        &self,
        options: VideoOptions,
    ) -> PagecastResult<mpsc::UnboundedReceiver<Bytes>> {
        options
            .validate()
            .map_err(PagecastError::Configuration)?;

        self.session
            .send(
                "Emulation.setDeviceMetricsOverride",
                json!({
                    "width": options.width,
                    "height": options.height,
                    "deviceScaleFactor": 1,
                    "mobile": false,
                }),
            )
            .await?;

        if options.background_opacity < 1.0 {
            self.session
                .send(
                    "Emulation.setDefaultBackgroundColorOverride",
                    json!({ "color": { "r": 0, "g": 0, "b": 0,
                            "a": (options.background_opacity * 255.0).round() as u32 } }),
                )
                .await?;
        }

        // Replace the per-navigation config script.
        if let Some(old) = self.config_script_id.lock().take() {
            let _ = self
                .session
                .send(
                    "Page.removeScriptToEvaluateOnNewDocument",
                    json!({ "identifier": old }),
                )
                .await;
        }
        let bootstrap = scripts::bootstrap_script(
            &options.capture_config(self.config.frame_acquire_timeout),
        );
        let added = self
            .session
            .send(
                "Page.addScriptToEvaluateOnNewDocument",
                json!({ "source": bootstrap, "runImmediately": false }),
            )
            .await?;
        *self.config_script_id.lock() = added["identifier"].as_str().map(str::to_string);

        let (tx, rx) = mpsc::unbounded_channel();
        *self.frame_tx.lock() = Some(tx);
        *self.options.write() = Some(options);
        let _ = self.done_tx.send(false);
        Ok(rx)
    }

    /// Navigates to the capture target and starts the page runtime.
    pub async fn goto(&self, url: &str) -> PagecastResult<()> {
        self.check_target_url(url)?;
        self.reset_navigation_state();
        *self.capture_url.lock() = Some(url.to_string());

        *self.state.write() = PageState::Capturing;
        // Register the waiter before navigating so a fast load cannot slip
        // between the command response and the wait.
        let loaded = self.load_notify.notified();
        tokio::pin!(loaded);
        loaded.as_mut().enable();
        let navigated = self.session.send("Page.navigate", json!({ "url": url })).await?;
        if let Some(error_text) = navigated["errorText"].as_str() {
            if !error_text.is_empty() {
                return Err(PagecastError::Page(format!(
                    "navigation to {url} failed: {error_text}"
                )));
            }
        }

        tokio::time::timeout(std::time::Duration::from_secs(30), loaded)
            .await
            .map_err(|_| PagecastError::Page("page load timed out".to_string()))?;
        self.inject_post_navigation().await?;
        Ok(())
    }

    /// Replaces the document with the given markup and starts the runtime.
    pub async fn set_content(&self, html: &str) -> PagecastResult<()> {
        self.reset_navigation_state();
        *self.capture_url.lock() = None;
        *self.state.write() = PageState::Capturing;

        let tree = self.session.send("Page.getFrameTree", json!({})).await?;
        let frame_id = tree["frameTree"]["frame"]["id"]
            .as_str()
            .ok_or_else(|| PagecastError::Page("frame tree has no main frame".to_string()))?
            .to_string();
        self.session
            .send(
                "Page.setDocumentContent",
                json!({ "frameId": frame_id, "html": html }),
            )
            .await?;

        self.inject_post_navigation().await?;
        Ok(())
    }

    fn check_target_url(&self, url: &str) -> PagecastResult<()> {
        if self.config.allow_unsafe_context {
            return Ok(());
        }
        let https = url.starts_with("https://");
        let loopback = url.starts_with("http://127.0.0.1")
            || url.starts_with("http://localhost")
            || url.starts_with("http://[::1]");
        if https || loopback {
            Ok(())
        } else {
            Err(PagecastError::Page(format!(
                "refusing non-HTTPS, non-loopback target {url}; enable allow_unsafe_context to override"
            )))
        }
    }

    fn reset_navigation_state(&self) {
        self.animations.clear();
        self.dom_loaded.store(false, Ordering::Release);
        self.time_actions.lock().clear();
        self.audios.lock().clear();
        self.next_audio_id.store(0, Ordering::Release);
        *self.failure.lock() = None;
    }

    /// Injects the common stylesheet, vendor libraries, and boots the
    /// capture context.
    async fn inject_post_navigation(&self) -> PagecastResult<()> {
        self.evaluate(&format!(
            "(() => {{ const s = document.createElement('style');\
             s.textContent = {}; document.head.appendChild(s); }})()",
            serde_json::to_string(scripts::COMMON_STYLE).map_err(CdpError::from)?
        ))
        .await?;

        let vendor = VendorScripts::provision(self.preprocessor.downloader()).await?;
        self.evaluate(&vendor.mp4box).await?;
        self.evaluate(&vendor.lottie).await?;

        self.evaluate("window.____pagecast.init()").await?;
        Ok(())
    }

    /// Evaluates an expression in the page, surfacing thrown exceptions.
    pub async fn evaluate(&self, expression: &str) -> PagecastResult<Value> {
        let result = self
            .session
            .send(
                "Runtime.evaluate",
                json!({ "expression": expression, "awaitPromise": true, "returnByValue": true }),
            )
            .await?;
        if let Some(details) = result.get("exceptionDetails") {
            return Err(PagecastError::Page(format!(
                "evaluate failed: {}",
                details["exception"]["description"]
                    .as_str()
                    .unwrap_or("unknown exception")
            )));
        }
        Ok(result["result"]["value"].clone())
    }

    /// Pauses the capture loop at the next tick boundary.
    pub async fn pause(&self) -> PagecastResult<()> {
        *self.state.write() = PageState::Paused;
        self.evaluate("window.____pagecast.pause()").await?;
        Ok(())
    }

    /// Resumes a paused capture loop.
    pub async fn resume(&self) -> PagecastResult<()> {
        *self.state.write() = PageState::Capturing;
        self.evaluate("window.____pagecast.resume()").await?;
        Ok(())
    }

    /// Requests the capture loop stop at the next tick boundary.
    pub async fn abort(&self) -> PagecastResult<()> {
        self.evaluate("window.____pagecast.stop()").await?;
        Ok(())
    }

    /// Waits until the capture loop reports completion or the page fails.
    pub async fn wait_completed(&self) -> PagecastResult<()> {
        let mut done = self.done_tx.subscribe();
        loop {
            if *done.borrow() {
                break;
            }
            if done.changed().await.is_err() {
                break;
            }
        }
        match self.failure.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Drops the frame sink so the consumer's channel drains and closes.
    pub fn end_capture(&self) {
        *self.frame_tx.lock() = None;
    }

    /// Returns the page to `Ready` for pool reuse.
    pub async fn reset(&self) -> PagecastResult<()> {
        self.session
            .send("Page.navigate", json!({ "url": "about:blank" }))
            .await?;
        self.reset_navigation_state();
        *self.frame_tx.lock() = None;
        *self.options.write() = None;
        *self.state.write() = PageState::Ready;
        Ok(())
    }

    /// Closes the tab.
    pub async fn close_page(&self) {
        {
            let mut state = self.state.write();
            if *state == PageState::Closed {
                return;
            }
            *state = PageState::Closed;
        }
        if let Err(e) = self.session.close().await {
            log::debug!("[Page] #{} close failed: {}", self.id, e);
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Event loop
    // ─────────────────────────────────────────────────────────────────

    fn spawn_event_loop(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let mut events = self.session.subscribe();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(driver) = weak.upgrade() else { break };
                driver.dispatch_event(event).await;
            }
        });
    }

    async fn dispatch_event(self: Arc<Self>, event: CdpEvent) {
        match event.method.as_str() {
            "Runtime.bindingCalled" => {
                if event.params["name"] == scripts::HOST_BINDING {
                    let payload = event.params["payload"].as_str().unwrap_or("{}").to_string();
                    self.handle_host_call(payload).await;
                }
            }
            "Fetch.requestPaused" => {
                let driver = self.clone();
                tokio::spawn(async move {
                    driver.handle_request_paused(event.params).await;
                });
            }
            "Runtime.consoleAPICalled" => self.handle_console(&event.params),
            "Runtime.exceptionThrown" => {
                let description = event.params["exceptionDetails"]["exception"]["description"]
                    .as_str()
                    .unwrap_or("uncaught page exception")
                    .to_string();
                self.record_page_error("page_exception", description);
            }
            "Animation.animationStarted" => self.animations.on_started(&event.params),
            "Page.loadEventFired" => self.load_notify.notify_waiters(),
            "Page.domContentEventFired" => {
                // The first fire belongs to the capture target itself; a
                // second one mid-capture means the page navigated out from
                // under the run.
                let repeat = self.dom_loaded.swap(true, Ordering::AcqRel);
                if repeat && matches!(self.state(), PageState::Capturing | PageState::Paused) {
                    self.record_page_error(
                        "page_refreshed",
                        "document replaced while capturing".to_string(),
                    );
                }
            }
            "Inspector.targetCrashed" => {
                *self.state.write() = PageState::Unavailabled;
                self.record_page_error("target_crashed", "renderer crashed".to_string());
            }
            _ => {}
        }
    }

    fn handle_console(&self, params: &Value) {
        let level = params["type"].as_str().unwrap_or("log").to_string();
        let text = params["args"]
            .as_array()
            .map(|args| {
                args.iter()
                    .filter_map(|a| a["value"].as_str().map(str::to_string))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();
        if !text.is_empty() {
            log::debug!("[Page] #{} console.{}: {}", self.id, level, text);
        }
        self.emitter.emit_page(PageEvent::Console { level, text });
    }

    fn record_page_error(&self, code: &str, message: String) {
        log::warn!("[Page] #{} error [{}]: {}", self.id, code, message);
        self.emitter.emit_page(PageEvent::Error {
            code: code.to_string(),
            message: message.clone(),
        });
        let fatal_state = matches!(self.state(), PageState::Capturing | PageState::Paused);
        if fatal_state {
            let err = PagecastError::PageThrew {
                code: code.to_string(),
                message,
            };
            if err.is_page_fatal() {
                *self.state.write() = PageState::Unavailabled;
            }
            self.failure.lock().get_or_insert(err);
            let _ = self.done_tx.send(true);
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Host-call surface
    // ─────────────────────────────────────────────────────────────────

    async fn handle_host_call(self: &Arc<Self>, payload: String) {
        let call: Value = match serde_json::from_str(&payload) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("[Page] #{} malformed host call: {}", self.id, e);
                return;
            }
        };
        let call_id = call["id"].as_i64().unwrap_or(-1);
        let method = call["method"].as_str().unwrap_or("").to_string();
        let args = call["args"].clone();

        let result = self.run_host_call(&method, args).await;
        let settle = match result {
            Ok(value) => format!("window.____settleHostCall({call_id}, {value}, null)"),
            Err(e) => format!(
                "window.____settleHostCall({call_id}, null, {})",
                serde_json::to_string(&e.to_string()).unwrap_or_else(|_| "\"error\"".into())
            ),
        };
        if let Err(e) = self
            .session
            .send("Runtime.evaluate", json!({ "expression": settle }))
            .await
        {
            log::debug!("[Page] #{} settle failed: {}", self.id, e);
        }
    }

    async fn run_host_call(self: &Arc<Self>, method: &str, args: Value) -> PagecastResult<Value> {
        match method {
            "captureFrame" => {
                let ok = self.capture_frame().await?;
                Ok(json!(ok))
            }
            "skipFrame" => {
                self.skip_frame().await?;
                Ok(Value::Null)
            }
            "screencastCompleted" => {
                *self.state.write() = PageState::Stopped;
                self.emitter.emit_page(PageEvent::Completed);
                let _ = self.done_tx.send(true);
                Ok(Value::Null)
            }
            "addAudio" => {
                let audio: AudioTrack = serde_json::from_value(args).map_err(CdpError::from)?;
                audio.validate().map_err(PagecastError::Configuration)?;
                let id = self.add_audio(audio);
                Ok(json!(id))
            }
            "updateAudioEndTime" => {
                let id = args["id"].as_i64().unwrap_or(-1) as i32;
                let end_time = args["endTime"].as_f64().unwrap_or(0.0);
                let mut audios = self.audios.lock();
                if let Some(audio) = audios.iter_mut().find(|a| a.id == id) {
                    audio.end_time = Some(end_time);
                }
                drop(audios);
                self.emitter
                    .emit_page(PageEvent::AudioEndTimeUpdated { id, end_time });
                Ok(Value::Null)
            }
            "seekCSSAnimations" => {
                let t = args["currentTime"].as_f64().unwrap_or(0.0);
                self.animations.seek(&self.session, t).await?;
                Ok(Value::Null)
            }
            "seekTimeActions" => {
                let t = args["currentTime"].as_f64().unwrap_or(0.0);
                self.seek_time_actions(t).await;
                Ok(Value::Null)
            }
            "throwError" => {
                let code = args["code"].as_str().unwrap_or("page_error").to_string();
                let message = args["message"].as_str().unwrap_or("").to_string();
                self.record_page_error(&code, message);
                Ok(Value::Null)
            }
            other => Err(PagecastError::Page(format!("unknown host call {other}"))),
        }
    }

    /// Fires registered time actions whose key has elapsed.
    async fn seek_time_actions(self: &Arc<Self>, t: f64) {
        let policy = self
            .options
            .read()
            .as_ref()
            .map(|o| o.time_action_policy)
            .unwrap_or_default();
        loop {
            let action = {
                let mut actions = self.time_actions.lock();
                let key = actions.keys().next().copied().filter(|k| (*k as f64) <= t);
                key.and_then(|k| actions.remove(&k))
            };
            let Some(action) = action else { break };
            if let Err(e) = action(self.clone()).await {
                self.record_page_error("time_action_failed", e.to_string());
            }
            if policy == TimeActionPolicy::SmallestElapsed {
                break;
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Frame production
    // ─────────────────────────────────────────────────────────────────

    /// Produces one composited frame and forwards its bytes to the sink.
    ///
    /// Returns `false` (and marks the page unavailable) when the renderer
    /// stalls past the configured deadline.
    async fn capture_frame(&self) -> PagecastResult<bool> {
        let (format, quality) = self.frame_format();
        let result = if self.config.compatible_render_mode {
            let mut params = json!({ "format": format.as_str(), "optimizeForSpeed": true });
            if format == FrameFormat::Jpeg {
                params["quality"] = json!(quality);
            }
            self.session.send("Page.captureScreenshot", params).await
        } else {
            let mut screenshot = json!({ "format": format.as_str() });
            if format == FrameFormat::Jpeg {
                screenshot["quality"] = json!(quality);
            }
            self.session
                .send_with_timeout(
                    "HeadlessExperimental.beginFrame",
                    json!({ "screenshot": screenshot }),
                    self.config.begin_frame_timeout,
                )
                .await
        };

        let value = match result {
            Ok(value) => value,
            Err(CdpError::Timeout(method)) => {
                *self.state.write() = PageState::Unavailabled;
                let err = PagecastError::RendererStall(format!(
                    "{method} exceeded {:?}",
                    self.config.begin_frame_timeout
                ));
                self.failure.lock().get_or_insert(err);
                let _ = self.done_tx.send(true);
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let data = value["screenshotData"]
            .as_str()
            .or_else(|| value["data"].as_str());
        match data {
            Some(b64) => {
                let bytes = BASE64
                    .decode(b64)
                    .map_err(|e| PagecastError::Page(format!("bad screenshot payload: {e}")))?;
                if let Some(tx) = self.frame_tx.lock().as_ref() {
                    let _ = tx.send(Bytes::from(bytes));
                }
            }
            // A begin-frame can legitimately composite nothing; the tick
            // still counts.
            None => log::trace!("[Page] #{} empty frame", self.id),
        }
        Ok(true)
    }

    /// Advances rendering one frame without emitting bytes.
    async fn skip_frame(&self) -> PagecastResult<()> {
        if self.config.compatible_render_mode {
            return Ok(());
        }
        self.session
            .send_with_timeout(
                "HeadlessExperimental.beginFrame",
                json!({}),
                self.config.begin_frame_timeout,
            )
            .await?;
        Ok(())
    }

    fn frame_format(&self) -> (FrameFormat, u32) {
        let options = self.options.read();
        match options.as_ref() {
            Some(opts) if opts.background_opacity < 1.0 => (FrameFormat::Png, opts.frame_quality),
            Some(opts) => (opts.frame_format, opts.frame_quality),
            None => (FrameFormat::Jpeg, 80),
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Request interception
    // ─────────────────────────────────────────────────────────────────

    async fn handle_request_paused(self: Arc<Self>, params: Value) {
        let request_id = params["requestId"].as_str().unwrap_or("").to_string();
        let url = params["request"]["url"].as_str().unwrap_or("").to_string();
        let method = params["request"]["method"].as_str().unwrap_or("GET");
        let resource_type = params["resourceType"].as_str().unwrap_or("");

        let is_capture_target = self
            .capture_url
            .lock()
            .as_deref()
            .is_some_and(|target| target == url);

        let outcome = if method == "POST" && url.contains("/api/video_preprocess") {
            self.serve_preprocess(&request_id, &params).await
        } else if url.contains("/local_font/") {
            self.serve_font(&request_id, &url).await
        } else if resource_type == "Document"
            && !is_capture_target
            && matches!(self.state(), PageState::Capturing | PageState::Paused)
        {
            // User code must not swap documents mid-capture.
            self.session
                .send(
                    "Fetch.failRequest",
                    json!({ "requestId": request_id, "errorReason": "Aborted" }),
                )
                .await
                .map_err(PagecastError::from)
        } else {
            self.session
                .send("Fetch.continueRequest", json!({ "requestId": request_id }))
                .await
                .map_err(PagecastError::from)
        };

        if let Err(e) = outcome {
            log::debug!("[Page] #{} interception failed for {}: {}", self.id, url, e);
        }
    }

    async fn serve_preprocess(&self, request_id: &str, params: &Value) -> PagecastResult<Value> {
        let post_data = params["request"]["postData"].as_str().unwrap_or("{}");
        let response = async {
            let config: VideoPreprocessConfig =
                serde_json::from_str(post_data)
                    .map_err(|e| PreprocessError::Payload(e.to_string()))?;
            self.preprocessor.process(config).await
        }
        .await;

        match response {
            Ok(processed) => {
                if let Some(audio) = processed.audio {
                    self.add_audio(audio);
                }
                self.fulfill(request_id, 200, "application/octet-stream", &processed.payload)
                    .await
            }
            Err(e) => {
                log::warn!("[Page] #{} preprocess failed: {}", self.id, e);
                self.fulfill(request_id, 500, "text/plain", e.to_string().as_bytes())
                    .await
            }
        }
    }

    async fn serve_font(&self, request_id: &str, url: &str) -> PagecastResult<Value> {
        let dirs = WorkDirs::new(&self.config.work_dir);
        let relative = url
            .split("/local_font/")
            .nth(1)
            .map(|rest| rest.split(['?', '#']).next().unwrap_or(rest))
            .unwrap_or("");
        let candidate = dirs.local_font().join(relative);

        // The font cache is flat under local_font/; refuse traversal.
        let safe = !relative.is_empty() && !relative.split('/').any(|seg| seg == "..");
        let mime = match candidate.extension().and_then(|e| e.to_str()) {
            Some("woff2") => "font/woff2",
            Some("woff") => "font/woff",
            Some("otf") => "font/otf",
            _ => "font/ttf",
        };
        match (safe, tokio::fs::read(&candidate).await) {
            (true, Ok(bytes)) => {
                self.fulfill_with_headers(
                    request_id,
                    200,
                    mime,
                    &bytes,
                    &[("Cache-Control", "max-age=31536000")],
                )
                .await
            }
            _ => {
                self.session
                    .send(
                        "Fetch.fulfillRequest",
                        json!({ "requestId": request_id, "responseCode": 404,
                                "responseHeaders": [], "body": "" }),
                    )
                    .await
                    .map_err(PagecastError::from)
            }
        }
    }

    async fn fulfill(
        &self,
        request_id: &str,
        status: u16,
        content_type: &str,
        body: &[u8],
    ) -> PagecastResult<Value> {
        self.fulfill_with_headers(request_id, status, content_type, body, &[])
            .await
    }

    async fn fulfill_with_headers(
        &self,
        request_id: &str,
        status: u16,
        content_type: &str,
        body: &[u8],
        extra: &[(&str, &str)],
    ) -> PagecastResult<Value> {
        let mut headers = vec![json!({ "name": "Content-Type", "value": content_type })];
        for (name, value) in extra {
            headers.push(json!({ "name": name, "value": value }));
        }
        self.session
            .send(
                "Fetch.fulfillRequest",
                json!({
                    "requestId": request_id,
                    "responseCode": status,
                    "responseHeaders": headers,
                    "body": BASE64.encode(body),
                }),
            )
            .await
            .map_err(PagecastError::from)
    }
}

#[async_trait::async_trait]
impl PoolResource for PageDriver {
    fn is_healthy(&self) -> bool {
        matches!(self.state(), PageState::Ready)
    }

    async fn close(&self) {
        self.close_page().await;
    }
}
