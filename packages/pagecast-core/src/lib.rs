//! Pagecast Core - deterministic web page to video rendering.
//!
//! This crate renders web pages into offline video files by driving a
//! headless browser over the DevTools protocol. The page's clock is
//! virtualized by an injected runtime, frames are produced on demand
//! through begin-frame control, and the captured frame stream is piped
//! into an external encoder together with preprocessed audio tracks.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`cdp`]: DevTools protocol transport (launcher, connection, sessions)
//! - [`browser`]: Browser process driver and its inner page pool
//! - [`page`]: Per-tab driver - injection, interception, frame capture
//! - [`pool`]: Generic bounded pool and the two-tier browser/page pool
//! - [`preprocess`]: Media download cache, transcodes, payload packing
//! - [`encode`]: Frame encoder and audio mixer subprocess drivers
//! - [`synth`]: Scene and multi-scene synthesis with transitions
//! - [`events`]: Event system for render observation
//! - [`error`]: Centralized error types
//!
//! The in-page half of the system (clock shim, media adapter, capture
//! loop) lives in `assets/*.js` and is injected by the page driver at
//! document start.
//!
//! # Example
//!
//! ```ignore
//! let config = Arc::new(RenderConfig::default());
//! let preprocessor = Preprocessor::new(&config);
//! let emitter: Arc<dyn EventEmitter> = Arc::new(LoggingEventEmitter);
//! let pool = PagePool::new(config.clone(), PoolConfig::default(),
//!     preprocessor.clone(), emitter.clone())?;
//! let synthesizer = Synthesizer::new(config, pool, preprocessor, emitter);
//!
//! let options = VideoOptions::new("out.mp4".into(), 1280, 720, 30.0, 10_000.0);
//! synthesizer.render(Scene {
//!     source: SceneSource::Url("https://example.com/anim.html".into()),
//!     options,
//!     transition: None,
//! }).await?;
//! ```

#![warn(clippy::all)]

pub mod browser;
pub mod cdp;
pub mod config;
pub mod encode;
pub mod error;
pub mod events;
pub mod media;
pub mod page;
pub mod paths;
pub mod pool;
pub mod preprocess;
pub mod synth;

// Re-export commonly used types at the crate root
pub use browser::{BrowserDriver, BrowserState};
pub use config::{
    HardwareAcceleration, PoolConfig, RenderConfig, TimeActionPolicy, VideoOptions,
};
pub use encode::codec::{
    AudioEncoderKind, FrameFormat, OutputFormat, PixelFormat, VideoEncoderKind,
};
pub use encode::{AudioMixer, EncodeError, FrameEncoder};
pub use error::{ErrorCode, PagecastError, PagecastResult};
pub use events::{
    BroadcastEmitter, EventEmitter, LoggingEventEmitter, NoopEventEmitter, PageEvent, RenderEvent,
    SynthEvent,
};
pub use media::AudioTrack;
pub use page::{PageDriver, PageState};
pub use paths::WorkDirs;
pub use pool::{PageLease, PagePool, PoolError};
pub use preprocess::{Preprocessor, VideoPreprocessConfig};
pub use synth::{Scene, SceneSource, Synthesizer, Transition, TransitionKind, VideoChunk};
