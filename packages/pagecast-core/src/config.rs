//! Render and pool configuration types.
//!
//! All configuration is carried by explicit structs passed into constructors.
//! There is no module-level global: the composition root builds one
//! [`RenderConfig`] and threads it through the pool, drivers, and encoders.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::encode::codec::{
    AudioEncoderKind, FrameFormat, OutputFormat, PixelFormat, VideoEncoderKind,
};

/// Global configuration for a rendering host.
///
/// Groups subprocess paths, working directories, and the timeout budget.
/// Construct once at startup and share via `Arc`.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Path to the ffmpeg binary.
    pub ffmpeg_path: PathBuf,

    /// Path to the ffprobe binary (stream metadata, alpha detection).
    pub ffprobe_path: PathBuf,

    /// Browser executable. `None` lets the launcher probe well-known
    /// install locations.
    pub browser_executable: Option<PathBuf>,

    /// Root of the working tree (`browser/`, `preprocessor/`,
    /// `synthesizer/`, `local_font/` subdirectories).
    pub work_dir: PathBuf,

    /// Enable GPU compositing in the browser.
    pub gpu: bool,

    /// Use `Page.captureScreenshot` instead of `beginFrame` screenshots.
    ///
    /// Some platforms ship renderers where begin-frame control is
    /// unreliable; compatible mode trades determinism guarantees for
    /// stability and drops the begin-frame launch flags.
    pub compatible_render_mode: bool,

    /// Permit non-HTTPS, non-loopback capture targets.
    pub allow_unsafe_context: bool,

    /// Keep the browser observable (headful, devtools) for debugging.
    pub debug: bool,

    /// Ceiling for a single `beginFrame` round-trip.
    pub begin_frame_timeout: Duration,

    /// Ceiling for browser launch and DevTools endpoint discovery.
    pub browser_launch_timeout: Duration,

    /// Ceiling for in-page decoded-frame acquisition.
    pub frame_acquire_timeout: Duration,

    /// Ceiling for a preprocessor demux/transcode pass.
    pub demux_timeout: Duration,

    /// Concurrent media downloads.
    pub num_downloads: usize,

    /// Concurrent preprocessor subprocesses.
    pub num_processes: usize,

    /// Download retry attempts for 5xx/transport failures.
    pub download_retries: u32,

    /// Delay between download retries.
    pub download_retry_delay: Duration,

    /// User agent override applied to every page.
    pub user_agent: Option<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            browser_executable: None,
            work_dir: PathBuf::from("tmp"),
            gpu: true,
            compatible_render_mode: false,
            allow_unsafe_context: false,
            debug: false,
            begin_frame_timeout: Duration::from_secs(5),
            browser_launch_timeout: Duration::from_secs(30),
            frame_acquire_timeout: Duration::from_secs(30),
            demux_timeout: Duration::from_secs(60),
            num_downloads: 10,
            num_processes: 10,
            download_retries: 2,
            download_retry_delay: Duration::from_millis(500),
            user_agent: None,
        }
    }
}

impl RenderConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.num_downloads == 0 {
            return Err("num_downloads must be >= 1".to_string());
        }
        if self.num_processes == 0 {
            return Err("num_processes must be >= 1".to_string());
        }
        if self.begin_frame_timeout.is_zero() {
            return Err("begin_frame_timeout must be > 0".to_string());
        }
        Ok(())
    }
}

/// Bounds for the two-tier browser/page pool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Browsers kept warm.
    pub num_browser_min: usize,
    /// Browser ceiling.
    pub num_browser_max: usize,
    /// Pages kept warm per browser.
    pub num_page_min: usize,
    /// Page ceiling per browser.
    pub num_page_max: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_browser_min: 1,
            num_browser_max: 5,
            num_page_min: 1,
            num_page_max: 5,
        }
    }
}

impl PoolConfig {
    /// Validates the pool bounds.
    pub fn validate(&self) -> Result<(), String> {
        if self.num_browser_max == 0 || self.num_page_max == 0 {
            return Err("pool maximums must be >= 1".to_string());
        }
        if self.num_browser_min > self.num_browser_max {
            return Err("num_browser_min must be <= num_browser_max".to_string());
        }
        if self.num_page_min > self.num_page_max {
            return Err("num_page_min must be <= num_page_max".to_string());
        }
        Ok(())
    }
}

/// Hardware acceleration preference handed to the in-page video decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HardwareAcceleration {
    #[default]
    NoPreference,
    PreferHardware,
    PreferSoftware,
}

/// Policy for dispatching host-registered time actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeActionPolicy {
    /// Fire the single smallest elapsed key per tick.
    #[default]
    SmallestElapsed,
    /// Fire every elapsed key, in ascending order, on the tick it elapses.
    AllElapsed,
}

/// Per-render output options for one scene.
#[derive(Debug, Clone)]
pub struct VideoOptions {
    /// Final (or chunk) output file.
    pub output_path: PathBuf,
    /// Output width in pixels. Must be even.
    pub width: u32,
    /// Output height in pixels. Must be even.
    pub height: u32,
    /// Frame cadence.
    pub fps: f64,
    /// Virtual duration of the scene in milliseconds.
    pub duration_ms: f64,
    /// Virtual time at which frame emission begins. Frames before this
    /// point are rendered but skipped.
    pub start_time_ms: f64,
    /// Explicit frame count override; derived from duration and fps
    /// when `None`.
    pub frame_count: Option<u64>,
    /// Output container.
    pub format: OutputFormat,
    /// Video encoder.
    pub video_encoder: VideoEncoderKind,
    /// Audio encoder for the mixing pass.
    pub audio_encoder: AudioEncoderKind,
    /// Quality knob (0..=100) used for the default bitrate formula and
    /// screenshot quality.
    pub quality: u32,
    /// Explicit video bitrate (e.g. `"8000k"`); derived from pixel count
    /// and quality when `None`.
    pub video_bitrate: Option<String>,
    /// Explicit audio bitrate (e.g. `"320k"`).
    pub audio_bitrate: Option<String>,
    /// Output pixel format. `Yuva420p` keeps alpha on WebM.
    pub pixel_format: PixelFormat,
    /// Page background opacity (0..=1). Anything below 1 forces PNG
    /// screenshots so alpha survives capture.
    pub background_opacity: f64,
    /// Optional cover image overlaid on the output.
    pub attach_cover_path: Option<PathBuf>,
    /// Global multiplier (0..=100) applied to every audio volume.
    pub video_volume: f64,
    /// Screenshot format when the background is opaque.
    pub frame_format: FrameFormat,
    /// Screenshot quality for lossy frame formats.
    pub frame_quality: u32,
    /// Frames buffered host-side before one concatenated pipe write.
    pub parallel_write_frames: usize,
    /// Begin the capture loop without waiting for a page-side
    /// `start()` call.
    pub autostart_capture: bool,
    /// Decoder acceleration hint forwarded to the page.
    pub hardware_acceleration: HardwareAcceleration,
    /// Dispatch policy for registered time actions.
    pub time_action_policy: TimeActionPolicy,
    /// Per-call `Date.now` epsilon shim for libraries that require
    /// strictly increasing timestamps inside one tick.
    pub date_now_epsilon: bool,
}

impl VideoOptions {
    /// Creates options with defaults for the given geometry and timing.
    pub fn new(output_path: PathBuf, width: u32, height: u32, fps: f64, duration_ms: f64) -> Self {
        Self {
            output_path,
            width,
            height,
            fps,
            duration_ms,
            start_time_ms: 0.0,
            frame_count: None,
            format: OutputFormat::Mp4,
            video_encoder: VideoEncoderKind::Libx264,
            audio_encoder: AudioEncoderKind::Aac,
            quality: 80,
            video_bitrate: None,
            audio_bitrate: None,
            pixel_format: PixelFormat::Yuv420p,
            background_opacity: 1.0,
            attach_cover_path: None,
            video_volume: 100.0,
            frame_format: FrameFormat::Jpeg,
            frame_quality: 80,
            parallel_write_frames: 10,
            autostart_capture: true,
            hardware_acceleration: HardwareAcceleration::default(),
            time_action_policy: TimeActionPolicy::default(),
            date_now_epsilon: true,
        }
    }

    /// Interval of one virtual tick in milliseconds.
    pub fn frame_interval(&self) -> f64 {
        1000.0 / self.fps
    }

    /// Total frames to emit: explicit override or `floor(duration * fps / 1000)`.
    pub fn total_frames(&self) -> u64 {
        self.frame_count
            .unwrap_or_else(|| (self.duration_ms * self.fps / 1000.0).floor() as u64)
    }

    /// Validates geometry, timing, and encoder/container compatibility.
    pub fn validate(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err("output dimensions must be non-zero".to_string());
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(format!(
                "output dimensions must be even, got {}x{}",
                self.width, self.height
            ));
        }
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(format!("fps must be finite and positive, got {}", self.fps));
        }
        if !self.duration_ms.is_finite() || self.duration_ms <= 0.0 {
            return Err(format!(
                "duration must be finite and positive, got {}ms",
                self.duration_ms
            ));
        }
        if let Some(count) = self.frame_count {
            if count == 0 {
                return Err("frame_count must be >= 1".to_string());
            }
        }
        if self.quality > 100 || self.frame_quality > 100 {
            return Err("quality must be within 0..=100".to_string());
        }
        if !(0.0..=1.0).contains(&self.background_opacity) {
            return Err("background_opacity must be within 0..=1".to_string());
        }
        if !(0.0..=100.0).contains(&self.video_volume) {
            return Err("video_volume must be within 0..=100".to_string());
        }
        if self.parallel_write_frames == 0 {
            return Err("parallel_write_frames must be >= 1".to_string());
        }
        if !self.video_encoder.supports_format(self.format) {
            return Err(format!(
                "encoder {} cannot produce {} output",
                self.video_encoder.as_str(),
                self.format.as_str()
            ));
        }
        if self.pixel_format == PixelFormat::Yuva420p && self.format != OutputFormat::Webm {
            return Err("yuva420p output requires the webm container".to_string());
        }
        Ok(())
    }

    /// Builds the JSON config block injected ahead of the capture script.
    pub fn capture_config(&self, frame_acquire_timeout: Duration) -> serde_json::Value {
        serde_json::json!({
            "fps": self.fps,
            "startTime": self.start_time_ms,
            "duration": self.duration_ms,
            "frameCount": self.total_frames(),
            "autostart": self.autostart_capture,
            "videoDecoderHardwareAcceleration": self.hardware_acceleration,
            "dateNowEpsilon": self.date_now_epsilon,
            "frameAcquireTimeout": frame_acquire_timeout.as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(fps: f64, duration_ms: f64) -> VideoOptions {
        VideoOptions::new(PathBuf::from("out.mp4"), 1280, 720, fps, duration_ms)
    }

    #[test]
    fn frame_count_derives_from_duration_and_fps() {
        assert_eq!(options(30.0, 10_000.0).total_frames(), 300);
        assert_eq!(options(30.0, 10_001.0).total_frames(), 300);
        assert_eq!(options(60.0, 1000.0 / 60.0).total_frames(), 1);
    }

    #[test]
    fn explicit_frame_count_wins() {
        let mut opts = options(30.0, 10_000.0);
        opts.frame_count = Some(42);
        assert_eq!(opts.total_frames(), 42);
    }

    #[test]
    fn odd_dimensions_rejected() {
        let mut opts = options(30.0, 1000.0);
        opts.width = 1279;
        assert!(opts.validate().unwrap_err().contains("even"));
    }

    #[test]
    fn non_finite_fps_rejected() {
        assert!(options(f64::NAN, 1000.0).validate().is_err());
        assert!(options(f64::INFINITY, 1000.0).validate().is_err());
        assert!(options(0.0, 1000.0).validate().is_err());
    }

    #[test]
    fn alpha_pixel_format_requires_webm() {
        let mut opts = options(30.0, 1000.0);
        opts.pixel_format = PixelFormat::Yuva420p;
        assert!(opts.validate().is_err());
        opts.format = OutputFormat::Webm;
        opts.video_encoder = VideoEncoderKind::LibvpxVp9;
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn pool_bounds_validated() {
        let mut cfg = PoolConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.num_browser_min = 10;
        assert!(cfg.validate().is_err());
        cfg.num_browser_min = 0;
        cfg.num_page_max = 0;
        assert!(cfg.validate().is_err());
    }
}
