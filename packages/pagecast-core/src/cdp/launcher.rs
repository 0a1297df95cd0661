//! Browser process launch and DevTools endpoint discovery.
//!
//! The browser is spawned with a flag set tuned for deterministic frame
//! production: compositor stages run to completion before draw, the frame
//! rate cap is lifted, and begin-frame control is enabled so the capture
//! loop owns frame pacing. The websocket endpoint is scraped from the
//! process's stderr banner.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use super::protocol::CdpError;
use super::CdpResult;

/// Well-known executable locations probed when none is configured.
#[cfg(target_os = "linux")]
const KNOWN_EXECUTABLES: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
];

#[cfg(target_os = "macos")]
const KNOWN_EXECUTABLES: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];

#[cfg(target_os = "windows")]
const KNOWN_EXECUTABLES: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
];

/// A spawned browser process plus its DevTools endpoint.
pub struct LaunchedBrowser {
    /// The owned child process.
    pub child: Child,
    /// Browser-level websocket endpoint (`ws://127.0.0.1:.../devtools/browser/...`).
    pub ws_url: String,
}

/// Options controlling the launch flag set.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Executable path; probed from [`default_executable`] when `None`.
    pub executable: Option<PathBuf>,
    /// Browser profile directory.
    pub user_data_dir: PathBuf,
    /// Enable GPU rasterization (ANGLE).
    pub gpu: bool,
    /// Drop the begin-frame-control flags for renderers where the surface
    /// is unreliable.
    pub compatible_render_mode: bool,
    /// Run headful with devtools open.
    pub debug: bool,
    /// Deadline for process start plus endpoint discovery.
    pub launch_timeout: Duration,
}

/// Probes well-known install locations for a usable executable.
pub fn default_executable() -> Option<PathBuf> {
    KNOWN_EXECUTABLES
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .map(Path::to_path_buf)
}

/// Builds the launch argument list for the given options.
///
/// Kept separate from the spawn so the flag set is testable.
pub(crate) fn launch_args(opts: &LaunchOptions) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--remote-debugging-port=0".into(),
        format!("--user-data-dir={}", opts.user_data_dir.display()),
        "--no-sandbox".into(),
        "--no-first-run".into(),
        "--no-default-browser-check".into(),
        "--disable-infobars".into(),
        "--hide-scrollbars".into(),
        "--mute-audio".into(),
        // Animation determinism: everything runs on the compositor's
        // main sequence, nothing is throttled or raced.
        "--disable-threaded-animation".into(),
        "--disable-threaded-scrolling".into(),
        "--deterministic-mode".into(),
        "--run-all-compositor-stages-before-draw".into(),
        "--disable-frame-rate-limit".into(),
        "--disable-checker-imaging".into(),
        "--disable-image-animation-resync".into(),
        "--disable-new-content-rendering-timeout".into(),
        "--disable-features=PaintHolding,RendererCodeIntegrity".into(),
        "--disable-partial-raster".into(),
        "--disable-skia-runtime-opts".into(),
        "--disable-background-networking".into(),
        "--disable-background-timer-throttling".into(),
        "--disable-backgrounding-occluded-windows".into(),
        "--disable-renderer-backgrounding".into(),
        "--disable-ipc-flooding-protection".into(),
        "--disable-breakpad".into(),
        "--disable-component-update".into(),
        "--disable-sync".into(),
        "--disable-translate".into(),
        "--disable-popup-blocking".into(),
        "--disable-hang-monitor".into(),
        "--disable-prompt-on-repost".into(),
        "--disable-domain-reliability".into(),
        "--disable-dev-shm-usage".into(),
        "--allow-running-insecure-content".into(),
        "--autoplay-policy=no-user-gesture-required".into(),
        "--font-render-hinting=none".into(),
    ];

    // One renderer process keeps begin-frame sequencing trivial on Linux;
    // Windows renderers misbehave single-process, so fall back to
    // process-per-tab there.
    if cfg!(target_os = "windows") {
        args.push("--process-per-tab".into());
    } else {
        args.push("--single-process".into());
    }

    if !opts.compatible_render_mode {
        args.push("--enable-begin-frame-control".into());
        args.push("--enable-surface-synchronization".into());
    }

    if opts.gpu {
        args.push("--enable-gpu-rasterization".into());
        args.push("--enable-unsafe-webgpu".into());
        args.push("--use-angle".into());
    } else {
        args.push("--disable-gpu".into());
    }

    if opts.debug {
        args.push("--auto-open-devtools-for-tabs".into());
    } else {
        args.push("--headless=new".into());
    }

    args.push("about:blank".into());
    args
}

/// Spawns the browser and waits for the DevTools banner on stderr.
pub async fn launch(opts: &LaunchOptions) -> CdpResult<LaunchedBrowser> {
    let executable = opts
        .executable
        .clone()
        .or_else(default_executable)
        .ok_or_else(|| {
            CdpError::Connect("no browser executable configured or discovered".to_string())
        })?;

    log::info!("[Launcher] Spawning {}", executable.display());

    let mut child = Command::new(&executable)
        .args(launch_args(opts))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| CdpError::Connect(format!("spawn {} failed: {e}", executable.display())))?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| CdpError::Connect("browser stderr unavailable".to_string()))?;

    let ws_url = tokio::time::timeout(opts.launch_timeout, scrape_ws_url(stderr))
        .await
        .map_err(|_| {
            CdpError::Timeout(format!(
                "browser did not report a DevTools endpoint within {:?}",
                opts.launch_timeout
            ))
        })??;

    log::debug!("[Launcher] DevTools endpoint: {}", ws_url);
    Ok(LaunchedBrowser { child, ws_url })
}

/// Reads stderr lines until the `DevTools listening on ws://` banner.
async fn scrape_ws_url(stderr: tokio::process::ChildStderr) -> CdpResult<String> {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(url) = parse_devtools_banner(&line) {
            // Keep draining stderr in the background so the browser never
            // blocks on a full pipe.
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    log::trace!("[Browser] {}", line);
                }
            });
            return Ok(url);
        }
        log::trace!("[Browser] {}", line);
    }
    Err(CdpError::Connect(
        "browser exited before reporting a DevTools endpoint".to_string(),
    ))
}

/// Extracts the websocket URL from a stderr banner line.
fn parse_devtools_banner(line: &str) -> Option<String> {
    let rest = line.strip_prefix("DevTools listening on ")?;
    rest.starts_with("ws://").then(|| rest.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> LaunchOptions {
        LaunchOptions {
            executable: None,
            user_data_dir: PathBuf::from("tmp/browser"),
            gpu: true,
            compatible_render_mode: false,
            debug: false,
            launch_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn banner_parses_only_devtools_lines() {
        assert_eq!(
            parse_devtools_banner("DevTools listening on ws://127.0.0.1:9222/devtools/browser/x"),
            Some("ws://127.0.0.1:9222/devtools/browser/x".to_string())
        );
        assert_eq!(parse_devtools_banner("[WARNING] something else"), None);
        assert_eq!(parse_devtools_banner("DevTools listening on http://x"), None);
    }

    #[test]
    fn begin_frame_flags_dropped_in_compatible_mode() {
        let normal = launch_args(&options());
        assert!(normal.iter().any(|a| a == "--enable-begin-frame-control"));

        let mut compat = options();
        compat.compatible_render_mode = true;
        let args = launch_args(&compat);
        assert!(!args.iter().any(|a| a == "--enable-begin-frame-control"));
    }

    #[test]
    fn gpu_toggle_switches_flags() {
        let mut opts = options();
        opts.gpu = false;
        let args = launch_args(&opts);
        assert!(args.iter().any(|a| a == "--disable-gpu"));
        assert!(!args.iter().any(|a| a == "--use-angle"));
    }

    #[test]
    fn headless_unless_debug() {
        let args = launch_args(&options());
        assert!(args.iter().any(|a| a == "--headless=new"));

        let mut opts = options();
        opts.debug = true;
        let args = launch_args(&opts);
        assert!(!args.iter().any(|a| a == "--headless=new"));
    }
}
