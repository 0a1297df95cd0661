//! Embedded page scripts and vendor library provisioning.
//!
//! The capture runtime is two JavaScript assets compiled into the binary:
//! the clock shim plus capture loop, and the media adapter. Both read
//! their configuration from a JSON block the driver prepends per
//! navigation. Vendor decode libraries (MP4 demuxer, Lottie renderer)
//! are fetched once into the content-addressed cache and injected under
//! reserved global names so page code cannot observe them.

use crate::preprocess::Downloader;
use crate::preprocess::PreprocessError;

/// Clock shim and capture loop, injected at document start.
pub const CAPTURE_SCRIPT: &str = include_str!("../../assets/capture.js");

/// Media adapter (video/image/svg/lottie conversion), injected at
/// document start after the capture script.
pub const ADAPTER_SCRIPT: &str = include_str!("../../assets/adapter.js");

/// Stylesheet injected after navigation (capture-helper styling, media
/// element normalization).
pub const COMMON_STYLE: &str = include_str!("../../assets/common.css");

/// Pinned MP4 demuxer build, exposed in-page as `____MP4Box`.
pub const MP4BOX_URL: &str = "https://cdn.jsdelivr.net/npm/mp4box@0.5.2/dist/mp4box.all.min.js";

/// Pinned Lottie renderer build, exposed in-page as `____lottie`.
pub const LOTTIE_URL: &str =
    "https://cdn.jsdelivr.net/npm/lottie-web@5.12.2/build/player/lottie.min.js";

/// Name of the DevTools binding the page uses to reach the host.
pub const HOST_BINDING: &str = "____dispatchHostCall";

/// Builds the document-start bootstrap: config block, then the capture
/// runtime, then the adapter.
pub fn bootstrap_script(capture_config: &serde_json::Value) -> String {
    format!(
        "window.____captureConfig = {};\n{}\n{}",
        capture_config, CAPTURE_SCRIPT, ADAPTER_SCRIPT
    )
}

/// Wraps vendor library source so it lands on a reserved global instead
/// of its published name.
///
/// The library executes inside a function scope whose `window`/`self`
/// shadow object captures the exports; page code never sees the real
/// global.
pub fn rename_vendor_global(source: &str, published: &str, reserved: &str) -> String {
    format!(
        "(() => {{\n\
         const sandbox = Object.create(window);\n\
         (function(window, self, globalThis) {{\n{source}\n}}).call(sandbox, sandbox, sandbox, sandbox);\n\
         window.{reserved} = sandbox.{published};\n\
         }})();"
    )
}

/// Vendor scripts resolved to local source text.
pub struct VendorScripts {
    /// MP4 demuxer source, renamed onto `____MP4Box`.
    pub mp4box: String,
    /// Lottie renderer source, renamed onto `____lottie`.
    pub lottie: String,
}

impl VendorScripts {
    /// Fetches (or re-reads from cache) both vendor libraries.
    pub async fn provision(downloader: &Downloader) -> Result<Self, PreprocessError> {
        let mp4box_path = downloader
            .fetch_any(MP4BOX_URL, false)
            .await?
            .ok_or_else(|| PreprocessError::Download("mp4box source unavailable".to_string()))?;
        let lottie_path = downloader
            .fetch_any(LOTTIE_URL, false)
            .await?
            .ok_or_else(|| PreprocessError::Download("lottie source unavailable".to_string()))?;

        let mp4box = tokio::fs::read_to_string(&mp4box_path).await?;
        let lottie = tokio::fs::read_to_string(&lottie_path).await?;

        Ok(Self {
            mp4box: rename_vendor_global(&mp4box, "MP4Box", "____MP4Box"),
            lottie: rename_vendor_global(&lottie, "lottie", "____lottie"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_embeds_config_before_runtime() {
        let config = serde_json::json!({ "fps": 30, "frameCount": 300 });
        let script = bootstrap_script(&config);
        let config_pos = script.find("____captureConfig").unwrap();
        let runtime_pos = script.find("____pagecast").unwrap();
        assert!(config_pos < runtime_pos);
        assert!(script.contains("\"fps\":30"));
    }

    #[test]
    fn vendor_rename_hides_published_global() {
        let wrapped = rename_vendor_global("window.MP4Box = {};", "MP4Box", "____MP4Box");
        assert!(wrapped.contains("window.____MP4Box = sandbox.MP4Box"));
        assert!(wrapped.contains("Object.create(window)"));
    }
}
