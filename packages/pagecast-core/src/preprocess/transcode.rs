//! Media probing and transcoding through ffmpeg/ffprobe subprocesses.
//!
//! The page decoder only accepts MP4-packed H.264/H.265, so WebM sources
//! are re-encoded, transparent sources get their alpha plane extracted
//! into a parallel mask track, and unmuted sources have their audio
//! demuxed to MP3 for the host-side mixing pass.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::process::Command;
use tokio::sync::Semaphore;

use super::PreprocessError;

/// Probed stream facts used by the preprocess decisions.
#[derive(Debug, Clone, Default)]
pub struct MediaProbe {
    /// Source carries an alpha plane (`alpha_mode` tag > 0 or a pixel
    /// format with an alpha channel).
    pub has_alpha: bool,
    /// Source carries at least one audio stream.
    pub has_audio: bool,
    /// Container is WebM/Matroska.
    pub is_webm: bool,
    /// Source duration in milliseconds, when the container reports one.
    pub duration_ms: Option<f64>,
}

/// Bounded ffmpeg/ffprobe runner.
pub struct Transcoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    slots: Arc<Semaphore>,
    demux_timeout: Duration,
}

impl Transcoder {
    /// Creates a transcoder bounded to `slots` concurrent subprocesses.
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf, slots: usize, demux_timeout: Duration) -> Self {
        Self {
            ffmpeg,
            ffprobe,
            slots: Arc::new(Semaphore::new(slots.max(1))),
            demux_timeout,
        }
    }

    /// Probes container and stream facts.
    pub async fn probe(&self, input: &Path) -> Result<MediaProbe, PreprocessError> {
        let _slot = self.acquire_slot().await?;
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(input)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| PreprocessError::Probe(format!("ffprobe spawn failed: {e}")))?;
        if !output.status.success() {
            return Err(PreprocessError::Probe(format!(
                "ffprobe failed for {}: {}",
                input.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let report: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| PreprocessError::Probe(format!("ffprobe output unparsable: {e}")))?;
        Ok(parse_probe(&report))
    }

    /// Re-encodes the primary track to faststart H.264 MP4.
    pub async fn transcode_h264(&self, input: &Path) -> Result<PathBuf, PreprocessError> {
        let output = sibling(input, "_transcoded.mp4");
        if tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Ok(output);
        }
        self.run_ffmpeg(
            |cmd| {
                cmd.arg("-i")
                    .arg(input)
                    .args(["-c:v", "libx264", "-crf", "18", "-an", "-movflags", "+faststart"])
                    .arg(&output);
            },
            None,
        )
        .await?;
        Ok(output)
    }

    /// Extracts the alpha plane into a luminance-only H.264 mask track.
    pub async fn extract_alpha_mask(&self, input: &Path) -> Result<PathBuf, PreprocessError> {
        let output = sibling(input, "_mask.mp4");
        if tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Ok(output);
        }
        self.run_ffmpeg(
            |cmd| {
                cmd.arg("-i")
                    .arg(input)
                    .args([
                        "-vf",
                        "alphaextract",
                        "-c:v",
                        "libx264",
                        "-crf",
                        "18",
                        "-an",
                        "-movflags",
                        "+faststart",
                    ])
                    .arg(&output);
            },
            None,
        )
        .await?;
        Ok(output)
    }

    /// Demuxes the audio track to MP3.
    pub async fn demux_audio(&self, input: &Path) -> Result<PathBuf, PreprocessError> {
        let output = sibling(input, ".mp3");
        if tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Ok(output);
        }
        self.run_ffmpeg(
            |cmd| {
                cmd.arg("-i")
                    .arg(input)
                    .args(["-vn", "-c:a", "libmp3lame"])
                    .arg(&output);
            },
            Some(self.demux_timeout),
        )
        .await?;
        Ok(output)
    }

    /// Re-clips a track into an in-memory fragmented MP4 starting at
    /// frame zero, so the page decoder need not seek.
    pub async fn clip_to_memory(
        &self,
        input: &Path,
        seek_start_ms: Option<f64>,
        seek_end_ms: Option<f64>,
    ) -> Result<Vec<u8>, PreprocessError> {
        let _slot = self.acquire_slot().await?;
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error", "-y"]);
        if let Some(start) = seek_start_ms {
            cmd.args(["-ss", &format_seconds(start)]);
        }
        if let Some(end) = seek_end_ms {
            cmd.args(["-to", &format_seconds(end)]);
        }
        cmd.arg("-i")
            .arg(input)
            .args([
                "-c",
                "copy",
                "-an",
                "-movflags",
                "frag_keyframe+empty_moov",
                "-f",
                "mp4",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = cmd
            .output()
            .await
            .map_err(|e| PreprocessError::Transcode(format!("ffmpeg spawn failed: {e}")))?;
        if !output.status.success() {
            return Err(PreprocessError::Transcode(format!(
                "clip of {} failed: {}",
                input.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }

    async fn acquire_slot(&self) -> Result<tokio::sync::SemaphorePermit<'_>, PreprocessError> {
        self.slots
            .acquire()
            .await
            .map_err(|_| PreprocessError::Transcode("process slots closed".to_string()))
    }

    async fn run_ffmpeg(
        &self,
        configure: impl FnOnce(&mut Command),
        timeout: Option<Duration>,
    ) -> Result<(), PreprocessError> {
        let _slot = self.acquire_slot().await?;
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error", "-y"]);
        configure(&mut cmd);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let wait = async {
            cmd.output()
                .await
                .map_err(|e| PreprocessError::Transcode(format!("ffmpeg spawn failed: {e}")))
        };
        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| PreprocessError::Timeout(format!("ffmpeg exceeded {limit:?}")))??,
            None => wait.await?,
        };
        if !output.status.success() {
            return Err(PreprocessError::Transcode(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

/// Derives an output path beside the input: `clip.webm` -> `clip<suffix>`.
fn sibling(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("media");
    input.with_file_name(format!("{stem}{suffix}"))
}

/// Milliseconds to ffmpeg's fractional-seconds argument form.
fn format_seconds(ms: f64) -> String {
    format!("{:.3}", ms / 1000.0)
}

/// Extracts the facts the preprocess pipeline branches on.
fn parse_probe(report: &Value) -> MediaProbe {
    let format_name = report["format"]["format_name"].as_str().unwrap_or("");
    let is_webm = format_name.contains("webm") || format_name.contains("matroska");
    let duration_ms = report["format"]["duration"]
        .as_str()
        .and_then(|d| d.parse::<f64>().ok())
        .map(|secs| secs * 1000.0);

    let mut has_alpha = false;
    let mut has_audio = false;
    if let Some(streams) = report["streams"].as_array() {
        for stream in streams {
            match stream["codec_type"].as_str() {
                Some("video") => {
                    let alpha_mode = stream["tags"]["alpha_mode"]
                        .as_str()
                        .and_then(|m| m.parse::<i32>().ok())
                        .unwrap_or(0);
                    let pix_fmt = stream["pix_fmt"].as_str().unwrap_or("");
                    if alpha_mode > 0 || pix_fmt.starts_with("yuva") || pix_fmt.ends_with('a') {
                        has_alpha = true;
                    }
                }
                Some("audio") => has_audio = true,
                _ => {}
            }
        }
    }
    MediaProbe {
        has_alpha,
        has_audio,
        is_webm,
        duration_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn probe_detects_webm_alpha_and_audio() {
        let report = json!({
            "format": { "format_name": "matroska,webm", "duration": "4.250" },
            "streams": [
                { "codec_type": "video", "pix_fmt": "yuv420p",
                  "tags": { "alpha_mode": "1" } },
                { "codec_type": "audio" }
            ]
        });
        let probe = parse_probe(&report);
        assert!(probe.is_webm);
        assert!(probe.has_alpha);
        assert!(probe.has_audio);
        assert_eq!(probe.duration_ms, Some(4250.0));
    }

    #[test]
    fn probe_without_alpha_or_audio() {
        let report = json!({
            "format": { "format_name": "mov,mp4,m4a,3gp,3g2,mj2" },
            "streams": [ { "codec_type": "video", "pix_fmt": "yuv420p", "tags": {} } ]
        });
        let probe = parse_probe(&report);
        assert!(!probe.is_webm);
        assert!(!probe.has_alpha);
        assert!(!probe.has_audio);
        assert_eq!(probe.duration_ms, None);
    }

    #[test]
    fn alpha_pixel_format_counts_without_tag() {
        let report = json!({
            "format": { "format_name": "matroska,webm" },
            "streams": [ { "codec_type": "video", "pix_fmt": "yuva420p", "tags": {} } ]
        });
        assert!(parse_probe(&report).has_alpha);
    }

    #[test]
    fn sibling_swaps_suffix() {
        assert_eq!(
            sibling(Path::new("cache/ab12cd34.webm"), "_mask.mp4"),
            PathBuf::from("cache/ab12cd34_mask.mp4")
        );
        assert_eq!(
            sibling(Path::new("cache/ab12cd34.mp4"), ".mp3"),
            PathBuf::from("cache/ab12cd34.mp3")
        );
    }

    #[test]
    fn seconds_formatting_is_millisecond_precise() {
        assert_eq!(format_seconds(2000.0), "2.000");
        assert_eq!(format_seconds(1234.0), "1.234");
    }
}
