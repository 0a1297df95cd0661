//! Image-pipe video encoding.
//!
//! Captured frames (one JPEG/PNG per tick) are streamed into an ffmpeg
//! process reading `image2pipe` on stdin. Writes are batched host-side
//! to cut pipe syscalls; backpressure is the pipe itself. The same
//! driver produces final MP4/WebM files and MPEG-TS chunk intermediates
//! (with the codec's annex-b / superframe bitstream filter applied).

use std::path::Path;
use std::process::Stdio;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};

use crate::config::VideoOptions;

use super::codec::{CodecFamily, OutputFormat};
use super::{EncodeError, EncodeResult};

/// Exit code Windows reports for access violations inside vendor
/// encoder drivers.
const STATUS_ACCESS_VIOLATION: i32 = -1073741819; // 0xC0000005 as i32

/// Stderr marker for an encoder that failed to open.
const ENCODER_OPEN_FAILURE: &str = "Error while opening encoder for output stream";

/// Computes the default bitrate (kbps) from pixel count and quality.
///
/// 2560 kbps is the anchor for a 1280x720 canvas; other geometries scale
/// linearly by pixel count, then by the quality knob.
pub(crate) fn default_bitrate_kbps(width: u32, height: u32, quality: u32) -> u64 {
    let pixels = f64::from(width) * f64::from(height);
    ((2560.0 * pixels / 921_600.0) * (f64::from(quality) / 100.0)).round() as u64
}

/// Builds the full argument list for one encoding run.
///
/// `chunked` switches the output to a bitstream-filtered MPEG-TS
/// intermediate suitable for later concat.
pub(crate) fn build_args(
    options: &VideoOptions,
    output: &Path,
    chunked: bool,
) -> EncodeResult<Vec<String>> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-f".into(),
        "image2pipe".into(),
        "-r".into(),
        format_fps(options.fps),
        "-i".into(),
        "pipe:0".into(),
    ];

    let has_cover = options.attach_cover_path.is_some();
    if let Some(cover) = &options.attach_cover_path {
        args.push("-i".into());
        args.push(cover.display().to_string());
        args.push("-filter_complex".into());
        args.push(format!(
            "[1:v]scale={}:{}[cover];[0:v][cover]overlay=0:0:repeatlast=0[v]",
            options.width, options.height
        ));
        args.push("-map".into());
        args.push("[v]".into());
    }

    args.push("-c:v".into());
    args.push(options.video_encoder.as_str().into());

    let bitrate = options
        .video_bitrate
        .clone()
        .unwrap_or_else(|| {
            format!(
                "{}k",
                default_bitrate_kbps(options.width, options.height, options.quality)
            )
        });
    args.push("-b:v".into());
    args.push(bitrate);

    if matches!(
        options.video_encoder.family(),
        CodecFamily::H264 | CodecFamily::H265
    ) {
        args.extend(["-profile:v".into(), "main".into()]);
        args.extend(["-preset".into(), "medium".into()]);
    }

    args.push("-pix_fmt".into());
    args.push(options.pixel_format.as_str().into());

    if !has_cover {
        // Without a filter graph the stream geometry still needs pinning.
        args.push("-s".into());
        args.push(format!("{}x{}", options.width, options.height));
    }

    if chunked {
        let filter = options
            .video_encoder
            .chunk_bitstream_filter()
            .ok_or_else(|| {
                EncodeError::InvalidOptions(format!(
                    "{} cannot produce chunk intermediates",
                    options.video_encoder.as_str()
                ))
            })?;
        args.extend(["-bsf:v".into(), filter.into()]);
        args.extend(["-f".into(), "mpegts".into()]);
    } else {
        match options.format {
            OutputFormat::Mp4 => {
                args.extend(["-movflags".into(), "+faststart".into()]);
                args.extend(["-f".into(), "mp4".into()]);
            }
            OutputFormat::Webm => args.extend(["-f".into(), "webm".into()]),
        }
    }

    args.push(output.display().to_string());
    Ok(args)
}

/// Renders an fps value without a trailing fraction when integral.
fn format_fps(fps: f64) -> String {
    if (fps - fps.round()).abs() < f64::EPSILON {
        format!("{}", fps.round() as u64)
    } else {
        format!("{fps}")
    }
}

/// Streaming encoder over one ffmpeg subprocess.
pub struct FrameEncoder {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_task: tokio::task::JoinHandle<String>,
    batch: Vec<Bytes>,
    batch_limit: usize,
    frames_written: u64,
}

impl FrameEncoder {
    /// Spawns the encoder for the given options.
    pub fn spawn(
        ffmpeg_path: &Path,
        options: &VideoOptions,
        output: &Path,
        chunked: bool,
    ) -> EncodeResult<Self> {
        let args = build_args(options, output, chunked)?;
        log::debug!("[Encoder] {} {}", ffmpeg_path.display(), args.join(" "));

        let mut child = Command::new(ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EncodeError::Spawn(format!("{}: {e}", ffmpeg_path.display())))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EncodeError::Spawn("encoder stdin unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EncodeError::Spawn("encoder stderr unavailable".to_string()))?;
        let stderr_task = tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut text = String::new();
            let mut reader = tokio::io::BufReader::new(stderr);
            let _ = reader.read_to_string(&mut text).await;
            text
        });

        Ok(Self {
            child,
            stdin: Some(stdin),
            stderr_task,
            batch: Vec::new(),
            batch_limit: options.parallel_write_frames.max(1),
            frames_written: 0,
        })
    }

    /// Frames accepted so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Queues one encoded image, flushing a full batch to the pipe.
    pub async fn write_frame(&mut self, frame: Bytes) -> EncodeResult<()> {
        self.batch.push(frame);
        self.frames_written += 1;
        if self.batch.len() >= self.batch_limit {
            self.flush().await?;
        }
        Ok(())
    }

    /// Writes any batched frames as one concatenated buffer.
    pub async fn flush(&mut self) -> EncodeResult<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| EncodeError::Spawn("encoder already finished".to_string()))?;
        let total: usize = self.batch.iter().map(Bytes::len).sum();
        let mut joined = Vec::with_capacity(total);
        for frame in self.batch.drain(..) {
            joined.extend_from_slice(&frame);
        }
        stdin.write_all(&joined).await?;
        Ok(())
    }

    /// Flushes, closes the pipe, and waits for the encoder to exit.
    pub async fn finish(mut self) -> EncodeResult<u64> {
        self.flush().await?;
        if let Some(mut stdin) = self.stdin.take() {
            stdin.shutdown().await?;
            drop(stdin);
        }
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| EncodeError::Spawn(format!("wait failed: {e}")))?;
        let stderr = self.stderr_task.await.unwrap_or_default();

        if status.success() {
            if !stderr.trim().is_empty() {
                log::debug!("[Encoder] stderr: {}", stderr.trim());
            }
            return Ok(self.frames_written);
        }
        Err(classify_failure(status.code(), stderr))
    }

    /// Aborts the run: asks ffmpeg to quit, then kills it.
    pub async fn abort(mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            // 'q' asks ffmpeg to finalize what it has; ignore pipe errors
            // from an already-dead process.
            let _ = stdin.write_all(b"q").await;
            let _ = stdin.shutdown().await;
        }
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
        self.stderr_task.abort();
    }
}

/// Rewrites known hardware-encoder failure patterns into a hint.
fn classify_failure(code: Option<i32>, stderr: String) -> EncodeError {
    let stderr_trimmed = stderr.trim().to_string();
    if stderr_trimmed.contains(ENCODER_OPEN_FAILURE) || code == Some(STATUS_ACCESS_VIOLATION) {
        return EncodeError::HardwareSupport(
            "the selected encoder could not start; the codec may be unsupported on this \
             device, or a hardware session limit (e.g. NVENC parallel encodes) was hit"
                .to_string(),
        );
    }
    EncodeError::Exit {
        code,
        stderr: stderr_trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VideoOptions;
    use crate::encode::codec::{PixelFormat, VideoEncoderKind};
    use std::path::PathBuf;

    fn options() -> VideoOptions {
        VideoOptions::new(PathBuf::from("out.mp4"), 1280, 720, 30.0, 10_000.0)
    }

    #[test]
    fn default_bitrate_anchors_at_720p() {
        assert_eq!(default_bitrate_kbps(1280, 720, 100), 2560);
        assert_eq!(default_bitrate_kbps(1280, 720, 50), 1280);
        // 4x the pixels, 4x the bitrate.
        assert_eq!(default_bitrate_kbps(2560, 1440, 100), 10240);
    }

    #[test]
    fn args_stream_images_at_fps() {
        let args = build_args(&options(), Path::new("out.mp4"), false).unwrap();
        let joined = args.join(" ");
        assert!(joined.contains("-f image2pipe -r 30 -i pipe:0"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-b:v 2048k"));
        assert!(joined.contains("-pix_fmt yuv420p"));
        assert!(joined.contains("-movflags +faststart"));
        assert!(joined.ends_with("out.mp4"));
    }

    #[test]
    fn h264_gets_profile_and_preset() {
        let args = build_args(&options(), Path::new("out.mp4"), false).unwrap();
        let joined = args.join(" ");
        assert!(joined.contains("-profile:v main"));
        assert!(joined.contains("-preset medium"));
    }

    #[test]
    fn chunked_output_is_bitstream_filtered_mpegts() {
        let args = build_args(&options(), Path::new("chunk_0.ts"), true).unwrap();
        let joined = args.join(" ");
        assert!(joined.contains("-bsf:v h264_mp4toannexb"));
        assert!(joined.contains("-f mpegts"));
        assert!(!joined.contains("faststart"));
    }

    #[test]
    fn vp8_cannot_chunk() {
        let mut opts = options();
        opts.format = super::OutputFormat::Webm;
        opts.video_encoder = VideoEncoderKind::Libvpx;
        opts.pixel_format = PixelFormat::Yuv420p;
        assert!(matches!(
            build_args(&opts, Path::new("chunk.ts"), true),
            Err(EncodeError::InvalidOptions(_))
        ));
    }

    #[test]
    fn cover_overlay_builds_filter_graph() {
        let mut opts = options();
        opts.attach_cover_path = Some(PathBuf::from("cover.png"));
        let args = build_args(&opts, Path::new("out.mp4"), false).unwrap();
        let joined = args.join(" ");
        assert!(joined.contains("[1:v]scale=1280:720[cover]"));
        assert!(joined.contains("overlay=0:0:repeatlast=0[v]"));
        assert!(joined.contains("-map [v]"));
        // The filter graph owns geometry; no -s pin.
        assert!(!joined.contains("-s 1280x720"));
    }

    #[test]
    fn explicit_bitrate_wins() {
        let mut opts = options();
        opts.video_bitrate = Some("8000k".into());
        let args = build_args(&opts, Path::new("out.mp4"), false).unwrap();
        assert!(args.join(" ").contains("-b:v 8000k"));
    }

    #[test]
    fn hardware_failure_is_rewritten() {
        let err = classify_failure(
            Some(1),
            format!("...{ENCODER_OPEN_FAILURE} #0:0..."),
        );
        assert!(matches!(err, EncodeError::HardwareSupport(_)));

        let err = classify_failure(Some(STATUS_ACCESS_VIOLATION), String::new());
        assert!(matches!(err, EncodeError::HardwareSupport(_)));

        let err = classify_failure(Some(1), "some other failure".to_string());
        assert!(matches!(err, EncodeError::Exit { code: Some(1), .. }));
    }

    #[test]
    fn fractional_fps_kept_verbatim() {
        assert_eq!(format_fps(30.0), "30");
        assert_eq!(format_fps(29.97), "29.97");
    }
}
