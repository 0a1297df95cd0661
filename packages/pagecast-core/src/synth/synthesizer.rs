//! Render orchestration.
//!
//! The synthesizer ties the subsystems together: it leases a page from
//! the pool, drives a capture, streams the frames into an encoder, then
//! runs the audio mixing pass. Multi-scene jobs render each scene into
//! an MPEG-TS chunk, splice the chunks (with transitions where
//! configured), and mix the offset audio set once over the composite.
//!
//! Weighting: frame production across all chunks is 95% of reported
//! progress, the splice-and-mix tail is the remaining 5%.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::process::Command;

use crate::config::{RenderConfig, VideoOptions};
use crate::encode::codec::{CodecFamily, OutputFormat};
use crate::encode::video::default_bitrate_kbps;
use crate::encode::{AudioMixer, EncodeError, FrameEncoder};
use crate::error::{PagecastError, PagecastResult};
use crate::events::{EventEmitter, SynthEvent};
use crate::media::AudioTrack;
use crate::page::PageDriver;
use crate::paths::WorkDirs;
use crate::pool::PagePool;
use crate::preprocess::Preprocessor;

use super::chunk::{
    build_splice_args, chunk_offsets_ms, composite_duration_ms, validate_chunks, VideoChunk,
};
use super::transition::Transition;

/// What a scene renders.
#[derive(Debug, Clone)]
pub enum SceneSource {
    /// Navigate to a URL.
    Url(String),
    /// Replace the blank document with markup.
    Html(String),
}

/// One scene of a render job.
#[derive(Debug, Clone)]
pub struct Scene {
    /// Page to capture.
    pub source: SceneSource,
    /// Output options (geometry, timing, encoders).
    pub options: VideoOptions,
    /// Transition into the following scene (multi-scene jobs only).
    pub transition: Option<Transition>,
}

/// Share of progress attributed to frame production.
const CAPTURE_PROGRESS_SPAN: f64 = 95.0;

/// Orchestrates captures into finished video files.
pub struct Synthesizer {
    config: Arc<RenderConfig>,
    pool: Arc<PagePool>,
    preprocessor: Arc<Preprocessor>,
    emitter: Arc<dyn EventEmitter>,
}

impl Synthesizer {
    /// Builds a synthesizer over an existing pool.
    pub fn new(
        config: Arc<RenderConfig>,
        pool: Arc<PagePool>,
        preprocessor: Arc<Preprocessor>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            config,
            pool,
            preprocessor,
            emitter,
        }
    }

    /// Renders a single scene to its configured output path.
    pub async fn render(&self, scene: Scene) -> PagecastResult<PathBuf> {
        let result = self.render_inner(&scene).await;
        match &result {
            Ok(path) => self.emitter.emit_synth(SynthEvent::Completed {
                path: path.display().to_string(),
            }),
            // Intermediates are deliberately left in place for inspection.
            Err(e) => self.emitter.emit_synth(SynthEvent::Error {
                message: e.to_string(),
            }),
        }
        result
    }

    async fn render_inner(&self, scene: &Scene) -> PagecastResult<PathBuf> {
        scene
            .options
            .validate()
            .map_err(PagecastError::Configuration)?;
        WorkDirs::new(&self.config.work_dir).ensure().await.map_err(|e| {
            PagecastError::Internal(format!("work tree unavailable: {e}"))
        })?;

        let output = scene.options.output_path.clone();
        let total_frames = scene.options.total_frames();
        let frames_done = Arc::new(AtomicU64::new(0));

        let audios = self
            .capture_scene(scene, &output, false, frames_done, total_frames)
            .await?;

        self.finish_audio(&output, audios, &scene.options, scene.options.duration_ms)
            .await?;
        self.emitter.emit_synth(SynthEvent::Progress { percent: 100.0 });
        Ok(output)
    }

    /// Renders an ordered scene list into one composite at `output`.
    pub async fn render_multi(
        &self,
        scenes: Vec<Scene>,
        output: PathBuf,
    ) -> PagecastResult<PathBuf> {
        let result = self.render_multi_inner(scenes, output).await;
        match &result {
            Ok(path) => self.emitter.emit_synth(SynthEvent::Completed {
                path: path.display().to_string(),
            }),
            Err(e) => self.emitter.emit_synth(SynthEvent::Error {
                message: e.to_string(),
            }),
        }
        result
    }

    async fn render_multi_inner(
        &self,
        scenes: Vec<Scene>,
        output: PathBuf,
    ) -> PagecastResult<PathBuf> {
        if scenes.is_empty() {
            return Err(PagecastError::Configuration(
                "no scenes to render".to_string(),
            ));
        }
        for scene in &scenes {
            scene
                .options
                .validate()
                .map_err(PagecastError::Configuration)?;
        }
        let dirs = WorkDirs::new(&self.config.work_dir);
        dirs.ensure().await.map_err(|e| {
            PagecastError::Internal(format!("work tree unavailable: {e}"))
        })?;

        // Chunk records exist before any rendering so sequence errors
        // (geometry drift, overlong transitions) surface immediately.
        let mut chunks: Vec<VideoChunk> = scenes
            .iter()
            .enumerate()
            .map(|(i, scene)| {
                VideoChunk::from_options(
                    dirs.synthesizer().join(format!("chunk_{i}.ts")),
                    &scene.options,
                    scene.transition,
                )
            })
            .collect();
        validate_chunks(&chunks)?;

        let offsets = chunk_offsets_ms(&chunks);
        let total_frames: u64 = scenes.iter().map(|s| s.options.total_frames()).sum();
        let frames_done = Arc::new(AtomicU64::new(0));

        for (i, scene) in scenes.iter().enumerate() {
            self.emitter.emit_synth(SynthEvent::ChunkStarted { index: i });

            // The composite owns the cover; chunks render bare.
            let mut chunk_scene = scene.clone();
            chunk_scene.options.attach_cover_path = None;

            let chunk_path = chunks[i].path.clone();
            let audios = self
                .capture_scene(&chunk_scene, &chunk_path, true, frames_done.clone(), total_frames)
                .await?;
            chunks[i].audios = audios
                .into_iter()
                .map(|a| a.offset_by(offsets[i]))
                .collect();

            self.emitter.emit_synth(SynthEvent::ChunkFinished { index: i });
        }

        // Splice the intermediates into a video-only composite.
        let first = &scenes[0].options;
        let composite = dirs
            .synthesizer()
            .join(format!("composite.{}", first.format.as_str()));
        let splice_args = build_splice_args(&chunks, &splice_encoder_args(first), &composite)?;
        self.run_ffmpeg(&splice_args).await?;

        let covered = match &first.attach_cover_path {
            Some(cover) => {
                let path = dirs
                    .synthesizer()
                    .join(format!("composite_cover.{}", first.format.as_str()));
                self.overlay_cover(&composite, cover, first, &path).await?;
                path
            }
            None => composite,
        };

        let duration = composite_duration_ms(&chunks);
        tokio::fs::copy(&covered, &output).await.map_err(|e| {
            PagecastError::Internal(format!("composite copy failed: {e}"))
        })?;
        let audios: Vec<AudioTrack> = chunks.into_iter().flat_map(|c| c.audios).collect();
        self.finish_audio(&output, audios, first, duration).await?;

        self.emitter.emit_synth(SynthEvent::Progress { percent: 100.0 });
        Ok(output)
    }

    /// Leases a page, captures one scene, and streams its frames into an
    /// encoder writing `output`.
    async fn capture_scene(
        &self,
        scene: &Scene,
        output: &Path,
        chunked: bool,
        frames_done: Arc<AtomicU64>,
        total_frames: u64,
    ) -> PagecastResult<Vec<AudioTrack>> {
        let lease = self.pool.acquire().await?;
        let result = self
            .capture_on_page(&lease.page, scene, output, chunked, frames_done, total_frames)
            .await;
        self.pool.release(lease).await;
        result
    }

    async fn capture_on_page(
        &self,
        page: &Arc<PageDriver>,
        scene: &Scene,
        output: &Path,
        chunked: bool,
        frames_done: Arc<AtomicU64>,
        total_frames: u64,
    ) -> PagecastResult<Vec<AudioTrack>> {
        let mut rx = page.prepare(scene.options.clone()).await?;
        let encoder =
            FrameEncoder::spawn(&self.config.ffmpeg_path, &scene.options, output, chunked)?;

        let emitter = self.emitter.clone();
        let pump = tokio::spawn(async move {
            let mut encoder = encoder;
            while let Some(frame) = rx.recv().await {
                encoder.write_frame(frame).await?;
                let done = frames_done.fetch_add(1, Ordering::AcqRel) + 1;
                if total_frames > 0 {
                    let percent =
                        (done as f64 / total_frames as f64) * CAPTURE_PROGRESS_SPAN;
                    emitter.emit_synth(SynthEvent::Progress {
                        percent: percent.min(CAPTURE_PROGRESS_SPAN),
                    });
                }
            }
            Ok::<FrameEncoder, EncodeError>(encoder)
        });

        let navigation = match &scene.source {
            SceneSource::Url(url) => page.goto(url).await,
            SceneSource::Html(html) => page.set_content(html).await,
        };
        let outcome = match navigation {
            Ok(()) => page.wait_completed().await,
            Err(e) => Err(e),
        };
        page.end_capture();

        let encoder = pump
            .await
            .map_err(|e| PagecastError::Internal(format!("frame pump died: {e}")))?;

        match (outcome, encoder) {
            (Ok(()), Ok(encoder)) => {
                let frames = encoder.finish().await?;
                log::info!(
                    "[Synth] Scene captured: {} frames -> {}",
                    frames,
                    output.display()
                );
                Ok(page.take_audios())
            }
            (Err(e), Ok(encoder)) => {
                encoder.abort().await;
                Err(e)
            }
            (Ok(()), Err(e)) => Err(e.into()),
            (Err(page_err), Err(encode_err)) => {
                log::warn!("[Synth] Encoder also failed: {}", encode_err);
                Err(page_err)
            }
        }
    }

    /// Resolves audio sources to local files and mixes them over the
    /// video, replacing it in place. Silently succeeds with no tracks.
    async fn finish_audio(
        &self,
        video_path: &Path,
        audios: Vec<AudioTrack>,
        options: &VideoOptions,
        duration_ms: f64,
    ) -> PagecastResult<()> {
        let mut tracks = Vec::with_capacity(audios.len());
        for mut audio in audios {
            if audio.path.is_none() {
                let Some(url) = audio.url.clone() else { continue };
                match self
                    .preprocessor
                    .downloader()
                    .fetch_with_retries(&url, audio.ignore_cache, audio.retry_fetchs)
                    .await?
                {
                    Some(path) => audio.path = Some(path),
                    None => {
                        log::warn!("[Synth] Audio source {} unavailable, skipping", url);
                        continue;
                    }
                }
            }
            audio.clamp_end(duration_ms);
            tracks.push(audio);
        }
        if tracks.is_empty() {
            return Ok(());
        }

        let mixed = video_path.with_extension(format!("mix.{}", options.format.as_str()));
        let mixer = AudioMixer::new(&self.config.ffmpeg_path);
        mixer
            .mix(
                video_path,
                &tracks,
                options.audio_encoder,
                options.audio_bitrate.as_deref(),
                options.video_volume,
                duration_ms,
                &mixed,
            )
            .await?;
        tokio::fs::rename(&mixed, video_path)
            .await
            .map_err(|e| PagecastError::Internal(format!("mix swap failed: {e}")))?;
        log::info!("[Synth] Mixed {} audio track(s)", tracks.len());
        Ok(())
    }

    /// Overlays the cover image onto a finished composite.
    async fn overlay_cover(
        &self,
        video_in: &Path,
        cover: &Path,
        options: &VideoOptions,
        output: &Path,
    ) -> PagecastResult<()> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-i".into(),
            video_in.display().to_string(),
            "-i".into(),
            cover.display().to_string(),
            "-filter_complex".into(),
            format!(
                "[1:v]scale={}:{}[cover];[0:v][cover]overlay=0:0:repeatlast=0[v]",
                options.width, options.height
            ),
            "-map".into(),
            "[v]".into(),
        ];
        args.extend(splice_encoder_args(options));
        args.push(output.display().to_string());
        self.run_ffmpeg(&args).await
    }

    async fn run_ffmpeg(&self, args: &[String]) -> PagecastResult<()> {
        log::debug!("[Synth] {} {}", self.config.ffmpeg_path.display(), args.join(" "));
        let result = Command::new(&self.config.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| EncodeError::Spawn(format!("{}: {e}", self.config.ffmpeg_path.display())))
            .map_err(PagecastError::from)?;
        if !result.status.success() {
            return Err(EncodeError::Exit {
                code: result.status.code(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Encoder argument tail shared by the splice and cover passes.
fn splice_encoder_args(options: &VideoOptions) -> Vec<String> {
    let mut args = vec![
        "-c:v".to_string(),
        options.video_encoder.as_str().to_string(),
        "-b:v".to_string(),
        options.video_bitrate.clone().unwrap_or_else(|| {
            format!(
                "{}k",
                default_bitrate_kbps(options.width, options.height, options.quality)
            )
        }),
        "-pix_fmt".to_string(),
        options.pixel_format.as_str().to_string(),
    ];
    if matches!(
        options.video_encoder.family(),
        CodecFamily::H264 | CodecFamily::H265
    ) {
        args.extend(["-profile:v".into(), "main".into()]);
        args.extend(["-preset".into(), "medium".into()]);
    }
    if options.format == OutputFormat::Mp4 {
        args.extend(["-movflags".into(), "+faststart".into()]);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::codec::VideoEncoderKind;

    #[test]
    fn splice_encoder_args_follow_container() {
        let mut options =
            VideoOptions::new(PathBuf::from("out.mp4"), 1280, 720, 30.0, 5000.0);
        let args = splice_encoder_args(&options).join(" ");
        assert!(args.contains("-c:v libx264"));
        assert!(args.contains("-movflags +faststart"));
        assert!(args.contains("-profile:v main"));

        options.format = OutputFormat::Webm;
        options.video_encoder = VideoEncoderKind::LibvpxVp9;
        let args = splice_encoder_args(&options).join(" ");
        assert!(args.contains("-c:v libvpx-vp9"));
        assert!(!args.contains("faststart"));
        assert!(!args.contains("-preset"));
    }
}
