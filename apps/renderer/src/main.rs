//! Pagecast Renderer - headless page-to-video rendering.
//!
//! Thin composition root over `pagecast-core`: loads a YAML job file,
//! wires the pool and synthesizer, renders, and reports progress on the
//! log. Either a job file or a single `--url` must be given.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use pagecast_core::{
    EventEmitter, PageEvent, PagePool, PoolConfig, Preprocessor, RenderConfig, Scene, SceneSource,
    Synthesizer, SynthEvent, VideoOptions,
};

use crate::config::JobFile;

/// Pagecast Renderer - deterministic web page to video rendering.
#[derive(Parser, Debug)]
#[command(name = "pagecast-renderer")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the job file (YAML).
    #[arg(short, long, value_name = "FILE")]
    job: Option<PathBuf>,

    /// Render a single URL instead of a job file.
    #[arg(short, long, conflicts_with = "job")]
    url: Option<String>,

    /// Output path for --url mode.
    #[arg(short, long, default_value = "output.mp4")]
    output: PathBuf,

    /// Output width for --url mode.
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Output height for --url mode.
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Frame rate for --url mode.
    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    /// Duration in milliseconds for --url mode.
    #[arg(long, default_value_t = 10_000.0)]
    duration: f64,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "PAGECAST_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Working directory for caches and intermediates.
    #[arg(long, default_value = "tmp", env = "PAGECAST_WORK_DIR")]
    work_dir: PathBuf,

    /// Browser executable override.
    #[arg(long, env = "PAGECAST_BROWSER")]
    browser: Option<PathBuf>,

    /// Permit non-HTTPS, non-loopback targets.
    #[arg(long)]
    allow_unsafe_context: bool,

    /// Use the screenshot fallback instead of begin-frame control.
    #[arg(long)]
    compatible: bool,

    /// Maximum concurrent browsers.
    #[arg(long, default_value_t = 2)]
    max_browsers: usize,

    /// Maximum pages per browser.
    #[arg(long, default_value_t = 2)]
    max_pages: usize,
}

/// Logs progress events as they stream in.
struct ProgressLogger;

impl EventEmitter for ProgressLogger {
    fn emit_page(&self, event: PageEvent) {
        log::debug!("[Event] {:?}", event);
    }

    fn emit_synth(&self, event: SynthEvent) {
        match event {
            SynthEvent::Progress { percent } => log::info!("[Progress] {:.1}%", percent),
            SynthEvent::ChunkStarted { index } => log::info!("[Chunk] #{index} started"),
            SynthEvent::ChunkFinished { index } => log::info!("[Chunk] #{index} finished"),
            SynthEvent::Error { message } => log::error!("[Synth] {}", message),
            SynthEvent::Completed { path } => log::info!("[Synth] Completed: {}", path),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Pagecast Renderer v{}", env!("CARGO_PKG_VERSION"));

    let render_config = RenderConfig {
        work_dir: args.work_dir.clone(),
        browser_executable: args.browser.clone(),
        allow_unsafe_context: args.allow_unsafe_context,
        compatible_render_mode: args.compatible,
        ..RenderConfig::default()
    };
    render_config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("render configuration invalid")?;
    let render_config = Arc::new(render_config);

    let (scenes, output) = build_scenes(&args)?;

    let pool_config = PoolConfig {
        num_browser_min: 1,
        num_browser_max: args.max_browsers,
        num_page_min: 1,
        num_page_max: args.max_pages,
    };

    let preprocessor = Preprocessor::new(&render_config);
    let emitter: Arc<dyn EventEmitter> = Arc::new(ProgressLogger);
    let pool = PagePool::new(
        render_config.clone(),
        pool_config,
        preprocessor.clone(),
        emitter.clone(),
    )
    .map_err(|e| anyhow::anyhow!(e))
    .context("pool configuration invalid")?;

    let synthesizer = Synthesizer::new(
        render_config.clone(),
        pool.clone(),
        preprocessor,
        emitter,
    );

    let render = async {
        if scenes.len() == 1 {
            let mut scene = scenes.into_iter().next().expect("one scene");
            scene.options.output_path = output.clone();
            synthesizer.render(scene).await
        } else {
            synthesizer.render_multi(scenes, output.clone()).await
        }
    };

    let outcome = tokio::select! {
        result = render => result,
        _ = tokio::signal::ctrl_c() => {
            log::warn!("Interrupted, shutting down");
            pool.shutdown().await;
            bail!("render interrupted");
        }
    };

    pool.shutdown().await;
    let path = outcome.context("render failed")?;
    log::info!("Wrote {}", path.display());
    Ok(())
}

/// Builds the scene list from either the job file or the single-URL flags.
fn build_scenes(args: &Args) -> Result<(Vec<Scene>, PathBuf)> {
    if let Some(job_path) = &args.job {
        let text = std::fs::read_to_string(job_path)
            .with_context(|| format!("reading {}", job_path.display()))?;
        let job: JobFile = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing {}", job_path.display()))?;
        if job.scenes.is_empty() {
            bail!("job file has no scenes");
        }

        let scenes = job
            .scenes
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let source = match (&entry.url, &entry.html) {
                    (Some(url), None) => SceneSource::Url(url.clone()),
                    (None, Some(html)) => SceneSource::Html(html.clone()),
                    _ => bail!("scene {i} needs exactly one of url or html"),
                };
                let mut options = VideoOptions::new(
                    job.output.clone(),
                    job.width,
                    job.height,
                    job.fps,
                    entry.duration,
                );
                options.start_time_ms = entry.start_time;
                if let Some(format) = job.format {
                    options.format = format;
                }
                if let Some(encoder) = job.video_encoder {
                    options.video_encoder = encoder;
                }
                if let Some(encoder) = job.audio_encoder {
                    options.audio_encoder = encoder;
                }
                if let Some(pix_fmt) = job.pixel_format {
                    options.pixel_format = pix_fmt;
                }
                if let Some(quality) = job.quality {
                    options.quality = quality;
                }
                options.video_bitrate = job.video_bitrate.clone();
                options.audio_bitrate = job.audio_bitrate.clone();
                if let Some(opacity) = job.background_opacity {
                    options.background_opacity = opacity;
                }
                options.attach_cover_path = job.attach_cover_path.clone();
                if let Some(volume) = job.video_volume {
                    options.video_volume = volume;
                }
                Ok(Scene {
                    source,
                    options,
                    transition: entry.transition.as_ref().map(Into::into),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok((scenes, job.output));
    }

    let Some(url) = &args.url else {
        bail!("either --job or --url is required");
    };
    let options = VideoOptions::new(
        args.output.clone(),
        args.width,
        args.height,
        args.fps,
        args.duration,
    );
    Ok((
        vec![Scene {
            source: SceneSource::Url(url.clone()),
            options,
            transition: None,
        }],
        args.output.clone(),
    ))
}
