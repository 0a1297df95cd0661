//! Host-side media preprocessing.
//!
//! Serves the page's `/api/video_preprocess` RPC: downloads the source
//! (and optional mask), converts it into the MP4 form the in-page decoder
//! accepts, demuxes its soundtrack for the host mixing pass, and packs
//! everything into the length-prefixed payload the page unpacks.

mod download;
pub mod payload;
mod transcode;

pub use download::Downloader;
pub use transcode::{MediaProbe, Transcoder};

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use serde::Deserialize;
use thiserror::Error;

use crate::config::RenderConfig;
use crate::media::AudioTrack;
use crate::paths::WorkDirs;

/// Errors from download, probing, transcoding, or payload packing.
#[derive(Debug, Error)]
pub enum PreprocessError {
    /// Network failure or non-success response.
    #[error("download failed: {0}")]
    Download(String),

    /// HEAD probe returned a type outside the whitelist.
    #[error("unsupported media type: {0}")]
    UnsupportedMime(String),

    /// ffmpeg subprocess failure.
    #[error("transcode failed: {0}")]
    Transcode(String),

    /// ffprobe subprocess failure.
    #[error("probe failed: {0}")]
    Probe(String),

    /// A subprocess exceeded its deadline.
    #[error("preprocess timed out: {0}")]
    Timeout(String),

    /// Malformed payload envelope.
    #[error("payload invalid: {0}")]
    Payload(String),

    /// Filesystem failure in the cache.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl PreprocessError {
    /// Whether a retry might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Download(_) | Self::Timeout(_) | Self::Io(_))
    }
}

/// Element configuration posted by the page when a video loads.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoPreprocessConfig {
    /// Primary source URL.
    pub url: String,
    /// Separate alpha-mask source, if the element declared one.
    #[serde(default)]
    pub mask_url: Option<String>,
    /// Timeline entry of the element.
    #[serde(default)]
    pub start_time: f64,
    /// Timeline exit of the element.
    #[serde(default)]
    pub end_time: Option<f64>,
    /// Clip start within the source.
    #[serde(default)]
    pub seek_start: Option<f64>,
    /// Clip end within the source.
    #[serde(default)]
    pub seek_end: Option<f64>,
    /// Loop playback until the timeline exit.
    #[serde(default, rename = "loop")]
    pub loop_video: bool,
    /// Suppress the soundtrack entirely.
    #[serde(default)]
    pub muted: bool,
    /// Soundtrack volume 0..=100.
    #[serde(default = "default_volume")]
    pub volume: f64,
    /// Soundtrack fade-in.
    #[serde(default)]
    pub fade_in_duration: Option<f64>,
    /// Soundtrack fade-out.
    #[serde(default)]
    pub fade_out_duration: Option<f64>,
    /// Download retry attempts.
    #[serde(default)]
    pub retry_fetchs: Option<u32>,
    /// Bypass the download cache.
    #[serde(default)]
    pub ignore_cache: bool,
}

fn default_volume() -> f64 {
    100.0
}

/// Result of one preprocess pass.
pub struct ProcessedMedia {
    /// Packed payload for the page (`len!json+binary`).
    pub payload: Bytes,
    /// Demuxed soundtrack, registered with the page driver when present.
    pub audio: Option<AudioTrack>,
}

/// Preprocessor serving the page RPC and host-side audio fetches.
pub struct Preprocessor {
    downloader: Downloader,
    transcoder: Transcoder,
}

impl Preprocessor {
    /// Builds the preprocessor from the host configuration.
    pub fn new(config: &RenderConfig) -> Arc<Self> {
        let dirs = WorkDirs::new(&config.work_dir);
        Arc::new(Self {
            downloader: Downloader::new(
                dirs.preprocessor(),
                config.num_downloads,
                config.download_retries,
                config.download_retry_delay,
            ),
            transcoder: Transcoder::new(
                config.ffmpeg_path.clone(),
                config.ffprobe_path.clone(),
                config.num_processes,
                config.demux_timeout,
            ),
        })
    }

    /// The shared downloader (also used for vendor scripts and audio
    /// sources).
    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    /// The shared transcoder.
    pub fn transcoder(&self) -> &Transcoder {
        &self.transcoder
    }

    /// Runs the full preprocess pipeline for one element config.
    pub async fn process(
        &self,
        config: VideoPreprocessConfig,
    ) -> Result<ProcessedMedia, PreprocessError> {
        log::info!("[Preprocess] {}", config.url);

        let source = self
            .downloader
            .fetch_with_retries(&config.url, config.ignore_cache, config.retry_fetchs)
            .await?
            .ok_or_else(|| PreprocessError::Download(format!("{} not found", config.url)))?;
        let probe = self.transcoder.probe(&source).await?;

        // The page decoder wants MP4-packed H.264; WebM is re-encoded and
        // transparent WebM additionally yields a mask track.
        let (main_track, mask_track) = if probe.is_webm {
            let main = self.transcoder.transcode_h264(&source).await?;
            let mask = if probe.has_alpha {
                Some(self.transcoder.extract_alpha_mask(&source).await?)
            } else {
                None
            };
            (main, mask)
        } else {
            (source.clone(), None)
        };

        // An explicit mask source wins over a derived one.
        let mask_track = match &config.mask_url {
            Some(mask_url) => {
                let mask_source = self
                    .downloader
                    .fetch_with_retries(mask_url, config.ignore_cache, config.retry_fetchs)
                    .await?
                    .ok_or_else(|| {
                        PreprocessError::Download(format!("{mask_url} not found"))
                    })?;
                let mask_probe = self.transcoder.probe(&mask_source).await?;
                if mask_probe.is_webm {
                    Some(self.transcoder.transcode_h264(&mask_source).await?)
                } else {
                    Some(mask_source)
                }
            }
            None => mask_track,
        };

        let audio = if !config.muted && probe.has_audio {
            let audio_path = self.transcoder.demux_audio(&source).await?;
            Some(AudioTrack {
                id: 0,
                url: None,
                path: Some(audio_path),
                start_time: config.start_time,
                end_time: config.end_time,
                duration: probe.duration_ms,
                loop_audio: config.loop_video,
                volume: config.volume,
                seek_start: config.seek_start,
                seek_end: config.seek_end,
                fade_in_duration: config.fade_in_duration,
                fade_out_duration: config.fade_out_duration,
                retry_fetchs: config.retry_fetchs,
                ignore_cache: config.ignore_cache,
            })
        } else {
            None
        };

        // Clipped sources are rewrapped in memory so the decoder starts at
        // frame zero; otherwise the cached file is read as-is.
        let has_clip = config.seek_start.is_some() || config.seek_end.is_some();
        let main_bytes = if has_clip {
            self.transcoder
                .clip_to_memory(&main_track, config.seek_start, config.seek_end)
                .await?
        } else {
            tokio::fs::read(&main_track).await?
        };
        let mask_bytes = match &mask_track {
            Some(mask) if has_clip => Some(
                self.transcoder
                    .clip_to_memory(mask, config.seek_start, config.seek_end)
                    .await?,
            ),
            Some(mask) => Some(tokio::fs::read(mask).await?),
            None => None,
        };

        let header = payload::layout(
            &main_bytes,
            mask_bytes.as_deref(),
            audio.is_some(),
            has_clip,
        );
        let mut sections: Vec<&[u8]> = vec![&main_bytes];
        if let Some(mask) = &mask_bytes {
            sections.push(mask);
        }
        let packed = payload::pack(&header, &sections)?;

        log::debug!(
            "[Preprocess] {} -> {} bytes (mask: {}, audio: {}, clip: {})",
            config.url,
            packed.len(),
            header.has_mask,
            header.has_audio,
            header.has_clip,
        );
        Ok(ProcessedMedia {
            payload: packed,
            audio,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_config_deserializes_with_defaults() {
        let json = r#"{
            "url": "https://example.com/a.webm",
            "maskUrl": "https://example.com/a_mask.webm",
            "startTime": 1000,
            "endTime": 6000,
            "seekStart": 2000,
            "loop": true,
            "volume": 50
        }"#;
        let config: VideoPreprocessConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.url, "https://example.com/a.webm");
        assert_eq!(config.mask_url.as_deref(), Some("https://example.com/a_mask.webm"));
        assert!(config.loop_video);
        assert!(!config.muted);
        assert_eq!(config.volume, 50.0);
        assert_eq!(config.seek_start, Some(2000.0));
        assert_eq!(config.seek_end, None);
        assert!(!config.ignore_cache);
    }

    #[test]
    fn transient_classification() {
        assert!(PreprocessError::Download("x".into()).is_transient());
        assert!(PreprocessError::Timeout("x".into()).is_transient());
        assert!(!PreprocessError::UnsupportedMime("text/html".into()).is_transient());
        assert!(!PreprocessError::Transcode("x".into()).is_transient());
    }
}
