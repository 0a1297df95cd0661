//! Audio mixing pass.
//!
//! Runs after video encoding: the video stream is copied untouched while
//! every audio track goes through a per-input filter chain
//! (trim/loop/delay/volume/fades) into one `amix`, encoded with the
//! job's audio codec. Output duration is clamped to the video length.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::media::AudioTrack;

use super::codec::AudioEncoderKind;
use super::{EncodeError, EncodeResult};

/// Builds the filter chain for one audio input.
///
/// `index` is the ffmpeg input index (video is input 0, so audio i maps
/// to input i+1). All times are milliseconds on the composite timeline.
pub(crate) fn build_track_filter(index: usize, track: &AudioTrack, video_volume: f64) -> String {
    let start = track.start_time;
    let end = track.end_time.unwrap_or(start);
    let mut chain = format!("[{}]atrim=0:{}", index + 1, format_secs((end - start).max(0.0)));

    if track.loop_audio {
        chain.push_str(",aloop=-1:2e9");
    }

    // adelay wants one value per channel.
    let delay = start.max(0.0).round() as u64;
    chain.push_str(&format!(",adelay={delay}|{delay}"));

    let volume = (track.volume * video_volume) / 10_000.0;
    chain.push_str(&format!(",volume={}", format_num(volume)));

    if let Some(fade_in) = track.fade_in_duration {
        chain.push_str(&format!(
            ",afade=t=in:st={}:d={}",
            format_secs(start),
            format_secs(fade_in)
        ));
    }
    if let Some(fade_out) = track.fade_out_duration {
        chain.push_str(&format!(
            ",afade=t=out:st={}:d={}",
            format_secs(end - fade_out),
            format_secs(fade_out)
        ));
    }

    chain.push_str(&format!("[a{index}]"));
    chain
}

/// Builds the complete `-filter_complex` graph for a track set.
pub(crate) fn build_mix_graph(tracks: &[AudioTrack], video_volume: f64) -> String {
    let mut graph: Vec<String> = tracks
        .iter()
        .enumerate()
        .map(|(i, t)| build_track_filter(i, t, video_volume))
        .collect();

    let labels: String = (0..tracks.len()).map(|i| format!("[a{i}]")).collect();
    graph.push(format!(
        "{labels}amix=inputs={}:normalize=0[audio_out]",
        tracks.len()
    ));
    graph.join(";")
}

/// Milliseconds rendered as fractional seconds for filter arguments.
fn format_secs(ms: f64) -> String {
    format_num(ms / 1000.0)
}

/// Trims trailing zeros so command lines stay byte-stable and readable.
fn format_num(value: f64) -> String {
    let text = format!("{value:.6}");
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Second-pass mixer over a finished video file.
pub struct AudioMixer {
    ffmpeg: std::path::PathBuf,
}

impl AudioMixer {
    /// Creates a mixer using the given ffmpeg binary.
    pub fn new(ffmpeg: impl Into<std::path::PathBuf>) -> Self {
        Self { ffmpeg: ffmpeg.into() }
    }

    /// Builds the argument list for one mixing run.
    ///
    /// Every track must already have a local `path`; tracks with an open
    /// end time must already be clamped to the video duration.
    pub(crate) fn build_args(
        video_in: &Path,
        tracks: &[AudioTrack],
        encoder: AudioEncoderKind,
        audio_bitrate: Option<&str>,
        video_volume: f64,
        video_duration_ms: f64,
        output: &Path,
    ) -> EncodeResult<Vec<String>> {
        if tracks.is_empty() {
            return Err(EncodeError::InvalidOptions(
                "audio mix invoked with no tracks".to_string(),
            ));
        }

        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-i".into(),
            video_in.display().to_string(),
        ];
        for track in tracks {
            let path = track.path.as_ref().ok_or_else(|| {
                EncodeError::InvalidOptions(format!(
                    "audio track {} has no local file",
                    track.id
                ))
            })?;
            args.push("-i".into());
            args.push(path.display().to_string());
        }

        args.push("-filter_complex".into());
        args.push(build_mix_graph(tracks, video_volume));
        args.extend(["-map".into(), "0:v".into()]);
        args.extend(["-map".into(), "[audio_out]".into()]);
        args.extend(["-c:v".into(), "copy".into()]);
        args.extend(["-c:a".into(), encoder.as_str().into()]);
        if let Some(bitrate) = audio_bitrate {
            args.extend(["-b:a".into(), bitrate.into()]);
        }
        // The mix may ring past the video; clamp to the video length.
        args.extend(["-t".into(), format_secs(video_duration_ms)]);
        args.push(output.display().to_string());
        Ok(args)
    }

    /// Runs the mixing pass.
    pub async fn mix(
        &self,
        video_in: &Path,
        tracks: &[AudioTrack],
        encoder: AudioEncoderKind,
        audio_bitrate: Option<&str>,
        video_volume: f64,
        video_duration_ms: f64,
        output: &Path,
    ) -> EncodeResult<()> {
        let args = Self::build_args(
            video_in,
            tracks,
            encoder,
            audio_bitrate,
            video_volume,
            video_duration_ms,
            output,
        )?;
        log::debug!("[Mixer] {} {}", self.ffmpeg.display(), args.join(" "));

        let result = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| EncodeError::Spawn(format!("{}: {e}", self.ffmpeg.display())))?;

        if !result.status.success() {
            return Err(EncodeError::Exit {
                code: result.status.code(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn track(start: f64, end: f64) -> AudioTrack {
        AudioTrack {
            id: 0,
            url: None,
            path: Some(PathBuf::from("a.mp3")),
            start_time: start,
            end_time: Some(end),
            duration: None,
            loop_audio: false,
            volume: 100.0,
            seek_start: None,
            seek_end: None,
            fade_in_duration: None,
            fade_out_duration: None,
            retry_fetchs: None,
            ignore_cache: false,
        }
    }

    #[test]
    fn track_filter_trims_delays_and_scales_volume() {
        let filter = build_track_filter(0, &track(1000.0, 6000.0), 100.0);
        assert_eq!(filter, "[1]atrim=0:5,adelay=1000|1000,volume=1[a0]");
    }

    #[test]
    fn looped_track_gets_aloop_before_delay() {
        let mut t = track(0.0, 10_000.0);
        t.loop_audio = true;
        let filter = build_track_filter(0, &t, 100.0);
        assert!(filter.contains("atrim=0:10,aloop=-1:2e9,adelay=0|0"));
    }

    #[test]
    fn fades_anchor_to_timeline_positions() {
        let mut t = track(1000.0, 6000.0);
        t.volume = 50.0;
        t.fade_in_duration = Some(500.0);
        t.fade_out_duration = Some(400.0);
        let filter = build_track_filter(2, &t, 100.0);
        assert_eq!(
            filter,
            "[3]atrim=0:5,adelay=1000|1000,volume=0.5,\
             afade=t=in:st=1:d=0.5,afade=t=out:st=5.6:d=0.4[a2]"
        );
    }

    #[test]
    fn video_volume_multiplies_track_volume() {
        let mut t = track(0.0, 1000.0);
        t.volume = 50.0;
        let filter = build_track_filter(0, &t, 50.0);
        assert!(filter.contains("volume=0.25"));
    }

    #[test]
    fn mix_graph_joins_labels_into_amix() {
        let tracks = vec![track(0.0, 1000.0), track(500.0, 2000.0)];
        let graph = build_mix_graph(&tracks, 100.0);
        assert!(graph.ends_with("[a0][a1]amix=inputs=2:normalize=0[audio_out]"));
        assert_eq!(graph.matches(';').count(), 2);
    }

    #[test]
    fn mix_args_copy_video_and_clamp_duration() {
        let tracks = vec![track(0.0, 1000.0)];
        let args = AudioMixer::build_args(
            Path::new("video.mp4"),
            &tracks,
            AudioEncoderKind::Aac,
            Some("320k"),
            100.0,
            9000.0,
            Path::new("final.mp4"),
        )
        .unwrap();
        let joined = args.join(" ");
        assert!(joined.contains("-c:v copy"));
        assert!(joined.contains("-c:a aac"));
        assert!(joined.contains("-b:a 320k"));
        assert!(joined.contains("-t 9"));
        assert!(joined.contains("-map 0:v -map [audio_out]"));
    }

    #[test]
    fn build_args_twice_is_byte_stable() {
        let tracks = vec![track(250.0, 1250.0)];
        let once = AudioMixer::build_args(
            Path::new("v.mp4"),
            &tracks,
            AudioEncoderKind::LibOpus,
            None,
            100.0,
            5000.0,
            Path::new("f.webm"),
        )
        .unwrap();
        let twice = AudioMixer::build_args(
            Path::new("v.mp4"),
            &tracks,
            AudioEncoderKind::LibOpus,
            None,
            100.0,
            5000.0,
            Path::new("f.webm"),
        )
        .unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn tracks_without_files_are_rejected() {
        let mut t = track(0.0, 1000.0);
        t.path = None;
        t.url = Some("https://example.com/a.mp3".into());
        assert!(matches!(
            AudioMixer::build_args(
                Path::new("v.mp4"),
                &[t],
                AudioEncoderKind::Aac,
                None,
                100.0,
                1000.0,
                Path::new("f.mp4"),
            ),
            Err(EncodeError::InvalidOptions(_))
        ));
    }
}
