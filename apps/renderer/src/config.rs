//! YAML job file for the renderer binary.

use std::path::PathBuf;

use serde::Deserialize;

use pagecast_core::{
    AudioEncoderKind, OutputFormat, PixelFormat, Transition, TransitionKind, VideoEncoderKind,
};

/// A render job: one or more scenes plus shared output settings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct JobFile {
    /// Final output file.
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default)]
    pub format: Option<OutputFormat>,
    #[serde(default)]
    pub video_encoder: Option<VideoEncoderKind>,
    #[serde(default)]
    pub audio_encoder: Option<AudioEncoderKind>,
    #[serde(default)]
    pub pixel_format: Option<PixelFormat>,
    #[serde(default)]
    pub quality: Option<u32>,
    #[serde(default)]
    pub video_bitrate: Option<String>,
    #[serde(default)]
    pub audio_bitrate: Option<String>,
    #[serde(default)]
    pub background_opacity: Option<f64>,
    #[serde(default)]
    pub attach_cover_path: Option<PathBuf>,
    #[serde(default)]
    pub video_volume: Option<f64>,
    /// Scenes in composite order.
    pub scenes: Vec<SceneEntry>,
}

fn default_fps() -> f64 {
    30.0
}

/// One scene of the job.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SceneEntry {
    /// Page URL to capture (exclusive with `html`).
    #[serde(default)]
    pub url: Option<String>,
    /// Inline markup to capture (exclusive with `url`).
    #[serde(default)]
    pub html: Option<String>,
    /// Scene length in milliseconds.
    pub duration: f64,
    /// Virtual time at which frame emission begins.
    #[serde(default)]
    pub start_time: f64,
    /// Transition into the next scene.
    #[serde(default)]
    pub transition: Option<TransitionEntry>,
}

/// Transition description in the job file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransitionEntry {
    #[serde(rename = "type")]
    pub kind: TransitionKind,
    pub duration: f64,
}

impl From<&TransitionEntry> for Transition {
    fn from(entry: &TransitionEntry) -> Self {
        Transition::new(entry.kind, entry.duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_file_parses() {
        let yaml = r#"
output: out/final.mp4
width: 1280
height: 720
fps: 30
scenes:
  - url: https://example.com/intro.html
    duration: 5000
    transition:
      type: fade
      duration: 1000
  - url: https://example.com/main.html
    duration: 5000
"#;
        let job: JobFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(job.scenes.len(), 2);
        assert_eq!(job.fps, 30.0);
        let transition = job.scenes[0].transition.as_ref().unwrap();
        assert_eq!(transition.kind, TransitionKind::Fade);
        assert_eq!(transition.duration, 1000.0);
    }

    #[test]
    fn unknown_fields_rejected() {
        let yaml = "output: a.mp4\nwidth: 2\nheight: 2\nbogus: 1\nscenes: []\n";
        assert!(serde_yaml::from_str::<JobFile>(yaml).is_err());
    }
}
