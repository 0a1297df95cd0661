//! Shared media descriptor types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// An audio track scheduled onto the composite timeline.
///
/// Tracks arrive from two directions: page code registering `<audio>`
/// elements (carrying a `url`), and the preprocessor demuxing a video's
/// soundtrack (carrying a local `path`). Times are in milliseconds of
/// virtual timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrack {
    /// Track id, unique within one render.
    #[serde(default)]
    pub id: i32,

    /// Remote source; downloaded by the host before mixing.
    #[serde(default)]
    pub url: Option<String>,

    /// Local source; set once the file is on disk.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Timeline entry point.
    #[serde(default)]
    pub start_time: f64,

    /// Timeline exit point; `None` plays to the end of the composite.
    #[serde(default)]
    pub end_time: Option<f64>,

    /// Source duration if known (set after probe).
    #[serde(default)]
    pub duration: Option<f64>,

    /// Loop the source until `end_time`.
    #[serde(default, rename = "loop")]
    pub loop_audio: bool,

    /// Volume 0..=100.
    #[serde(default = "default_volume")]
    pub volume: f64,

    /// Clip start within the source.
    #[serde(default)]
    pub seek_start: Option<f64>,

    /// Clip end within the source.
    #[serde(default)]
    pub seek_end: Option<f64>,

    /// Fade-in length.
    #[serde(default)]
    pub fade_in_duration: Option<f64>,

    /// Fade-out length.
    #[serde(default)]
    pub fade_out_duration: Option<f64>,

    /// Download retry attempts for the source.
    #[serde(default)]
    pub retry_fetchs: Option<u32>,

    /// Bypass the download cache.
    #[serde(default)]
    pub ignore_cache: bool,
}

fn default_volume() -> f64 {
    100.0
}

impl AudioTrack {
    /// Validates descriptor invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_none() && self.path.is_none() {
            return Err("audio track needs a url or a path".to_string());
        }
        if let (Some(start), Some(end)) = (self.seek_start, self.seek_end) {
            if start > end {
                return Err(format!("seekStart {start} must be <= seekEnd {end}"));
            }
        }
        if let Some(end) = self.end_time {
            if self.start_time > end {
                return Err(format!(
                    "startTime {} must be <= endTime {end}",
                    self.start_time
                ));
            }
        }
        if !(0.0..=100.0).contains(&self.volume) {
            return Err(format!("volume {} must be within 0..=100", self.volume));
        }
        Ok(())
    }

    /// Shifts the track onto a composite timeline by `offset_ms`.
    ///
    /// Used when a chunk's audios are folded into a multi-scene composite:
    /// local times stay intact, only the placement moves.
    pub fn offset_by(&self, offset_ms: f64) -> Self {
        let mut shifted = self.clone();
        shifted.start_time += offset_ms;
        shifted.end_time = self.end_time.map(|t| t + offset_ms);
        shifted
    }

    /// Clamps an unbounded end time to the composite duration.
    pub fn clamp_end(&mut self, composite_duration_ms: f64) {
        match self.end_time {
            Some(end) if end.is_finite() && end <= composite_duration_ms => {}
            _ => self.end_time = Some(composite_duration_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track() -> AudioTrack {
        AudioTrack {
            id: 0,
            url: Some("https://example.com/a.mp3".into()),
            path: None,
            start_time: 1000.0,
            end_time: Some(6000.0),
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
    fn offset_shifts_both_ends() {
        let shifted = track().offset_by(4000.0);
        assert_eq!(shifted.start_time, 5000.0);
        assert_eq!(shifted.end_time, Some(10000.0));
    }

    #[test]
    fn clamp_replaces_infinite_end() {
        let mut t = track();
        t.end_time = Some(f64::INFINITY);
        t.clamp_end(9000.0);
        assert_eq!(t.end_time, Some(9000.0));

        let mut t = track();
        t.end_time = None;
        t.clamp_end(9000.0);
        assert_eq!(t.end_time, Some(9000.0));
    }

    #[test]
    fn seek_bounds_validated() {
        let mut t = track();
        t.seek_start = Some(3000.0);
        t.seek_end = Some(2000.0);
        assert!(t.validate().is_err());
    }

    #[test]
    fn page_descriptor_deserializes() {
        let json = r#"{
            "id": 3,
            "url": "https://example.com/bgm.mp3",
            "startTime": 0,
            "endTime": 10000,
            "loop": true,
            "volume": 50,
            "fadeInDuration": 500
        }"#;
        let t: AudioTrack = serde_json::from_str(json).unwrap();
        assert_eq!(t.id, 3);
        assert!(t.loop_audio);
        assert_eq!(t.volume, 50.0);
        assert_eq!(t.fade_in_duration, Some(500.0));
        assert!(t.validate().is_ok());
    }
}
