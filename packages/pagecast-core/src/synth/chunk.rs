//! Scene chunks and the splice argument builder.
//!
//! A chunk is one rendered scene as a bitstream-filtered MPEG-TS
//! intermediate. Chunks concatenate via the concat protocol where no
//! transition separates them, and through cascaded `xfade` filters where
//! one does.

use std::path::PathBuf;

use crate::config::VideoOptions;
use crate::encode::codec::VideoEncoderKind;
use crate::media::AudioTrack;

use super::transition::Transition;
use super::SynthError;

/// One rendered scene awaiting splicing.
#[derive(Debug, Clone)]
pub struct VideoChunk {
    /// The MPEG-TS intermediate.
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Rendered duration in milliseconds.
    pub duration_ms: f64,
    /// Encoder that produced the bitstream.
    pub video_encoder: VideoEncoderKind,
    /// Transition into the next chunk; the overlap eats into this
    /// chunk's contribution to the composite.
    pub transition: Option<Transition>,
    /// Audio tracks gathered while this chunk rendered, in local time.
    pub audios: Vec<AudioTrack>,
}

impl VideoChunk {
    /// Builds the chunk record for a scene's options.
    pub fn from_options(path: PathBuf, options: &VideoOptions, transition: Option<Transition>) -> Self {
        Self {
            path,
            width: options.width,
            height: options.height,
            fps: options.fps,
            duration_ms: options.duration_ms,
            video_encoder: options.video_encoder,
            transition,
            audios: Vec::new(),
        }
    }

    /// Contribution to the composite timeline: the transition overlap
    /// belongs to the boundary, not this chunk.
    pub fn effective_duration_ms(&self) -> f64 {
        let overlap = self.transition.map_or(0.0, |t| t.duration_ms);
        (self.duration_ms - overlap).max(0.0)
    }
}

/// Validates a chunk sequence before any encoding starts.
///
/// All chunks must agree on geometry and cadence, every encoder must be
/// able to produce a transport-stream intermediate, and no transition
/// may outlast either of its neighbours.
pub fn validate_chunks(chunks: &[VideoChunk]) -> Result<(), SynthError> {
    let Some(first) = chunks.first() else {
        return Err(SynthError::Config("no chunks to synthesize".to_string()));
    };

    for chunk in chunks {
        if chunk.width != first.width || chunk.height != first.height {
            return Err(SynthError::Config(format!(
                "chunk geometry mismatch: {}x{} vs {}x{}",
                chunk.width, chunk.height, first.width, first.height
            )));
        }
        if chunk.fps != first.fps {
            return Err(SynthError::Config(format!(
                "chunk fps mismatch: {} vs {}",
                chunk.fps, first.fps
            )));
        }
        if chunk.video_encoder.chunk_bitstream_filter().is_none() {
            return Err(SynthError::Config(format!(
                "{} cannot produce chunk intermediates",
                chunk.video_encoder.as_str()
            )));
        }
    }

    for (i, window) in chunks.windows(2).enumerate() {
        if let Some(transition) = window[0].transition {
            let limit = window[0].duration_ms.min(window[1].duration_ms);
            if transition.duration_ms > limit {
                return Err(SynthError::Config(format!(
                    "transition at boundary {i} lasts {}ms but its shorter neighbour is {limit}ms",
                    transition.duration_ms
                )));
            }
        }
    }
    Ok(())
}

/// Composite duration: `sum(duration) - sum(transition overlap)`, with
/// the final chunk's transition ignored (it has no successor).
pub fn composite_duration_ms(chunks: &[VideoChunk]) -> f64 {
    let total: f64 = chunks.iter().map(|c| c.duration_ms).sum();
    let overlap: f64 = chunks
        .iter()
        .take(chunks.len().saturating_sub(1))
        .filter_map(|c| c.transition.map(|t| t.duration_ms))
        .sum();
    total - overlap
}

/// Timeline offset of each chunk within the composite.
pub fn chunk_offsets_ms(chunks: &[VideoChunk]) -> Vec<f64> {
    let mut offsets = Vec::with_capacity(chunks.len());
    let mut cursor = 0.0;
    for chunk in chunks {
        offsets.push(cursor);
        cursor += chunk.effective_duration_ms();
    }
    offsets
}

/// Builds the splice argument list over rendered chunk intermediates.
///
/// Transition-free runs collapse into `concat:` protocol inputs; each
/// transition boundary becomes one `xfade` stage cascading `[v1]`,
/// `[v2]`, ... The output is video-only, re-encoded with `encoder_args`
/// supplied by the caller.
pub fn build_splice_args(
    chunks: &[VideoChunk],
    encoder_args: &[String],
    output: &std::path::Path,
) -> Result<Vec<String>, SynthError> {
    validate_chunks(chunks)?;

    // Collapse transition-free runs.
    struct Segment {
        input: String,
        duration_ms: f64,
        transition: Option<Transition>,
    }
    let mut segments: Vec<Segment> = Vec::new();
    let mut run: Vec<&VideoChunk> = Vec::new();
    for chunk in chunks {
        run.push(chunk);
        if chunk.transition.is_some() {
            segments.push(Segment {
                input: concat_input(&run),
                duration_ms: run.iter().map(|c| c.duration_ms).sum(),
                transition: chunk.transition,
            });
            run.clear();
        }
    }
    if !run.is_empty() {
        segments.push(Segment {
            input: concat_input(&run),
            duration_ms: run.iter().map(|c| c.duration_ms).sum(),
            transition: None,
        });
    }

    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
    ];
    for segment in &segments {
        args.push("-i".into());
        args.push(segment.input.clone());
    }

    if segments.len() == 1 {
        // Pure concatenation; the bitstreams are already compatible.
        args.extend(["-c".into(), "copy".into()]);
        args.push(output.display().to_string());
        return Ok(args);
    }

    let mut filter = String::new();
    let mut cumulative_ms = 0.0;
    for (i, segment) in segments.iter().enumerate().take(segments.len() - 1) {
        let transition = segment.transition.expect("non-final segments end in a transition");
        cumulative_ms += segment.duration_ms - transition.duration_ms;
        let left = if i == 0 { "[0:v]".to_string() } else { format!("[v{i}]") };
        filter.push_str(&format!(
            "{left}[{}:v]xfade=transition={}:duration={}:offset={}[v{}];",
            i + 1,
            transition.kind.as_str(),
            format_secs(transition.duration_ms),
            format_secs(cumulative_ms),
            i + 1,
        ));
    }
    let filter = filter.trim_end_matches(';').to_string();
    let last_label = format!("[v{}]", segments.len() - 1);

    args.push("-filter_complex".into());
    args.push(filter);
    args.extend(["-map".into(), last_label]);
    args.extend(encoder_args.iter().cloned());
    args.push(output.display().to_string());
    Ok(args)
}

/// Renders one transition-free run as a single ffmpeg input.
fn concat_input(run: &[&VideoChunk]) -> String {
    if run.len() == 1 {
        run[0].path.display().to_string()
    } else {
        let joined: Vec<String> = run.iter().map(|c| c.path.display().to_string()).collect();
        format!("concat:{}", joined.join("|"))
    }
}

/// Milliseconds rendered as fractional seconds.
fn format_secs(ms: f64) -> String {
    let text = format!("{:.6}", ms / 1000.0);
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::transition::TransitionKind;

    fn chunk(name: &str, duration_ms: f64, transition: Option<Transition>) -> VideoChunk {
        VideoChunk {
            path: PathBuf::from(name),
            width: 1280,
            height: 720,
            fps: 30.0,
            duration_ms,
            video_encoder: VideoEncoderKind::Libx264,
            transition,
            audios: Vec::new(),
        }
    }

    fn fade(ms: f64) -> Option<Transition> {
        Some(Transition::new(TransitionKind::Fade, ms))
    }

    #[test]
    fn composite_duration_subtracts_transition_overlap() {
        let chunks = vec![chunk("a.ts", 5000.0, fade(1000.0)), chunk("b.ts", 5000.0, None)];
        assert_eq!(composite_duration_ms(&chunks), 9000.0);
    }

    #[test]
    fn final_chunk_transition_does_not_shrink_composite() {
        let chunks = vec![chunk("a.ts", 5000.0, None), chunk("b.ts", 5000.0, fade(1000.0))];
        assert_eq!(composite_duration_ms(&chunks), 10_000.0);
    }

    #[test]
    fn offsets_accumulate_effective_durations() {
        let chunks = vec![
            chunk("a.ts", 5000.0, fade(1000.0)),
            chunk("b.ts", 4000.0, None),
            chunk("c.ts", 3000.0, None),
        ];
        assert_eq!(chunk_offsets_ms(&chunks), vec![0.0, 4000.0, 8000.0]);
    }

    #[test]
    fn geometry_mismatch_fails_validation() {
        let mut b = chunk("b.ts", 5000.0, None);
        b.width = 1920;
        assert!(matches!(
            validate_chunks(&[chunk("a.ts", 5000.0, None), b]),
            Err(SynthError::Config(_))
        ));
    }

    #[test]
    fn overlong_transition_fails_validation() {
        let chunks = vec![chunk("a.ts", 5000.0, fade(3000.0)), chunk("b.ts", 2000.0, None)];
        assert!(matches!(validate_chunks(&chunks), Err(SynthError::Config(_))));
    }

    #[test]
    fn transition_free_chunks_concat_copy() {
        let chunks = vec![chunk("a.ts", 5000.0, None), chunk("b.ts", 5000.0, None)];
        let args = build_splice_args(&chunks, &[], std::path::Path::new("out.mp4")).unwrap();
        let joined = args.join(" ");
        assert!(joined.contains("-i concat:a.ts|b.ts"));
        assert!(joined.contains("-c copy"));
        assert!(!joined.contains("xfade"));
    }

    #[test]
    fn transition_boundary_builds_xfade_with_cumulative_offset() {
        let chunks = vec![chunk("a.ts", 5000.0, fade(1000.0)), chunk("b.ts", 5000.0, None)];
        let encoder_args = vec!["-c:v".to_string(), "libx264".to_string()];
        let args = build_splice_args(&chunks, &encoder_args, std::path::Path::new("out.mp4")).unwrap();
        let joined = args.join(" ");
        assert!(joined.contains(
            "[0:v][1:v]xfade=transition=fade:duration=1:offset=4[v1]"
        ));
        assert!(joined.contains("-map [v1]"));
        assert!(joined.contains("-c:v libx264"));
    }

    #[test]
    fn mixed_runs_collapse_then_cascade() {
        let chunks = vec![
            chunk("a.ts", 3000.0, None),
            chunk("b.ts", 3000.0, fade(500.0)),
            chunk("c.ts", 4000.0, None),
        ];
        let args = build_splice_args(&chunks, &[], std::path::Path::new("out.mp4")).unwrap();
        let joined = args.join(" ");
        // First input is the merged a+b run, second is c alone.
        assert!(joined.contains("-i concat:a.ts|b.ts"));
        assert!(joined.contains("-i c.ts"));
        // Boundary offset: (3000 + 3000 - 500)ms = 5.5s.
        assert!(joined.contains("xfade=transition=fade:duration=0.5:offset=5.5[v1]"));
    }

    #[test]
    fn splice_args_are_byte_stable() {
        let chunks = vec![chunk("a.ts", 5000.0, fade(1000.0)), chunk("b.ts", 5000.0, None)];
        let once = build_splice_args(&chunks, &[], std::path::Path::new("out.mp4")).unwrap();
        let twice = build_splice_args(&chunks, &[], std::path::Path::new("out.mp4")).unwrap();
        assert_eq!(once, twice);
    }
}
