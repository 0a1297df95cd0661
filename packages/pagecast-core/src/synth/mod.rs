//! Scene synthesis: capture orchestration, chunk splicing, audio mix.

mod chunk;
mod synthesizer;
mod transition;

pub use chunk::{
    build_splice_args, chunk_offsets_ms, composite_duration_ms, validate_chunks, VideoChunk,
};
pub use synthesizer::{Scene, SceneSource, Synthesizer};
pub use transition::{Transition, TransitionKind};

use thiserror::Error;

use crate::error::PagecastError;

/// Errors raised before or during splicing.
#[derive(Debug, Error)]
pub enum SynthError {
    /// The chunk sequence cannot be synthesized as configured.
    #[error("invalid synthesis configuration: {0}")]
    Config(String),
}

impl From<SynthError> for PagecastError {
    fn from(err: SynthError) -> Self {
        Self::Configuration(err.to_string())
    }
}
