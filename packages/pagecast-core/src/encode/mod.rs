//! Encoder subprocess drivers.
//!
//! [`FrameEncoder`] streams captured images into an image-pipe ffmpeg
//! process; [`AudioMixer`] runs the second pass that lays audio tracks
//! onto the finished video through a filter graph.

pub mod audio;
pub mod codec;
pub mod video;

pub use audio::AudioMixer;
pub use video::FrameEncoder;

use thiserror::Error;

/// Errors from encoder subprocesses.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The subprocess could not be started.
    #[error("encoder spawn failed: {0}")]
    Spawn(String),

    /// Writing to the encoder's stdin pipe failed.
    #[error("encoder pipe failed: {0}")]
    Pipe(#[from] std::io::Error),

    /// The subprocess exited unsuccessfully.
    #[error("encoder exited with {code:?}: {stderr}")]
    Exit { code: Option<i32>, stderr: String },

    /// The failure pattern indicates missing hardware encoder support.
    #[error("hardware encoder unavailable: {0}")]
    HardwareSupport(String),

    /// The option set cannot be encoded (unknown format, bad bitrate).
    #[error("invalid encoder options: {0}")]
    InvalidOptions(String),
}

/// Convenient Result alias for encoder operations.
pub type EncodeResult<T> = Result<T, EncodeError>;
