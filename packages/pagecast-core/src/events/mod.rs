//! Event system for render observation.
//!
//! Drivers and synthesizers emit domain events through the
//! [`EventEmitter`](emitter::EventEmitter) trait; the composition root
//! decides whether they reach a progress bar, a log, or a broadcast
//! channel.

mod emitter;

pub use emitter::{BroadcastEmitter, EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::media::AudioTrack;

/// Events emitted by a page driver during capture.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PageEvent {
    /// A console message surfaced from page code (already flattened to a
    /// single string by the in-page console shim).
    Console { level: String, text: String },
    /// An uncaught page error or rejected promise.
    Error { code: String, message: String },
    /// Page code registered an audio track with the host.
    AudioAdded { audio: AudioTrack },
    /// Page code clamped an audio end time (element removed mid-capture).
    AudioEndTimeUpdated { id: i32, end_time: f64 },
    /// The capture loop finished all frames.
    Completed,
}

/// Events emitted by a synthesizer over the course of a job.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SynthEvent {
    /// Weighted overall progress, 0..=100.
    Progress { percent: f64 },
    /// Encoding of one chunk began.
    ChunkStarted { index: usize },
    /// Encoding of one chunk finished.
    ChunkFinished { index: usize },
    /// The job failed; intermediate files are left in place.
    Error { message: String },
    /// The final file landed at `path`.
    Completed { path: String },
}

/// Envelope for fan-out over a broadcast channel.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RenderEvent {
    Page(PageEvent),
    Synth(SynthEvent),
}
