//! Event emitter abstraction for decoupling drivers from transport.
//!
//! Drivers depend on the [`EventEmitter`] trait rather than concrete
//! channels, enabling testing and alternative delivery (progress bar,
//! broadcast, log).

use tokio::sync::broadcast;

use super::{PageEvent, RenderEvent, SynthEvent};

/// Trait for emitting domain events without knowledge of transport.
pub trait EventEmitter: Send + Sync {
    /// Emits a page capture event.
    fn emit_page(&self, event: PageEvent);

    /// Emits a synthesis progress event.
    fn emit_synth(&self, event: SynthEvent);
}

/// No-op emitter for embedded use or testing.
///
/// Events are silently discarded. Errors still propagate through result
/// types; only observational events are lost.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_page(&self, _event: PageEvent) {
        // No-op
    }

    fn emit_synth(&self, _event: SynthEvent) {
        // No-op
    }
}

/// Logging emitter for debugging and development.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_page(&self, event: PageEvent) {
        tracing::debug!(?event, "page_event");
    }

    fn emit_synth(&self, event: SynthEvent) {
        tracing::debug!(?event, "synth_event");
    }
}

/// Emitter backed by a tokio broadcast channel.
///
/// Send failures mean no receiver is currently subscribed; events are
/// observational so that case is ignored.
pub struct BroadcastEmitter {
    tx: broadcast::Sender<RenderEvent>,
}

impl BroadcastEmitter {
    /// Creates an emitter and its channel with the given capacity.
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<RenderEvent>) {
        let (tx, rx) = broadcast::channel(capacity);
        (Self { tx }, rx)
    }

    /// Subscribes a new receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<RenderEvent> {
        self.tx.subscribe()
    }
}

impl EventEmitter for BroadcastEmitter {
    fn emit_page(&self, event: PageEvent) {
        let _ = self.tx.send(RenderEvent::Page(event));
    }

    fn emit_synth(&self, event: SynthEvent) {
        let _ = self.tx.send(RenderEvent::Synth(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_emitter_delivers_events() {
        let (emitter, mut rx) = BroadcastEmitter::new(8);
        emitter.emit_synth(SynthEvent::Progress { percent: 50.0 });
        match rx.recv().await.unwrap() {
            RenderEvent::Synth(SynthEvent::Progress { percent }) => {
                assert!((percent - 50.0).abs() < f64::EPSILON);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn noop_emitter_discards_without_panicking() {
        NoopEventEmitter.emit_page(PageEvent::Completed);
    }
}
