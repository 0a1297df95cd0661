//! CSS animation tracking and virtual-time seeking.
//!
//! The renderer reports started animations through the `Animation`
//! domain. Each is paused on first sight, pinned to the virtual time of
//! that tick, and thereafter driven by `Animation.seekAnimations` so CSS
//! keyframes advance in lockstep with the capture clock.

use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::cdp::{CdpResult, CdpSession};

/// One animation under host control.
#[derive(Debug, Clone)]
struct TrackedAnimation {
    id: String,
    /// Virtual time the animation was pinned at; `None` until first seek.
    pinned_at: Option<f64>,
    delay: f64,
    duration: f64,
    /// `None` means infinite iterations.
    iterations: Option<f64>,
}

impl TrackedAnimation {
    /// Whether the animation has fully played out at virtual time `t`.
    fn elapsed(&self, t: f64) -> bool {
        match (self.pinned_at, self.iterations) {
            (Some(pinned), Some(iterations)) => pinned + self.delay + self.duration * iterations <= t,
            _ => false,
        }
    }
}

/// Registry of animations observed on the current document.
#[derive(Default)]
pub struct CssAnimationTracker {
    animations: Mutex<Vec<TrackedAnimation>>,
}

impl CssAnimationTracker {
    /// Records an `Animation.animationStarted` event.
    pub fn on_started(&self, params: &Value) {
        let animation = &params["animation"];
        let Some(id) = animation["id"].as_str() else {
            return;
        };
        let source = &animation["source"];
        let iterations = source["iterations"].as_f64().filter(|i| i.is_finite());
        let tracked = TrackedAnimation {
            id: id.to_string(),
            pinned_at: None,
            delay: source["delay"].as_f64().unwrap_or(0.0),
            duration: source["duration"].as_f64().unwrap_or(0.0),
            iterations,
        };
        let mut animations = self.animations.lock();
        if animations.iter().all(|a| a.id != tracked.id) {
            animations.push(tracked);
        }
    }

    /// Number of animations currently tracked.
    pub fn len(&self) -> usize {
        self.animations.lock().len()
    }

    /// Whether no animations are tracked.
    pub fn is_empty(&self) -> bool {
        self.animations.lock().is_empty()
    }

    /// Drops all tracked animations (navigation reset).
    pub fn clear(&self) {
        self.animations.lock().clear();
    }

    /// Seeks every tracked animation to virtual time `t` (milliseconds).
    ///
    /// Newly observed animations are pinned to `t` and paused first, so
    /// their local clock starts at the tick they appeared on. Fully
    /// played-out animations are seeked one last time and dropped.
    pub async fn seek(&self, session: &CdpSession, t: f64) -> CdpResult<()> {
        let to_pin: Vec<String> = {
            let mut animations = self.animations.lock();
            animations
                .iter_mut()
                .filter(|a| a.pinned_at.is_none())
                .map(|a| {
                    a.pinned_at = Some(t);
                    a.id.clone()
                })
                .collect()
        };
        if !to_pin.is_empty() {
            session
                .send(
                    "Animation.setPaused",
                    json!({ "animations": to_pin, "paused": true }),
                )
                .await?;
        }

        // Group by pinned time so each batch shares one local clock.
        let batches: Vec<(f64, Vec<String>)> = {
            let animations = self.animations.lock();
            let mut batches: Vec<(f64, Vec<String>)> = Vec::new();
            for a in animations.iter() {
                let Some(pinned) = a.pinned_at else { continue };
                match batches.iter_mut().find(|(p, _)| *p == pinned) {
                    Some((_, ids)) => ids.push(a.id.clone()),
                    None => batches.push((pinned, vec![a.id.clone()])),
                }
            }
            batches
        };

        for (pinned, ids) in batches {
            session
                .send(
                    "Animation.seekAnimations",
                    json!({ "animations": ids, "currentTime": t - pinned }),
                )
                .await?;
        }

        self.animations.lock().retain(|a| !a.elapsed(t));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started_event(id: &str, delay: f64, duration: f64, iterations: Option<f64>) -> Value {
        json!({
            "animation": {
                "id": id,
                "startTime": null,
                "source": {
                    "delay": delay,
                    "duration": duration,
                    "iterations": iterations,
                    "backendNodeId": 7,
                }
            }
        })
    }

    #[test]
    fn started_animations_are_registered_once() {
        let tracker = CssAnimationTracker::default();
        tracker.on_started(&started_event("a1", 0.0, 1000.0, Some(1.0)));
        tracker.on_started(&started_event("a1", 0.0, 1000.0, Some(1.0)));
        tracker.on_started(&started_event("a2", 100.0, 500.0, None));
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn elapsed_accounts_for_delay_and_iterations() {
        let anim = TrackedAnimation {
            id: "x".into(),
            pinned_at: Some(1000.0),
            delay: 200.0,
            duration: 400.0,
            iterations: Some(2.0),
        };
        assert!(!anim.elapsed(1999.0));
        assert!(anim.elapsed(2000.0));
    }

    #[test]
    fn infinite_iterations_never_elapse() {
        let anim = TrackedAnimation {
            id: "x".into(),
            pinned_at: Some(0.0),
            delay: 0.0,
            duration: 16.0,
            iterations: None,
        };
        assert!(!anim.elapsed(f64::MAX));
    }
}
