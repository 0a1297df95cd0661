//! Page driving: navigation, script injection, interception, and
//! deterministic frame capture.

mod animations;
mod driver;
pub mod scripts;

pub use animations::CssAnimationTracker;
pub use driver::{PageDriver, PageState, TimeAction};
