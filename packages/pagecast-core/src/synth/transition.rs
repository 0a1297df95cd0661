//! Cross-scene transition vocabulary.
//!
//! The names map one-to-one onto ffmpeg `xfade` transition tokens.

use serde::{Deserialize, Serialize};

/// Transition applied at the boundary a chunk shares with its successor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// Blend operator.
    pub kind: TransitionKind,
    /// Overlap length in milliseconds.
    pub duration_ms: f64,
}

impl Transition {
    /// Creates a transition with the given overlap.
    pub fn new(kind: TransitionKind, duration_ms: f64) -> Self {
        Self { kind, duration_ms }
    }
}

/// The xfade operator set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Fade,
    WipeLeft,
    WipeRight,
    WipeUp,
    WipeDown,
    SlideLeft,
    SlideRight,
    SlideUp,
    SlideDown,
    CircleCrop,
    RectCrop,
    Distance,
    FadeBlack,
    FadeWhite,
    Radial,
    SmoothLeft,
    SmoothRight,
    SmoothUp,
    SmoothDown,
    CircleOpen,
    CircleClose,
    VertOpen,
    VertClose,
    HorzOpen,
    HorzClose,
    Dissolve,
    Pixelize,
    DiagTl,
    DiagTr,
    DiagBl,
    DiagBr,
    HlSlice,
    HrSlice,
    VuSlice,
    VdSlice,
    HBlur,
    FadeGrays,
    WipeTl,
    WipeTr,
    WipeBl,
    WipeBr,
    SqueezeH,
    SqueezeV,
    ZoomIn,
    HlWind,
    HrWind,
    VuWind,
    VdWind,
    CoverLeft,
    CoverRight,
    CoverUp,
    CoverDown,
    RevealLeft,
    RevealRight,
    RevealUp,
    RevealDown,
}

impl TransitionKind {
    /// Returns the xfade token.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fade => "fade",
            Self::WipeLeft => "wipeleft",
            Self::WipeRight => "wiperight",
            Self::WipeUp => "wipeup",
            Self::WipeDown => "wipedown",
            Self::SlideLeft => "slideleft",
            Self::SlideRight => "slideright",
            Self::SlideUp => "slideup",
            Self::SlideDown => "slidedown",
            Self::CircleCrop => "circlecrop",
            Self::RectCrop => "rectcrop",
            Self::Distance => "distance",
            Self::FadeBlack => "fadeblack",
            Self::FadeWhite => "fadewhite",
            Self::Radial => "radial",
            Self::SmoothLeft => "smoothleft",
            Self::SmoothRight => "smoothright",
            Self::SmoothUp => "smoothup",
            Self::SmoothDown => "smoothdown",
            Self::CircleOpen => "circleopen",
            Self::CircleClose => "circleclose",
            Self::VertOpen => "vertopen",
            Self::VertClose => "vertclose",
            Self::HorzOpen => "horzopen",
            Self::HorzClose => "horzclose",
            Self::Dissolve => "dissolve",
            Self::Pixelize => "pixelize",
            Self::DiagTl => "diagtl",
            Self::DiagTr => "diagtr",
            Self::DiagBl => "diagbl",
            Self::DiagBr => "diagbr",
            Self::HlSlice => "hlslice",
            Self::HrSlice => "hrslice",
            Self::VuSlice => "vuslice",
            Self::VdSlice => "vdslice",
            Self::HBlur => "hblur",
            Self::FadeGrays => "fadegrays",
            Self::WipeTl => "wipetl",
            Self::WipeTr => "wipetr",
            Self::WipeBl => "wipebl",
            Self::WipeBr => "wipebr",
            Self::SqueezeH => "squeezeh",
            Self::SqueezeV => "squeezev",
            Self::ZoomIn => "zoomin",
            Self::HlWind => "hlwind",
            Self::HrWind => "hrwind",
            Self::VuWind => "vuwind",
            Self::VdWind => "vdwind",
            Self::CoverLeft => "coverleft",
            Self::CoverRight => "coverright",
            Self::CoverUp => "coverup",
            Self::CoverDown => "coverdown",
            Self::RevealLeft => "revealleft",
            Self::RevealRight => "revealright",
            Self::RevealUp => "revealup",
            Self::RevealDown => "revealdown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_match_serde_names() {
        for kind in [
            TransitionKind::Fade,
            TransitionKind::SmoothLeft,
            TransitionKind::DiagBr,
            TransitionKind::HlSlice,
            TransitionKind::RevealDown,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn tokens_parse_back() {
        let kind: TransitionKind = serde_json::from_str("\"circlecrop\"").unwrap();
        assert_eq!(kind, TransitionKind::CircleCrop);
        let kind: TransitionKind = serde_json::from_str("\"zoomin\"").unwrap();
        assert_eq!(kind, TransitionKind::ZoomIn);
    }
}
