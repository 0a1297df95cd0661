//! Encoder and container vocabulary.
//!
//! The names map one-to-one onto ffmpeg encoder identifiers. Hardware
//! variants are listed per vendor surface (QSV, AMF, NVENC, OMX, V4L2,
//! VAAPI, VideoToolbox) alongside the CPU encoders.

use serde::{Deserialize, Serialize};

/// Supported output containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mp4,
    Webm,
}

impl OutputFormat {
    /// Returns the container as its file-extension string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
        }
    }
}

/// Codec family produced by an encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecFamily {
    H264,
    H265,
    Vp8,
    Vp9,
}

/// Video encoders, CPU and hardware variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoEncoderKind {
    // CPU
    #[serde(rename = "libx264")]
    Libx264,
    #[serde(rename = "libx265")]
    Libx265,
    #[serde(rename = "libvpx")]
    Libvpx,
    #[serde(rename = "libvpx-vp9")]
    LibvpxVp9,
    // Intel Quick Sync Video
    #[serde(rename = "h264_qsv")]
    H264Qsv,
    #[serde(rename = "hevc_qsv")]
    HevcQsv,
    #[serde(rename = "vp8_qsv")]
    Vp8Qsv,
    #[serde(rename = "vp9_qsv")]
    Vp9Qsv,
    // AMD AMF
    #[serde(rename = "h264_amf")]
    H264Amf,
    #[serde(rename = "h265_amf")]
    H265Amf,
    // NVIDIA NVENC
    #[serde(rename = "h264_nvenc")]
    H264Nvenc,
    #[serde(rename = "hevc_nvenc")]
    HevcNvenc,
    // OpenMAX (Raspberry Pi)
    #[serde(rename = "h264_omx")]
    H264Omx,
    // V4L2 memory-to-memory
    #[serde(rename = "h264_v4l2m2m")]
    H264V4l2m2m,
    // VAAPI
    #[serde(rename = "h264_vaapi")]
    H264Vaapi,
    #[serde(rename = "hevc_vaapi")]
    HevcVaapi,
    #[serde(rename = "vp8_vaapi")]
    Vp8Vaapi,
    #[serde(rename = "vp9_vaapi")]
    Vp9Vaapi,
    // Apple VideoToolbox
    #[serde(rename = "h264_videotoolbox")]
    H264VideoToolbox,
    #[serde(rename = "hevc_videotoolbox")]
    HevcVideoToolbox,
}

impl VideoEncoderKind {
    /// Returns the ffmpeg encoder identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Libx264 => "libx264",
            Self::Libx265 => "libx265",
            Self::Libvpx => "libvpx",
            Self::LibvpxVp9 => "libvpx-vp9",
            Self::H264Qsv => "h264_qsv",
            Self::HevcQsv => "hevc_qsv",
            Self::Vp8Qsv => "vp8_qsv",
            Self::Vp9Qsv => "vp9_qsv",
            Self::H264Amf => "h264_amf",
            Self::H265Amf => "h265_amf",
            Self::H264Nvenc => "h264_nvenc",
            Self::HevcNvenc => "hevc_nvenc",
            Self::H264Omx => "h264_omx",
            Self::H264V4l2m2m => "h264_v4l2m2m",
            Self::H264Vaapi => "h264_vaapi",
            Self::HevcVaapi => "hevc_vaapi",
            Self::Vp8Vaapi => "vp8_vaapi",
            Self::Vp9Vaapi => "vp9_vaapi",
            Self::H264VideoToolbox => "h264_videotoolbox",
            Self::HevcVideoToolbox => "hevc_videotoolbox",
        }
    }

    /// Returns the codec family the encoder produces.
    #[must_use]
    pub const fn family(&self) -> CodecFamily {
        match self {
            Self::Libx264
            | Self::H264Qsv
            | Self::H264Amf
            | Self::H264Nvenc
            | Self::H264Omx
            | Self::H264V4l2m2m
            | Self::H264Vaapi
            | Self::H264VideoToolbox => CodecFamily::H264,
            Self::Libx265
            | Self::HevcQsv
            | Self::H265Amf
            | Self::HevcNvenc
            | Self::HevcVaapi
            | Self::HevcVideoToolbox => CodecFamily::H265,
            Self::Libvpx | Self::Vp8Qsv | Self::Vp8Vaapi => CodecFamily::Vp8,
            Self::LibvpxVp9 | Self::Vp9Qsv | Self::Vp9Vaapi => CodecFamily::Vp9,
        }
    }

    /// Whether the encoder's codec is valid inside the given container.
    #[must_use]
    pub fn supports_format(&self, format: OutputFormat) -> bool {
        match format {
            OutputFormat::Mp4 => matches!(self.family(), CodecFamily::H264 | CodecFamily::H265),
            OutputFormat::Webm => matches!(self.family(), CodecFamily::Vp8 | CodecFamily::Vp9),
        }
    }

    /// Whether the encoder runs through a hardware surface.
    #[must_use]
    pub fn is_hardware(&self) -> bool {
        !matches!(
            self,
            Self::Libx264 | Self::Libx265 | Self::Libvpx | Self::LibvpxVp9
        )
    }

    /// Bitstream filter needed to restream the codec into MPEG-TS.
    ///
    /// VP8 has no transport-stream packing, so VP8 encoders cannot produce
    /// intermediate chunks.
    #[must_use]
    pub const fn chunk_bitstream_filter(&self) -> Option<&'static str> {
        match self.family() {
            CodecFamily::H264 => Some("h264_mp4toannexb"),
            CodecFamily::H265 => Some("hevc_mp4toannexb"),
            CodecFamily::Vp9 => Some("vp9_superframe"),
            CodecFamily::Vp8 => None,
        }
    }
}

/// Audio encoders for the mixing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioEncoderKind {
    #[serde(rename = "aac")]
    Aac,
    #[serde(rename = "libopus")]
    LibOpus,
}

impl AudioEncoderKind {
    /// Returns the ffmpeg encoder identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Aac => "aac",
            Self::LibOpus => "libopus",
        }
    }
}

/// Output pixel formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    #[serde(rename = "yuv420p")]
    Yuv420p,
    /// 4:2:0 with an alpha plane; WebM only.
    #[serde(rename = "yuva420p")]
    Yuva420p,
}

impl PixelFormat {
    /// Returns the ffmpeg pixel-format identifier.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Yuv420p => "yuv420p",
            Self::Yuva420p => "yuva420p",
        }
    }
}

/// Screenshot formats requested from the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    Jpeg,
    Png,
}

impl FrameFormat {
    /// Returns the DevTools screenshot format string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_format_compatibility() {
        assert!(VideoEncoderKind::Libx264.supports_format(OutputFormat::Mp4));
        assert!(!VideoEncoderKind::Libx264.supports_format(OutputFormat::Webm));
        assert!(VideoEncoderKind::LibvpxVp9.supports_format(OutputFormat::Webm));
        assert!(!VideoEncoderKind::HevcNvenc.supports_format(OutputFormat::Webm));
        assert!(VideoEncoderKind::Vp8Vaapi.supports_format(OutputFormat::Webm));
    }

    #[test]
    fn chunk_bitstream_filters() {
        assert_eq!(
            VideoEncoderKind::Libx264.chunk_bitstream_filter(),
            Some("h264_mp4toannexb")
        );
        assert_eq!(
            VideoEncoderKind::HevcVideoToolbox.chunk_bitstream_filter(),
            Some("hevc_mp4toannexb")
        );
        assert_eq!(
            VideoEncoderKind::Vp9Qsv.chunk_bitstream_filter(),
            Some("vp9_superframe")
        );
        assert_eq!(VideoEncoderKind::Libvpx.chunk_bitstream_filter(), None);
    }

    #[test]
    fn serde_names_match_ffmpeg_identifiers() {
        let json = serde_json::to_string(&VideoEncoderKind::LibvpxVp9).unwrap();
        assert_eq!(json, "\"libvpx-vp9\"");
        let back: VideoEncoderKind = serde_json::from_str("\"h264_videotoolbox\"").unwrap();
        assert_eq!(back, VideoEncoderKind::H264VideoToolbox);
    }
}
