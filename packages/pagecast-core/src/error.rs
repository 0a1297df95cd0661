//! Centralized error types for the Pagecast core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps subsystem errors into a single application-wide error
//! - Provides machine-readable error codes for job reports

use thiserror::Error;

use crate::cdp::CdpError;
use crate::encode::EncodeError;
use crate::pool::PoolError;
use crate::preprocess::PreprocessError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for job reports.
    fn code(&self) -> &'static str;
}

impl ErrorCode for CdpError {
    fn code(&self) -> &'static str {
        match self {
            Self::Connect(_) => "devtools_connect_failed",
            Self::Transport(_) => "devtools_transport_failed",
            Self::Protocol { .. } => "devtools_protocol_error",
            Self::Timeout(_) => "devtools_command_timeout",
            Self::ConnectionClosed => "devtools_connection_closed",
            Self::Serialize(_) => "devtools_serialize_error",
        }
    }
}

impl ErrorCode for PoolError {
    fn code(&self) -> &'static str {
        match self {
            Self::Exhausted => "pool_exhausted",
            Self::Closed => "pool_closed",
            Self::Create(_) => "pool_create_failed",
        }
    }
}

impl ErrorCode for PreprocessError {
    fn code(&self) -> &'static str {
        match self {
            Self::Download(_) => "media_download_failed",
            Self::UnsupportedMime(_) => "media_unsupported_mime",
            Self::Transcode(_) => "media_transcode_failed",
            Self::Probe(_) => "media_probe_failed",
            Self::Timeout(_) => "media_preprocess_timeout",
            Self::Payload(_) => "media_payload_invalid",
            Self::Io(_) => "media_io_error",
        }
    }
}

impl ErrorCode for EncodeError {
    fn code(&self) -> &'static str {
        match self {
            Self::Spawn(_) => "encoder_spawn_failed",
            Self::Pipe(_) => "encoder_pipe_failed",
            Self::Exit { .. } => "encoder_exit_failure",
            Self::HardwareSupport(_) => "encoder_hardware_unsupported",
            Self::InvalidOptions(_) => "encoder_invalid_options",
        }
    }
}

/// Application-wide error type for Pagecast rendering.
#[derive(Debug, Error)]
pub enum PagecastError {
    /// Browser process launch or teardown failed.
    #[error("Browser error: {0}")]
    Browser(String),

    /// DevTools protocol command or transport failed.
    #[error("DevTools error: {0}")]
    Cdp(#[from] CdpError),

    /// Page-level failure (navigation, injection, capture).
    #[error("Page error: {0}")]
    Page(String),

    /// The page renderer stalled (beginFrame or frame acquisition timeout).
    #[error("Renderer stall: {0}")]
    RendererStall(String),

    /// Resource pool acquisition failed.
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Media preprocessing failed (download, transcode, payload).
    #[error("Preprocess error: {0}")]
    Preprocess(#[from] PreprocessError),

    /// Encoder subprocess failed.
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Invalid render or pool configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An uncaught error surfaced from page code during capture.
    #[error("Page threw: [{code}] {message}")]
    PageThrew { code: String, message: String },

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PagecastError {
    /// Returns a machine-readable error code for job reports.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Browser(_) => "browser_error",
            Self::Cdp(e) => e.code(),
            Self::Page(_) => "page_error",
            Self::RendererStall(_) => "renderer_stall",
            Self::Pool(e) => e.code(),
            Self::Preprocess(e) => e.code(),
            Self::Encode(e) => e.code(),
            Self::Configuration(_) => "configuration_error",
            Self::PageThrew { .. } => "page_threw",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether the error is fatal for the page that produced it.
    ///
    /// Fatal errors mark the page `Unavailabled`; the owning pool will not
    /// hand it out again.
    pub fn is_page_fatal(&self) -> bool {
        matches!(
            self,
            Self::RendererStall(_) | Self::Cdp(CdpError::ConnectionClosed) | Self::PageThrew { .. }
        )
    }
}

/// Convenient Result alias for application-wide operations.
pub type PagecastResult<T> = Result<T, PagecastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renderer_stall_is_page_fatal() {
        let err = PagecastError::RendererStall("beginFrame timed out after 5s".into());
        assert!(err.is_page_fatal());
        assert_eq!(err.code(), "renderer_stall");
    }

    #[test]
    fn pool_error_maps_to_code() {
        let err = PagecastError::from(PoolError::Exhausted);
        assert_eq!(err.code(), "pool_exhausted");
        assert!(!err.is_page_fatal());
    }

    #[test]
    fn cdp_timeout_keeps_subsystem_code() {
        let err = PagecastError::from(CdpError::Timeout("HeadlessExperimental.beginFrame".into()));
        assert_eq!(err.code(), "devtools_command_timeout");
    }
}
