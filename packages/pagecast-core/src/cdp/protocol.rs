//! Wire types for the DevTools protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors arising from the protocol transport or the browser itself.
#[derive(Debug, Error)]
pub enum CdpError {
    /// Initial websocket connection failed.
    #[error("failed to connect to DevTools endpoint: {0}")]
    Connect(String),

    /// The websocket errored mid-session.
    #[error("DevTools transport error: {0}")]
    Transport(String),

    /// The browser rejected a command.
    #[error("DevTools command failed ({code}): {message}")]
    Protocol { code: i64, message: String },

    /// A command response did not arrive within its deadline.
    #[error("DevTools command timed out: {0}")]
    Timeout(String),

    /// The connection closed while commands were outstanding.
    #[error("DevTools connection closed")]
    ConnectionClosed,

    /// Message (de)serialization failed.
    #[error("DevTools message serialization failed: {0}")]
    Serialize(String),
}

impl From<serde_json::Error> for CdpError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialize(err.to_string())
    }
}

/// An outgoing command frame.
#[derive(Debug, Serialize)]
pub(crate) struct CommandFrame<'a> {
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
    #[serde(skip_serializing_if = "Option::is_none", rename = "sessionId")]
    pub session_id: Option<&'a str>,
}

/// Error payload inside a response frame.
#[derive(Debug, Deserialize)]
pub(crate) struct ResponseError {
    pub code: i64,
    pub message: String,
}

/// Any incoming frame: a command response (has `id`) or an event.
#[derive(Debug, Deserialize)]
pub(crate) struct IncomingFrame {
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ResponseError>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
}

/// A protocol event, optionally scoped to a session.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    /// Event name, e.g. `Fetch.requestPaused`.
    pub method: String,
    /// Event payload.
    pub params: Value,
    /// Session the event belongs to; `None` for browser-level events.
    pub session_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_frame_serializes_with_session() {
        let frame = CommandFrame {
            id: 7,
            method: "Page.enable",
            params: serde_json::json!({}),
            session_id: Some("ABC"),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["method"], "Page.enable");
        assert_eq!(json["sessionId"], "ABC");
    }

    #[test]
    fn command_frame_omits_missing_session() {
        let frame = CommandFrame {
            id: 1,
            method: "Target.getTargets",
            params: serde_json::json!({}),
            session_id: None,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(!json.contains("sessionId"));
    }

    #[test]
    fn incoming_frame_distinguishes_response_and_event() {
        let response: IncomingFrame =
            serde_json::from_str(r#"{"id":3,"result":{"frameId":"F"}}"#).unwrap();
        assert_eq!(response.id, Some(3));
        assert!(response.result.is_some());

        let event: IncomingFrame = serde_json::from_str(
            r#"{"method":"Fetch.requestPaused","params":{"requestId":"R"},"sessionId":"S"}"#,
        )
        .unwrap();
        assert_eq!(event.id, None);
        assert_eq!(event.method.as_deref(), Some("Fetch.requestPaused"));
        assert_eq!(event.session_id.as_deref(), Some("S"));
    }

    #[test]
    fn error_response_parses() {
        let frame: IncomingFrame =
            serde_json::from_str(r#"{"id":9,"error":{"code":-32000,"message":"nope"}}"#).unwrap();
        let err = frame.error.unwrap();
        assert_eq!(err.code, -32000);
        assert_eq!(err.message, "nope");
    }
}
