//! DevTools protocol client.
//!
//! The browser is driven over a single websocket carrying JSON-RPC style
//! messages. [`CdpConnection`] owns the socket and correlates command
//! responses; [`CdpSession`] scopes commands and events to one attached
//! target (a tab); [`launcher`] spawns the browser process and discovers
//! the websocket endpoint.

mod connection;
mod launcher;
mod protocol;
mod session;

pub use connection::CdpConnection;
pub use launcher::{default_executable, launch, LaunchOptions, LaunchedBrowser};
pub use protocol::{CdpError, CdpEvent};
pub use session::CdpSession;

/// Convenient Result alias for protocol operations.
pub type CdpResult<T> = Result<T, CdpError>;
