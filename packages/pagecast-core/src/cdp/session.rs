//! Per-target protocol session.
//!
//! A session scopes commands and events to one attached target (a tab).
//! Created through `Target.attachToTarget` with flat protocol mode.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::connection::CdpConnection;
use super::protocol::{CdpError, CdpEvent};
use super::CdpResult;

/// A flat-mode session attached to one target.
#[derive(Clone)]
pub struct CdpSession {
    conn: Arc<CdpConnection>,
    session_id: String,
    target_id: String,
}

impl CdpSession {
    /// Creates a new page target and attaches to it.
    pub async fn create_page(conn: Arc<CdpConnection>) -> CdpResult<Self> {
        let created = conn
            .send("Target.createTarget", json!({ "url": "about:blank" }))
            .await?;
        let target_id = created["targetId"]
            .as_str()
            .ok_or(CdpError::ConnectionClosed)?
            .to_string();
        Self::attach(conn, target_id).await
    }

    /// Attaches to an existing target.
    pub async fn attach(conn: Arc<CdpConnection>, target_id: String) -> CdpResult<Self> {
        let attached = conn
            .send(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let session_id = attached["sessionId"]
            .as_str()
            .ok_or(CdpError::ConnectionClosed)?
            .to_string();
        Ok(Self {
            conn,
            session_id,
            target_id,
        })
    }

    /// The session id used for command scoping.
    pub fn id(&self) -> &str {
        &self.session_id
    }

    /// The attached target id.
    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// The owning connection.
    pub fn connection(&self) -> &Arc<CdpConnection> {
        &self.conn
    }

    /// Sends a command scoped to this session.
    pub async fn send(&self, method: &str, params: Value) -> CdpResult<Value> {
        self.conn
            .send_to_session(&self.session_id, method, params)
            .await
    }

    /// Sends a command with a custom deadline.
    pub async fn send_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> CdpResult<Value> {
        self.conn
            .send_to_session_timeout(&self.session_id, method, params, timeout)
            .await
    }

    /// Subscribes to this session's events.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CdpEvent> {
        self.conn.subscribe(&self.session_id)
    }

    /// Closes the target and drops the event subscription.
    pub async fn close(&self) -> CdpResult<()> {
        self.conn.unsubscribe(&self.session_id);
        self.conn
            .send("Target.closeTarget", json!({ "targetId": self.target_id }))
            .await?;
        Ok(())
    }
}
