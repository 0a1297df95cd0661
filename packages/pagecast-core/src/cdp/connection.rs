//! Websocket connection to a browser's DevTools endpoint.
//!
//! One connection per browser process. Commands are correlated by id;
//! events are fanned out to per-session subscribers. A single reader task
//! owns the socket's receive half, a writer task owns the send half, and
//! everything else talks to them through channels.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::protocol::{CdpError, CdpEvent, CommandFrame, IncomingFrame};
use super::CdpResult;

/// Default deadline for a single command round-trip.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Key for event subscribers: a session id, or `""` for browser-level events.
type SubscriberKey = String;

/// A live DevTools connection.
pub struct CdpConnection {
    next_id: AtomicU64,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Arc<DashMap<u64, oneshot::Sender<CdpResult<Value>>>>,
    subscribers: Arc<DashMap<SubscriberKey, mpsc::UnboundedSender<CdpEvent>>>,
}

impl CdpConnection {
    /// Connects to a `ws://` DevTools endpoint and spawns the IO tasks.
    pub async fn connect(ws_url: &str) -> CdpResult<Arc<Self>> {
        let (stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| CdpError::Connect(e.to_string()))?;
        let (mut sink, mut source) = stream.split();

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let pending: Arc<DashMap<u64, oneshot::Sender<CdpResult<Value>>>> =
            Arc::new(DashMap::new());
        let subscribers: Arc<DashMap<SubscriberKey, mpsc::UnboundedSender<CdpEvent>>> =
            Arc::new(DashMap::new());

        let conn = Arc::new(Self {
            next_id: AtomicU64::new(1),
            outgoing,
            pending: pending.clone(),
            subscribers: subscribers.clone(),
        });

        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    log::warn!("[Cdp] Websocket send failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = source.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        Self::route_frame(&pending, &subscribers, &text);
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            // Fail everything still waiting, then drop subscribers so event
            // loops observe the hangup.
            let ids: Vec<u64> = pending.iter().map(|e| *e.key()).collect();
            for id in ids {
                if let Some((_, tx)) = pending.remove(&id) {
                    let _ = tx.send(Err(CdpError::ConnectionClosed));
                }
            }
            subscribers.clear();
            log::debug!("[Cdp] Reader task finished, connection closed");
        });

        Ok(conn)
    }

    fn route_frame(
        pending: &DashMap<u64, oneshot::Sender<CdpResult<Value>>>,
        subscribers: &DashMap<SubscriberKey, mpsc::UnboundedSender<CdpEvent>>,
        text: &str,
    ) {
        let frame: IncomingFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("[Cdp] Unparseable frame: {}", e);
                return;
            }
        };

        if let Some(id) = frame.id {
            if let Some((_, tx)) = pending.remove(&id) {
                let result = match frame.error {
                    Some(err) => Err(CdpError::Protocol {
                        code: err.code,
                        message: err.message,
                    }),
                    None => Ok(frame.result.unwrap_or(Value::Null)),
                };
                let _ = tx.send(result);
            }
            return;
        }

        let Some(method) = frame.method else { return };
        let event = CdpEvent {
            method,
            params: frame.params,
            session_id: frame.session_id.clone(),
        };
        let key = frame.session_id.unwrap_or_default();
        if let Some(tx) = subscribers.get(&key) {
            if tx.send(event).is_err() {
                drop(tx);
                subscribers.remove(&key);
            }
        }
    }

    /// Sends a browser-level command and awaits its result.
    pub async fn send(&self, method: &str, params: Value) -> CdpResult<Value> {
        self.send_inner(method, params, None, COMMAND_TIMEOUT).await
    }

    /// Sends a session-scoped command and awaits its result.
    pub async fn send_to_session(
        &self,
        session_id: &str,
        method: &str,
        params: Value,
    ) -> CdpResult<Value> {
        self.send_inner(method, params, Some(session_id), COMMAND_TIMEOUT)
            .await
    }

    /// Sends a session-scoped command with a custom deadline.
    ///
    /// Used for `beginFrame`, whose stall semantics carry their own,
    /// shorter timeout.
    pub async fn send_to_session_timeout(
        &self,
        session_id: &str,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> CdpResult<Value> {
        self.send_inner(method, params, Some(session_id), timeout)
            .await
    }

    async fn send_inner(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
        timeout: Duration,
    ) -> CdpResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = CommandFrame {
            id,
            method,
            params,
            session_id,
        };
        let text = serde_json::to_string(&frame)?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        if self.outgoing.send(Message::Text(text.into())).is_err() {
            self.pending.remove(&id);
            return Err(CdpError::ConnectionClosed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CdpError::ConnectionClosed),
            Err(_) => {
                self.pending.remove(&id);
                Err(CdpError::Timeout(method.to_string()))
            }
        }
    }

    /// Subscribes to events for one session (or browser-level events with
    /// an empty id). Replaces any previous subscriber for the same key.
    pub fn subscribe(&self, session_id: &str) -> mpsc::UnboundedReceiver<CdpEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(session_id.to_string(), tx);
        rx
    }

    /// Drops the event subscriber for a session.
    pub fn unsubscribe(&self, session_id: &str) {
        self.subscribers.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscribers() -> DashMap<SubscriberKey, mpsc::UnboundedSender<CdpEvent>> {
        DashMap::new()
    }

    #[tokio::test]
    async fn response_routes_to_pending_command() {
        let pending = DashMap::new();
        let (tx, rx) = oneshot::channel();
        pending.insert(5u64, tx);

        CdpConnection::route_frame(&pending, &subscribers(), r#"{"id":5,"result":{"ok":true}}"#);

        let value = rx.await.unwrap().unwrap();
        assert_eq!(value["ok"], true);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn protocol_error_routes_as_err() {
        let pending = DashMap::new();
        let (tx, rx) = oneshot::channel();
        pending.insert(2u64, tx);

        CdpConnection::route_frame(
            &pending,
            &subscribers(),
            r#"{"id":2,"error":{"code":-32601,"message":"unknown method"}}"#,
        );

        match rx.await.unwrap() {
            Err(CdpError::Protocol { code, message }) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "unknown method");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn event_routes_to_session_subscriber() {
        let pending = DashMap::new();
        let subs = subscribers();
        let (tx, mut rx) = mpsc::unbounded_channel();
        subs.insert("S1".to_string(), tx);

        CdpConnection::route_frame(
            &pending,
            &subs,
            r#"{"method":"Page.loadEventFired","params":{"timestamp":1.5},"sessionId":"S1"}"#,
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.method, "Page.loadEventFired");
        assert_eq!(event.session_id.as_deref(), Some("S1"));
    }

    #[tokio::test]
    async fn event_without_subscriber_is_dropped() {
        CdpConnection::route_frame(
            &DashMap::new(),
            &subscribers(),
            r#"{"method":"Target.targetCreated","params":{}}"#,
        );
    }
}
