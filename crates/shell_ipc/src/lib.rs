//! Message bus between the host process and a window's content process.
//!
//! Channels are named; each endpoint keeps at most one active listener per
//! channel and delivery is FIFO within a channel. Replies travel back on the
//! channel the request arrived on.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

// ============================================================================
// Error Types (7000+ range - shell_window uses 6000)
// ============================================================================

/// Error codes for bus operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum IpcErrorCode {
    /// Channel send error
    ChannelSend = 7000,
    /// Channel receive error
    ChannelRecv = 7001,
    /// Window not found
    WindowNotFound = 7002,
}

/// Custom error type for bus operations
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("[{code}] Channel send error: {message}")]
    ChannelSend { code: u32, message: String },

    #[error("[{code}] Channel receive error: {message}")]
    ChannelRecv { code: u32, message: String },

    #[error("[{code}] Window not found: {window_id}")]
    WindowNotFound { code: u32, window_id: String },
}

impl IpcError {
    pub fn channel_send(message: impl Into<String>) -> Self {
        Self::ChannelSend {
            code: IpcErrorCode::ChannelSend as u32,
            message: message.into(),
        }
    }

    pub fn channel_recv(message: impl Into<String>) -> Self {
        Self::ChannelRecv {
            code: IpcErrorCode::ChannelRecv as u32,
            message: message.into(),
        }
    }

    pub fn window_not_found(window_id: impl Into<String>) -> Self {
        Self::WindowNotFound {
            code: IpcErrorCode::WindowNotFound as u32,
            window_id: window_id.into(),
        }
    }
}

// ============================================================================
// Data Types
// ============================================================================

/// One message on the wire between an endpoint pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: String,
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(channel: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            channel: channel.into(),
            payload,
        }
    }
}

/// Inbound envelope tagged with its originating window, as forwarded into
/// the host control loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcEvent {
    pub window_id: String,
    #[serde(flatten)]
    pub envelope: Envelope,
}

// ============================================================================
// Endpoint
// ============================================================================

/// Queue capacity used for endpoint pairs unless a caller picks its own.
pub const DEFAULT_CAPACITY: usize = 256;

type Handler = Box<dyn FnMut(&ReplyCtx<'_>, serde_json::Value) + Send>;

/// Handler invocation context. Carries the inbound channel name and the
/// return path to the originating side.
///
/// Correlation is by channel name only: a reply goes to whichever listener
/// the counterpart has registered for that name at delivery time. With
/// several requests in flight on one channel there is no way to address a
/// specific one; receivers see whatever arrives next on that name.
pub struct ReplyCtx<'a> {
    channel: &'a str,
    out: &'a mpsc::Sender<Envelope>,
}

impl ReplyCtx<'_> {
    pub fn channel(&self) -> &str {
        self.channel
    }

    /// Send a reply on the channel the request arrived on.
    pub fn reply(&self, payload: serde_json::Value) -> Result<(), IpcError> {
        self.out
            .try_send(Envelope::new(self.channel, payload))
            .map_err(|e| IpcError::channel_send(e.to_string()))
    }
}

/// One side of a host/content bus pair.
pub struct Endpoint {
    out_tx: mpsc::Sender<Envelope>,
    in_rx: Option<mpsc::Receiver<Envelope>>,
    handlers: HashMap<String, Handler>,
}

impl Endpoint {
    /// Create a connected pair of endpoints. Each direction gets its own
    /// queue, so FIFO per channel follows from FIFO per direction.
    pub fn pair(capacity: usize) -> (Endpoint, Endpoint) {
        let (a_tx, a_rx) = mpsc::channel(capacity);
        let (b_tx, b_rx) = mpsc::channel(capacity);
        (
            Endpoint {
                out_tx: a_tx,
                in_rx: Some(b_rx),
                handlers: HashMap::new(),
            },
            Endpoint {
                out_tx: b_tx,
                in_rx: Some(a_rx),
                handlers: HashMap::new(),
            },
        )
    }

    /// Register `handler` for inbound messages on `channel`. A second
    /// registration on the same channel replaces the first; there is no
    /// fan-out.
    pub fn listen<F>(&mut self, channel: impl Into<String>, handler: F)
    where
        F: FnMut(&ReplyCtx<'_>, serde_json::Value) + Send + 'static,
    {
        let channel = channel.into();
        if self.handlers.insert(channel.clone(), Box::new(handler)).is_some() {
            tracing::debug!(channel = %channel, "Replacing bus listener");
        }
    }

    /// Enqueue `payload` for asynchronous delivery to the counterpart.
    pub fn send(
        &self,
        channel: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<(), IpcError> {
        self.out_tx
            .try_send(Envelope::new(channel, payload))
            .map_err(|e| IpcError::channel_send(e.to_string()))
    }

    /// Receive the next inbound envelope. Returns `None` once the peer
    /// endpoint is gone or after the receiver was taken for forwarding.
    pub async fn recv(&mut self) -> Option<Envelope> {
        match self.in_rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Detach the inbound receiver so a forwarder task can drain it into
    /// the control loop. Dispatch then happens via [`Endpoint::dispatch`].
    pub fn take_receiver(&mut self) -> Option<mpsc::Receiver<Envelope>> {
        self.in_rx.take()
    }

    /// Invoke the registered handler for an inbound envelope on the calling
    /// thread. Returns whether a handler was present; an unlistened channel
    /// drops the message.
    pub fn dispatch(&mut self, envelope: Envelope) -> bool {
        match self.handlers.get_mut(&envelope.channel) {
            Some(handler) => {
                let ctx = ReplyCtx {
                    channel: &envelope.channel,
                    out: &self.out_tx,
                };
                handler(&ctx, envelope.payload);
                true
            }
            None => {
                tracing::debug!(
                    channel = %envelope.channel,
                    "No listener registered, dropping message"
                );
                false
            }
        }
    }

    /// Drain inbound messages through the registered handlers until the
    /// peer endpoint is gone.
    pub async fn pump(&mut self) {
        while let Some(envelope) = self.recv().await {
            self.dispatch(envelope);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_error_codes() {
        assert_eq!(IpcErrorCode::ChannelSend as u32, 7000);
        assert_eq!(IpcErrorCode::ChannelRecv as u32, 7001);
        assert_eq!(IpcErrorCode::WindowNotFound as u32, 7002);
    }

    #[test]
    fn test_error_display() {
        let err = IpcError::channel_send("test error");
        assert!(err.to_string().contains("7000"));
        assert!(err.to_string().contains("test error"));

        let err = IpcError::window_not_found("win-1");
        assert!(err.to_string().contains("7002"));
        assert!(err.to_string().contains("win-1"));
    }

    #[test]
    fn test_ipc_event_serialization() {
        let event = IpcEvent {
            window_id: "win-1".to_string(),
            envelope: Envelope::new("test-channel", json!({"key": "value"})),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("win-1"));
        assert!(json.contains("test-channel"));

        let parsed: IpcEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.window_id, "win-1");
        assert_eq!(parsed.envelope.channel, "test-channel");
    }

    #[test]
    fn test_last_registration_wins() {
        let (mut host, content) = Endpoint::pair(8);
        let seen: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let first = seen.clone();
        host.listen("x", move |_ctx, _payload| {
            first.lock().unwrap().push("first");
        });
        let second = seen.clone();
        host.listen("x", move |_ctx, _payload| {
            second.lock().unwrap().push("second");
        });

        host.dispatch(Envelope::new("x", json!(1)));
        assert_eq!(*seen.lock().unwrap(), vec!["second"]);
        drop(content);
    }

    #[test]
    fn test_unlistened_channel_dropped() {
        let (mut host, _content) = Endpoint::pair(8);
        assert!(!host.dispatch(Envelope::new("nobody-home", json!(null))));
    }

    #[test]
    fn test_send_after_peer_dropped() {
        let (host, content) = Endpoint::pair(8);
        drop(content);
        let err = host.send("x", json!(1)).unwrap_err();
        assert!(err.to_string().contains("7000"));
    }

    #[tokio::test]
    async fn test_channel_isolation_and_order() {
        let (mut host, content) = Endpoint::pair(32);

        for i in 0..4 {
            content.send("a", json!(i)).unwrap();
        }
        for i in 0..3 {
            content.send("b", json!(i * 10)).unwrap();
        }

        let on_a: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
        let on_b: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
        let a = on_a.clone();
        host.listen("a", move |_ctx, payload| {
            a.lock().unwrap().push(payload.as_i64().unwrap());
        });
        let b = on_b.clone();
        host.listen("b", move |_ctx, payload| {
            b.lock().unwrap().push(payload.as_i64().unwrap());
        });

        for _ in 0..7 {
            let envelope = host.recv().await.unwrap();
            host.dispatch(envelope);
        }

        assert_eq!(*on_a.lock().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(*on_b.lock().unwrap(), vec![0, 10, 20]);
    }

    #[tokio::test]
    async fn test_reply_travels_on_request_channel() {
        let (mut host, mut content) = Endpoint::pair(8);

        host.listen("x", |ctx, payload| {
            assert_eq!(ctx.channel(), "x");
            ctx.reply(json!({ "echo": payload })).unwrap();
        });

        let got: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = got.clone();
        content.listen("x", move |_ctx, payload| {
            sink.lock().unwrap().push(payload);
        });

        content.send("x", json!("ping")).unwrap();

        let request = host.recv().await.unwrap();
        host.dispatch(request);
        let reply = content.recv().await.unwrap();
        content.dispatch(reply);

        assert_eq!(*got.lock().unwrap(), vec![json!({ "echo": "ping" })]);
    }
}
