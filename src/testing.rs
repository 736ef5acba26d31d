//! Reusable test utilities for exercising the session engine without a
//! real socket.
//!
//! [`MockTransport`] pairs with a [`MockGateway`]: every `connect` call on
//! the transport (including reconnects) surfaces a fresh
//! [`MockConnection`] on the gateway side, which tests use to script
//! server behavior: inject frames, observe outbound frames, send close
//! frames, or drop the socket.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures_util::Sink;
use sonic_rs::Value;
use tokio::sync::mpsc;

use crate::core::backoff::ReconnectPolicy;
use crate::core::{BufferConfig, GatewayError, GatewayPhase, WsFrame, frame_bytes};
use crate::gateway::session::GatewaySession;
use crate::transport::{GatewayTransport, TransportConnectFuture};

/// In-memory transport; see the module docs.
#[derive(Clone)]
pub struct MockTransport {
    accept_tx: mpsc::UnboundedSender<MockConnection>,
}

impl MockTransport {
    /// Build a transport + gateway control pair.
    pub fn channel_pair() -> (Self, MockGateway) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (Self { accept_tx }, MockGateway { accept_rx })
    }
}

impl GatewayTransport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn connect(
        &self,
        url: String,
        _buffers: BufferConfig,
    ) -> TransportConnectFuture<Self::Reader, Self::Writer> {
        let accept_tx = self.accept_tx.clone();
        Box::pin(async move {
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            accept_tx
                .send(MockConnection {
                    url,
                    outbound_rx,
                    inbound_tx: Some(inbound_tx),
                })
                .map_err(|_| {
                    GatewayError::ConnectionFailed("mock gateway hung up".to_string())
                })?;
            Ok((
                MockReader { rx: inbound_rx },
                MockWriter { tx: outbound_tx },
            ))
        })
    }
}

/// Server-side control handle paired with [`MockTransport`].
pub struct MockGateway {
    accept_rx: mpsc::UnboundedReceiver<MockConnection>,
}

impl MockGateway {
    /// Wait for the next connection attempt from the engine.
    pub async fn accept(&mut self) -> MockConnection {
        self.accept_rx
            .recv()
            .await
            .expect("mock transport dropped before a connection arrived")
    }

    pub async fn accept_timeout(&mut self, timeout: Duration) -> Option<MockConnection> {
        tokio::time::timeout(timeout, self.accept_rx.recv())
            .await
            .ok()
            .flatten()
    }
}

/// One scripted server-side connection.
pub struct MockConnection {
    url: String,
    outbound_rx: mpsc::UnboundedReceiver<WsFrame>,
    inbound_tx: Option<mpsc::UnboundedSender<WsFrame>>,
}

impl MockConnection {
    /// Request URL the engine connected with.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Receive the next frame the engine wrote.
    pub async fn recv(&mut self) -> Option<WsFrame> {
        self.outbound_rx.recv().await
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<WsFrame> {
        tokio::time::timeout(timeout, self.outbound_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Inject a raw server frame.
    pub fn send_frame(&self, frame: WsFrame) -> bool {
        self.inbound_tx
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }

    /// Inject a JSON text frame.
    pub fn send_json(&self, raw: impl AsRef<str>) -> bool {
        self.send_frame(WsFrame::text(raw.as_ref().to_string()))
    }

    pub fn hello(&self, heartbeat_interval_ms: u64) -> bool {
        self.send_json(format!(
            r#"{{"op":10,"d":{{"heartbeat_interval":{heartbeat_interval_ms}}}}}"#
        ))
    }

    pub fn heartbeat_ack(&self) -> bool {
        self.send_json(r#"{"op":11}"#)
    }

    pub fn dispatch(&self, name: &str, seq: u64, d: &str) -> bool {
        self.send_json(format!(r#"{{"op":0,"t":"{name}","s":{seq},"d":{d}}}"#))
    }

    pub fn invalid_session(&self, resumable: bool) -> bool {
        self.send_json(format!(r#"{{"op":9,"d":{resumable}}}"#))
    }

    pub fn request_reconnect(&self) -> bool {
        self.send_json(r#"{"op":7}"#)
    }

    /// Send a close frame, as the real gateway does before dropping.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.send_frame(WsFrame::close(code, reason))
    }

    /// Drop the server side of the socket without a close frame.
    pub fn sever(&mut self) {
        self.inbound_tx = None;
    }
}

/// Reader half handed to the engine.
pub struct MockReader {
    rx: mpsc::UnboundedReceiver<WsFrame>,
}

impl futures_util::Stream for MockReader {
    type Item = Result<WsFrame, GatewayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.rx).poll_recv(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(frame))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Writer half handed to the engine.
pub struct MockWriter {
    tx: mpsc::UnboundedSender<WsFrame>,
}

impl Sink<WsFrame> for MockWriter {
    type Error = GatewayError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        self.get_mut()
            .tx
            .send(item)
            .map_err(|_| GatewayError::Transport {
                context: "write",
                error: "mock connection closed".to_string(),
            })
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Reconnect policy that never retries; failures surface immediately.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoReconnect;

impl ReconnectPolicy for NoReconnect {
    fn next_delay(&mut self) -> Duration {
        Duration::from_secs(24 * 60 * 60)
    }

    fn reset(&mut self) {}

    fn should_retry(&self) -> bool {
        false
    }
}

/// Opcode of an outbound frame, for wire-level assertions.
pub fn frame_op(frame: &WsFrame) -> Option<u64> {
    use sonic_rs::JsonValueTrait;
    frame_value(frame).and_then(|v| v.get("op").as_u64())
}

/// Parse an outbound frame's JSON payload.
pub fn frame_value(frame: &WsFrame) -> Option<Value> {
    sonic_rs::from_slice(frame_bytes(frame)?).ok()
}

/// Poll the session until it reaches `phase`, panicking on timeout.
pub async fn wait_for_phase<T, R>(
    session: &GatewaySession<T, R>,
    phase: GatewayPhase,
    timeout: Duration,
) where
    T: GatewayTransport,
    R: ReconnectPolicy,
{
    let deadline = Instant::now() + timeout;
    loop {
        match session.phase().await {
            Ok(current) if current == phase => return,
            Ok(_) => {}
            Err(err) => panic!("session went away while waiting for {phase}: {err}"),
        }
        if Instant::now() > deadline {
            panic!("timed out waiting for phase {phase}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
