use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream};

use crate::core::{BufferConfig, GatewayError, WsFrame};

pub mod tungstenite;

pub type TransportConnectFuture<R, W> =
    Pin<Box<dyn Future<Output = Result<(R, W), GatewayError>> + Send>>;

/// Transport boundary for the gateway engine.
///
/// The engine consumes a ready-to-use framed message channel: one stream of
/// inbound frames, one sink of outbound frames. TLS, the HTTP upgrade, and
/// frame-level concerns all live behind this trait, so the whole protocol
/// machine can run against an in-memory pair in tests.
///
/// `connect` is invoked again for every reconnect attempt, each call
/// yielding an independent reader/writer pair.
pub trait GatewayTransport: Clone + Send + Sync + 'static {
    type Reader: Stream<Item = Result<WsFrame, GatewayError>> + Send + Unpin + 'static;
    type Writer: Sink<WsFrame, Error = GatewayError> + Send + Unpin + 'static;

    fn connect(
        &self,
        url: String,
        buffers: BufferConfig,
    ) -> TransportConnectFuture<Self::Reader, Self::Writer>;
}
