use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame as WireCloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{
    Connector, MaybeTlsStream, WebSocketStream,
    connect_async_tls_with_config as tungstenite_connect,
};

use crate::core::{BufferConfig, GatewayError, WsCloseFrame, WsFrame};
use crate::transport::{GatewayTransport, TransportConnectFuture};

type WireStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// rustls 0.23 needs a process-level CryptoProvider choice. When multiple
/// dependencies enable both providers (`ring` and `aws-lc-rs`), rustls
/// cannot infer a default and panics on the first TLS config build, so the
/// transport installs ring once before connecting.
fn install_rustls_crypto_provider() {
    static INSTALLED: std::sync::OnceLock<()> = std::sync::OnceLock::new();
    INSTALLED.get_or_init(|| {
        // Returns Err if something else in the process won the race; fine.
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

fn transport_error(context: &'static str, err: tungstenite::Error) -> GatewayError {
    GatewayError::Transport {
        context,
        error: err.to_string(),
    }
}

/// Lift a wire message into the engine's frame type.
fn from_wire(message: Message) -> WsFrame {
    match message {
        Message::Text(text) => WsFrame::Text(AsRef::<Bytes>::as_ref(&text).clone()),
        Message::Binary(bytes) => WsFrame::Binary(bytes),
        Message::Ping(bytes) => WsFrame::Ping(bytes),
        Message::Pong(bytes) => WsFrame::Pong(bytes),
        Message::Close(close) => WsFrame::Close(close.map(|frame| WsCloseFrame {
            code: frame.code.into(),
            reason: AsRef::<Bytes>::as_ref(&frame.reason).clone(),
        })),
        // tungstenite only yields raw frames when frame assembly is turned
        // off, which this transport never does
        Message::Frame(_) => WsFrame::Binary(Bytes::new()),
    }
}

/// Lower an engine frame onto the wire. Text payloads are revalidated
/// instead of trusted (a copy, but outbound frames are small JSON), and
/// anything that fails the check goes out as binary.
fn into_wire(frame: WsFrame) -> Message {
    match frame {
        WsFrame::Text(bytes) => match std::str::from_utf8(bytes.as_ref()) {
            Ok(text) => Message::text(text.to_owned()),
            Err(_) => Message::Binary(bytes),
        },
        WsFrame::Binary(bytes) => Message::Binary(bytes),
        WsFrame::Ping(bytes) => Message::Ping(bytes),
        WsFrame::Pong(bytes) => Message::Pong(bytes),
        WsFrame::Close(close) => Message::Close(close.map(|frame| WireCloseFrame {
            code: frame.code.into(),
            reason: frame.reason_text().into(),
        })),
    }
}

/// Production transport backed by tokio-tungstenite.
///
/// Holds an optional TLS connector; by default tungstenite's bundled rustls
/// setup with native roots is used.
#[derive(Clone, Default)]
pub struct TungsteniteTransport {
    connector: Option<Connector>,
}

impl TungsteniteTransport {
    pub fn with_connector(connector: Connector) -> Self {
        Self {
            connector: Some(connector),
        }
    }

    pub fn rustls(config: Arc<rustls::ClientConfig>) -> Self {
        Self::with_connector(Connector::Rustls(config))
    }
}

/// Inbound half: decodes each wire message as it is polled through.
pub struct TungsteniteReader {
    inner: SplitStream<WireStream>,
}

impl Stream for TungsteniteReader {
    type Item = Result<WsFrame, GatewayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let message = ready!(Pin::new(&mut self.inner).poll_next(cx));
        Poll::Ready(message.map(|result| {
            result
                .map(from_wire)
                .map_err(|err| transport_error("read", err))
        }))
    }
}

/// Outbound half: encodes engine frames on their way into the sink.
pub struct TungsteniteWriter {
    inner: SplitSink<WireStream, Message>,
}

impl TungsteniteWriter {
    fn sink(self: Pin<&mut Self>) -> Pin<&mut SplitSink<WireStream, Message>> {
        Pin::new(&mut self.get_mut().inner)
    }
}

impl Sink<WsFrame> for TungsteniteWriter {
    type Error = GatewayError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.sink()
            .poll_ready(cx)
            .map_err(|err| transport_error("write", err))
    }

    fn start_send(self: Pin<&mut Self>, frame: WsFrame) -> Result<(), Self::Error> {
        self.sink()
            .start_send(into_wire(frame))
            .map_err(|err| transport_error("write", err))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.sink()
            .poll_flush(cx)
            .map_err(|err| transport_error("write", err))
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.sink()
            .poll_close(cx)
            .map_err(|err| transport_error("write", err))
    }
}

impl GatewayTransport for TungsteniteTransport {
    type Reader = TungsteniteReader;
    type Writer = TungsteniteWriter;

    fn connect(
        &self,
        url: String,
        buffers: BufferConfig,
    ) -> TransportConnectFuture<Self::Reader, Self::Writer> {
        let connector = self.connector.clone();
        Box::pin(async move {
            install_rustls_crypto_provider();

            let config = WebSocketConfig::default()
                .max_message_size(Some(buffers.max_message_bytes.max(buffers.read_buffer_bytes)))
                .max_frame_size(Some(buffers.max_frame_bytes.max(buffers.read_buffer_bytes)))
                .write_buffer_size(buffers.write_buffer_bytes)
                .max_write_buffer_size(buffers.max_write_buffer_bytes);

            let (stream, _) = tungstenite_connect(url, Some(config), false, connector)
                .await
                .map_err(|e| transport_error("connect", e))?;

            let (write, read) = stream.split();
            Ok((
                TungsteniteReader { inner: read },
                TungsteniteWriter { inner: write },
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frames_round_trip_through_the_wire_types() {
        let frame = WsFrame::text(r#"{"op":1,"d":null}"#.to_string());
        assert_eq!(from_wire(into_wire(frame.clone())), frame);
    }

    #[test]
    fn close_frames_keep_code_and_reason() {
        let frame = WsFrame::close(4000, "unknown error");
        assert_eq!(from_wire(into_wire(frame.clone())), frame);
    }

    #[test]
    fn invalid_utf8_text_is_demoted_to_binary() {
        let frame = WsFrame::Text(Bytes::from_static(&[0xff, 0xfe]));
        assert!(matches!(into_wire(frame), Message::Binary(_)));
    }
}
