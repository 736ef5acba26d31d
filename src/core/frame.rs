use bytes::Bytes;

/// Transport-neutral websocket frame.
///
/// Transports convert their native frame representation into/from this type;
/// nothing above the transport layer sees tungstenite types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsFrame {
    Text(Bytes),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<WsCloseFrame>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsCloseFrame {
    pub code: u16,
    pub reason: Bytes,
}

impl WsFrame {
    /// Build a text frame from an owned UTF-8 payload.
    #[inline]
    pub fn text(payload: impl Into<String>) -> Self {
        Self::Text(Bytes::from(payload.into()))
    }

    #[inline]
    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        Self::Close(Some(WsCloseFrame {
            code,
            reason: Bytes::from(reason.into()),
        }))
    }
}

impl WsCloseFrame {
    pub fn reason_text(&self) -> String {
        String::from_utf8_lossy(self.reason.as_ref()).into_owned()
    }
}

/// Borrow the payload bytes of a frame without allocation.
#[inline]
pub fn frame_bytes(frame: &WsFrame) -> Option<&[u8]> {
    match frame {
        WsFrame::Text(bytes)
        | WsFrame::Binary(bytes)
        | WsFrame::Ping(bytes)
        | WsFrame::Pong(bytes) => Some(bytes.as_ref()),
        WsFrame::Close(_) => None,
    }
}
