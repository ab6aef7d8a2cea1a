use bytes::Bytes;

/// Transport-neutral websocket frame.
///
/// Transports convert their native frame representation into/from `WsFrame`;
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
    #[inline]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(Bytes::from(s.into()))
    }

    #[inline]
    pub fn close(code: u16, reason: Bytes) -> Self {
        Self::Close(Some(WsCloseFrame { code, reason }))
    }
}

/// Borrow the underlying bytes from data frames without allocation.
#[inline]
pub fn frame_bytes(frame: &WsFrame) -> Option<&[u8]> {
    match frame {
        WsFrame::Text(bytes) => Some(bytes.as_ref()),
        WsFrame::Binary(bytes) => Some(bytes.as_ref()),
        WsFrame::Ping(bytes) => Some(bytes.as_ref()),
        WsFrame::Pong(bytes) => Some(bytes.as_ref()),
        WsFrame::Close(_) => None,
    }
}
