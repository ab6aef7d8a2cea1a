use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream};

use crate::core::{RealtimeError, WebSocketBufferConfig, WsFrame, WsTlsConfig};

pub mod tungstenite;

/// Future returned by [`WsTransport::connect`].
pub type WsTransportConnectFuture<R, W> =
    Pin<Box<dyn Future<Output = Result<(R, W), RealtimeError>> + Send>>;

/// Transport boundary for websocket IO.
///
/// The connection actor owns state and policy; the transport only produces a
/// frame stream and sink. Kept minimal so the production tungstenite transport
/// and the in-memory test transport are interchangeable.
///
/// A handshake rejected by the server with an HTTP status must surface as
/// [`RealtimeError::HandshakeRejected`] so the actor can distinguish
/// authentication failures (fatal) from transient connect errors (retried).
pub trait WsTransport: Clone + Send + Sync + 'static {
    type Reader: Stream<Item = Result<WsFrame, RealtimeError>> + Send + Unpin + 'static;
    type Writer: Sink<WsFrame, Error = RealtimeError> + Send + Sync + Unpin + 'static;

    fn connect(
        &self,
        url: String,
        buffers: WebSocketBufferConfig,
        tls: WsTlsConfig,
    ) -> WsTransportConnectFuture<Self::Reader, Self::Writer>;
}
