//! Reusable test utilities for exercising the connection actor without a real
//! socket, including server-side drops, scripted handshake failures, and a
//! scripted conversations endpoint for the unread aggregator.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Sink;
use tokio::sync::{Semaphore, mpsc};

use crate::core::{
    RealtimeError, RealtimeResult, TokenProvider, WebSocketBufferConfig, WsFrame, WsTlsConfig,
};
use crate::transport::{WsTransport, WsTransportConnectFuture};
use crate::unread::{ConversationApi, ConversationSummary};

/// In-memory transport whose every `connect` yields a fresh session, so tests
/// can emulate server behavior across reconnects.
#[derive(Clone)]
pub struct MockTransport {
    sessions_tx: mpsc::UnboundedSender<MockSession>,
    connects: Arc<AtomicUsize>,
    /// Handshake results to consume before connects start succeeding.
    handshake_script: Arc<Mutex<VecDeque<RealtimeError>>>,
}

impl MockTransport {
    /// Build a transport plus the server-side gateway handle.
    pub fn gateway() -> (Self, MockGateway) {
        let (sessions_tx, sessions_rx) = mpsc::unbounded_channel();
        (
            Self {
                sessions_tx,
                connects: Arc::new(AtomicUsize::new(0)),
                handshake_script: Arc::new(Mutex::new(VecDeque::new())),
            },
            MockGateway { sessions_rx },
        )
    }

    /// Queue a handshake failure consumed by the next `connect` call.
    pub fn fail_next_handshake(&self, error: RealtimeError) {
        self.handshake_script
            .lock()
            .expect("handshake script lock")
            .push_back(error);
    }

    /// Number of `connect` calls observed (including failed handshakes).
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl WsTransport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn connect(
        &self,
        _url: String,
        _buffers: WebSocketBufferConfig,
        _tls: WsTlsConfig,
    ) -> WsTransportConnectFuture<Self::Reader, Self::Writer> {
        let sessions_tx = self.sessions_tx.clone();
        let connects = self.connects.clone();
        let script = self.handshake_script.clone();
        Box::pin(async move {
            connects.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = script.lock().expect("handshake script lock").pop_front() {
                return Err(err);
            }

            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            let (sent_tx, sent_rx) = mpsc::unbounded_channel();
            let session = MockSession {
                outbound_rx: sent_rx,
                inbound_tx: Some(inbound_tx),
            };
            sessions_tx.send(session).map_err(|_| {
                RealtimeError::InvalidState("mock gateway dropped".to_string())
            })?;
            Ok((MockReader { rx: inbound_rx }, MockWriter { sent_tx }))
        })
    }
}

/// Server-side handle: yields one [`MockSession`] per successful connect.
pub struct MockGateway {
    sessions_rx: mpsc::UnboundedReceiver<MockSession>,
}

impl MockGateway {
    pub async fn next_session(&mut self) -> Option<MockSession> {
        self.sessions_rx.recv().await
    }
}

/// One live mock connection, driven from the test.
pub struct MockSession {
    outbound_rx: mpsc::UnboundedReceiver<WsFrame>,
    inbound_tx: Option<mpsc::UnboundedSender<WsFrame>>,
}

impl MockSession {
    /// Receive a frame written by the actor.
    pub async fn recv_outbound(&mut self) -> Option<WsFrame> {
        self.outbound_rx.recv().await
    }

    /// Push an inbound frame to the actor.
    pub fn send_inbound(&self, frame: WsFrame) -> bool {
        self.inbound_tx
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }

    /// Push a UTF-8 payload as websocket text.
    pub fn send_text(&self, text: impl AsRef<str>) -> bool {
        self.send_inbound(WsFrame::Text(Bytes::from(text.as_ref().to_owned())))
    }

    /// Send a close frame with the given code.
    pub fn send_close(&self, code: u16) -> bool {
        self.send_inbound(WsFrame::close(code, Bytes::new()))
    }

    /// Simulate a server-side socket drop by closing the inbound channel.
    pub fn drop_socket(&mut self) {
        self.inbound_tx = None;
    }
}

/// Reader side for [`MockTransport`].
pub struct MockReader {
    rx: mpsc::UnboundedReceiver<WsFrame>,
}

impl futures_util::Stream for MockReader {
    type Item = Result<WsFrame, RealtimeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.rx).poll_recv(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(frame))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Writer side for [`MockTransport`].
pub struct MockWriter {
    sent_tx: mpsc::UnboundedSender<WsFrame>,
}

impl Sink<WsFrame> for MockWriter {
    type Error = RealtimeError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        self.get_mut()
            .sent_tx
            .send(item)
            .map_err(|_| RealtimeError::TransportError {
                context: "mock_transport_write",
                error: "mock outbound channel closed".to_string(),
            })
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Token provider with a fixed token.
#[derive(Clone, Debug)]
pub struct StaticToken(pub &'static str);

impl TokenProvider for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        Some(self.0.to_owned())
    }
}

/// Token provider simulating a signed-out identity.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoToken;

impl TokenProvider for NoToken {
    fn bearer_token(&self) -> Option<String> {
        None
    }
}

/// Scripted conversations endpoint for aggregator tests.
///
/// Responses are served in order; once the script is exhausted, the last
/// successful snapshot repeats. An optional gate holds each fetch until the
/// test releases a permit, to exercise coalescing and bootstrap races.
#[derive(Clone)]
pub struct ScriptedConversationApi {
    responses: Arc<Mutex<VecDeque<Result<Vec<ConversationSummary>, String>>>>,
    last_ok: Arc<Mutex<Vec<ConversationSummary>>>,
    fetches: Arc<AtomicUsize>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedConversationApi {
    pub fn new(responses: Vec<Result<Vec<ConversationSummary>, String>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into_iter().collect())),
            last_ok: Arc::new(Mutex::new(Vec::new())),
            fetches: Arc::new(AtomicUsize::new(0)),
            gate: None,
        }
    }

    /// Gate every fetch behind a permit; use [`release`](Self::release).
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn push_response(&self, response: Result<Vec<ConversationSummary>, String>) {
        self.responses
            .lock()
            .expect("responses lock")
            .push_back(response);
    }
}

impl ConversationApi for ScriptedConversationApi {
    async fn fetch_summaries(&self) -> RealtimeResult<Vec<ConversationSummary>> {
        if let Some(gate) = &self.gate {
            let permit = gate.acquire().await.expect("gate closed");
            permit.forget();
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().expect("responses lock").pop_front();
        match next {
            Some(Ok(summaries)) => {
                *self.last_ok.lock().expect("last_ok lock") = summaries.clone();
                Ok(summaries)
            }
            Some(Err(message)) => Err(RealtimeError::FetchFailed(message)),
            None => Ok(self.last_ok.lock().expect("last_ok lock").clone()),
        }
    }
}

/// Shorthand for building summaries in tests.
pub fn summary(id: i64, unread: u64) -> ConversationSummary {
    ConversationSummary {
        id,
        unread_count_for_current_user: unread,
    }
}
