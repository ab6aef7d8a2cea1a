//! Connection actor owning the single shared websocket.
//!
//! The IO loop runs outside kameo for throughput; the actor owns connection
//! state and policy and receives frames via messages, so every state mutation
//! happens on the actor's mailbox and no locking is needed.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage, WeakActorRef};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::core::{
    ConnectionState, ConnectionStats, DecodeOutcome, DisconnectCause, ExponentialBackoff,
    RealtimeError, RealtimeResult, StatsTracker, TokenProvider, WebSocketBufferConfig, WsFrame,
    decode_envelope, frame_bytes, should_retry_close, WsTlsConfig,
};
use crate::transport::WsTransport;

const CLOSE_NORMAL: u16 = 1000;

/// Arguments for constructing a connection actor.
pub struct RealtimeConnectionArgs<P, T>
where
    P: TokenProvider,
    T: WsTransport,
{
    /// Endpoint without credentials; the bearer token is appended at connect
    /// time as a `token` query parameter.
    pub url: String,
    pub token_provider: P,
    pub transport: T,
    pub backoff: ExponentialBackoff,
    pub bus: EventBus,
    pub ws_buffers: WebSocketBufferConfig,
    pub tls: WsTlsConfig,
    pub outbound_capacity: usize,
}

/// Actor owning the one live connection per authenticated identity.
///
/// Only this actor mutates connection state; consumers interact through
/// `EnsureConnected`/`Close` messages and the event bus, never by holding the
/// transport.
pub struct RealtimeConnection<P, T>
where
    P: TokenProvider,
    T: WsTransport,
{
    url: String,
    token_provider: P,
    transport: T,
    backoff: ExponentialBackoff,
    bus: EventBus,
    ws_buffers: WebSocketBufferConfig,
    tls: WsTlsConfig,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    attempt: u32,
    stats: StatsTracker,
    actor_ref: ActorRef<Self>,
    writer: Option<T::Writer>,
    reader_task: Option<JoinHandle<()>>,
    retry_task: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    pending_outbound: VecDeque<WsFrame>,
    outbound_capacity: usize,
}

impl<P, T> Actor for RealtimeConnection<P, T>
where
    P: TokenProvider,
    T: WsTransport,
{
    type Args = RealtimeConnectionArgs<P, T>;
    type Error = RealtimeError;

    fn name() -> &'static str {
        "RealtimeConnection"
    }

    async fn on_start(args: Self::Args, ctx: ActorRef<Self>) -> RealtimeResult<Self> {
        let RealtimeConnectionArgs {
            url,
            token_provider,
            transport,
            backoff,
            bus,
            ws_buffers,
            tls,
            outbound_capacity,
        } = args;

        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            url,
            token_provider,
            transport,
            backoff,
            bus,
            ws_buffers,
            tls,
            state: ConnectionState::Idle,
            state_tx,
            attempt: 0,
            stats: StatsTracker::new(),
            actor_ref: ctx,
            writer: None,
            reader_task: None,
            retry_task: None,
            shutdown_tx,
            shutdown_rx,
            pending_outbound: VecDeque::with_capacity(outbound_capacity),
            outbound_capacity,
        })
    }

    async fn on_stop(
        &mut self,
        _ctx: WeakActorRef<Self>,
        _reason: kameo::error::ActorStopReason,
    ) -> RealtimeResult<()> {
        self.abort_retry();
        self.stop_io_tasks().await;
        Ok(())
    }
}

// ---- control surface -------------------------------------------------------

/// Idempotent connect request: a no-op while Connecting or Open.
#[derive(Debug, Clone, Copy)]
pub struct EnsureConnected;

/// Close the connection. `intentional` suppresses any retry and is terminal.
#[derive(Debug, Clone, Copy)]
pub struct Close {
    pub intentional: bool,
}

/// Send a frame; queued (bounded) while the connection is not yet open.
#[derive(Debug)]
pub struct SendFrame(pub WsFrame);

/// Current lifecycle state.
#[derive(Debug, Clone, Copy)]
pub struct GetConnectionState;

/// Counters snapshot.
#[derive(Debug, Clone, Copy)]
pub struct GetConnectionStats;

/// Obtain a watch on state transitions (badge/logout observers).
#[derive(Debug, Clone, Copy)]
pub struct WatchState;

// ---- internal events (reader loop / connect task -> actor) -----------------

struct Established<TR: WsTransport>(TR::Reader, TR::Writer);

struct ConnectFailed {
    error: RealtimeError,
}

struct Disconnected {
    cause: DisconnectCause,
}

struct Inbound(WsFrame);

struct RetryNow;

impl<P, T> KameoMessage<EnsureConnected> for RealtimeConnection<P, T>
where
    P: TokenProvider,
    T: WsTransport,
{
    type Reply = ();

    async fn handle(
        &mut self,
        _msg: EnsureConnected,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Open => {
                debug!(state = ?self.state, "ensure-connected is a no-op");
            }
            ConnectionState::ClosedFatal | ConnectionState::ClosingIntentional => {
                warn!(
                    state = ?self.state,
                    "ensure-connected after fatal close; a fresh login must build a fresh client"
                );
            }
            ConnectionState::Idle | ConnectionState::ClosedRetryable => {
                self.begin_connect();
            }
        }
    }
}

impl<P, T> KameoMessage<Close> for RealtimeConnection<P, T>
where
    P: TokenProvider,
    T: WsTransport,
{
    type Reply = ();

    async fn handle(&mut self, msg: Close, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        if msg.intentional {
            if self.state == ConnectionState::ClosedFatal {
                return; // already torn down; close is idempotent
            }
            self.set_state(ConnectionState::ClosingIntentional);
            self.abort_retry();
            if let Some(writer) = self.writer.as_mut() {
                let frame = WsFrame::close(CLOSE_NORMAL, bytes::Bytes::from_static(b"logout"));
                if let Err(err) = writer.send(frame).await {
                    debug!(error = %err, "close frame send failed during intentional close");
                }
            }
            self.stop_io_tasks().await;
            self.set_state(ConnectionState::ClosedFatal);
            info!("connection closed intentionally");
        } else {
            self.stop_io_tasks().await;
            if self.state != ConnectionState::ClosedFatal {
                self.set_state(ConnectionState::ClosedRetryable);
                self.schedule_retry();
            }
        }
    }
}

impl<P, T> KameoMessage<SendFrame> for RealtimeConnection<P, T>
where
    P: TokenProvider,
    T: WsTransport,
{
    type Reply = RealtimeResult<()>;

    async fn handle(
        &mut self,
        msg: SendFrame,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.enqueue_frame(msg.0).await
    }
}

impl<P, T> KameoMessage<GetConnectionState> for RealtimeConnection<P, T>
where
    P: TokenProvider,
    T: WsTransport,
{
    type Reply = ConnectionState;

    async fn handle(
        &mut self,
        _msg: GetConnectionState,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.state
    }
}

impl<P, T> KameoMessage<GetConnectionStats> for RealtimeConnection<P, T>
where
    P: TokenProvider,
    T: WsTransport,
{
    type Reply = ConnectionStats;

    async fn handle(
        &mut self,
        _msg: GetConnectionStats,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.stats.snapshot()
    }
}

impl<P, T> KameoMessage<WatchState> for RealtimeConnection<P, T>
where
    P: TokenProvider,
    T: WsTransport,
{
    type Reply = watch::Receiver<ConnectionState>;

    async fn handle(
        &mut self,
        _msg: WatchState,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.state_tx.subscribe()
    }
}

impl<P, T> KameoMessage<Established<T>> for RealtimeConnection<P, T>
where
    P: TokenProvider,
    T: WsTransport,
{
    type Reply = ();

    async fn handle(
        &mut self,
        msg: Established<T>,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        // A late handshake completing after an intentional close must not
        // resurrect the connection.
        if self.state != ConnectionState::Connecting {
            debug!(state = ?self.state, "dropping stale handshake result");
            return;
        }
        self.on_open(msg.0, msg.1).await;
    }
}

impl<P, T> KameoMessage<ConnectFailed> for RealtimeConnection<P, T>
where
    P: TokenProvider,
    T: WsTransport,
{
    type Reply = ();

    async fn handle(
        &mut self,
        msg: ConnectFailed,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.state != ConnectionState::Connecting {
            return;
        }
        self.fail_connect(msg.error);
    }
}

impl<P, T> KameoMessage<Disconnected> for RealtimeConnection<P, T>
where
    P: TokenProvider,
    T: WsTransport,
{
    type Reply = ();

    async fn handle(
        &mut self,
        msg: Disconnected,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.state == ConnectionState::ClosingIntentional
            || self.state == ConnectionState::ClosedFatal
        {
            // Reader unwinding after an intentional close; nothing to do.
            return;
        }

        self.stop_io_tasks().await;

        let retry = match &msg.cause {
            DisconnectCause::RemoteClosed { code } => should_retry_close(*code),
            DisconnectCause::ReadFailure { .. }
            | DisconnectCause::StreamEnded
            | DisconnectCause::ConnectFailed { .. }
            | DisconnectCause::InternalError { .. } => true,
        };

        if retry {
            warn!(cause = ?msg.cause, attempt = self.attempt, "connection lost, will retry");
            self.set_state(ConnectionState::ClosedRetryable);
            self.schedule_retry();
        } else {
            info!(cause = ?msg.cause, "remote closed cleanly, not retrying");
            self.set_state(ConnectionState::ClosedFatal);
        }
    }
}

impl<P, T> KameoMessage<Inbound> for RealtimeConnection<P, T>
where
    P: TokenProvider,
    T: WsTransport,
{
    type Reply = ();

    async fn handle(&mut self, msg: Inbound, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let Some(bytes) = frame_bytes(&msg.0) else {
            return;
        };
        match decode_envelope(bytes) {
            Ok(DecodeOutcome::Event(envelope)) => {
                self.stats.record_event();
                self.bus.publish(&envelope);
            }
            Ok(DecodeOutcome::UnknownKind(kind)) => {
                self.stats.record_dropped_frame();
                debug!(kind = %kind, "dropping event of unknown kind");
            }
            Err(err) => {
                self.stats.record_dropped_frame();
                warn!(error = %err, len = bytes.len(), "dropping malformed frame");
            }
        }
    }
}

impl<P, T> KameoMessage<RetryNow> for RealtimeConnection<P, T>
where
    P: TokenProvider,
    T: WsTransport,
{
    type Reply = ();

    async fn handle(
        &mut self,
        _msg: RetryNow,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.retry_task = None;
        if self.state == ConnectionState::ClosedRetryable {
            self.begin_connect();
        }
    }
}

impl<P, T> RealtimeConnection<P, T>
where
    P: TokenProvider,
    T: WsTransport,
{
    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "connection state transition");
            self.state = state;
            let _ = self.state_tx.send(state);
        }
    }

    /// Classify a failed connect attempt: authentication failures are fatal,
    /// everything else arms the retry timer.
    fn fail_connect(&mut self, error: RealtimeError) {
        match error {
            RealtimeError::HandshakeRejected { status } if status == 401 || status == 403 => {
                warn!(status, "handshake rejected: authentication failure, not retrying");
                self.set_state(ConnectionState::ClosedFatal);
            }
            RealtimeError::AuthRejected { status } => {
                warn!(?status, "authentication rejected, not retrying");
                self.set_state(ConnectionState::ClosedFatal);
            }
            error => {
                warn!(error = %error, attempt = self.attempt, "connect failed");
                self.set_state(ConnectionState::ClosedRetryable);
                self.schedule_retry();
            }
        }
    }

    fn begin_connect(&mut self) {
        let Some(token) = self.token_provider.bearer_token() else {
            self.fail_connect(RealtimeError::AuthRejected { status: None });
            return;
        };

        self.set_state(ConnectionState::Connecting);

        let url = format!("{}?token={}", self.url, token);
        let transport = self.transport.clone();
        let buffers = self.ws_buffers;
        let tls = self.tls;
        let self_ref = self.actor_ref.clone();

        tokio::spawn(async move {
            match transport.connect(url, buffers, tls).await {
                Ok((reader, writer)) => {
                    let _ = self_ref.tell(Established::<T>(reader, writer)).send().await;
                }
                Err(error) => {
                    let _ = self_ref.tell(ConnectFailed { error }).send().await;
                }
            }
        });
    }

    async fn on_open(&mut self, reader: T::Reader, writer: T::Writer) {
        info!(url = %self.url, "websocket connection established");
        if self.attempt > 0 {
            self.stats.record_reconnect();
        }
        self.attempt = 0;
        self.stats.mark_open();
        self.writer = Some(writer);
        self.set_state(ConnectionState::Open);

        let mut shutdown_rx = self.shutdown_rx.clone();
        let actor_ref = self.actor_ref.clone();
        let mut read = reader;

        self.reader_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    res = shutdown_rx.changed() => {
                        if res.is_err() || *shutdown_rx.borrow_and_update() {
                            break;
                        }
                    }
                    frame = read.next() => {
                        match frame {
                            Some(Ok(WsFrame::Close(close))) => {
                                let code = close.as_ref().map(|f| f.code);
                                info!(code = ?code, "received websocket close frame");
                                let _ = actor_ref
                                    .tell(Disconnected {
                                        cause: DisconnectCause::RemoteClosed { code },
                                    })
                                    .send()
                                    .await;
                                break;
                            }
                            Some(Ok(WsFrame::Ping(_))) | Some(Ok(WsFrame::Pong(_))) => {
                                // Control frames carry no envelopes.
                            }
                            Some(Ok(frame)) => {
                                // Frames are forwarded in receipt order; the
                                // mailbox preserves it for bus dispatch.
                                if actor_ref.tell(Inbound(frame)).send().await.is_err() {
                                    break;
                                }
                            }
                            Some(Err(err)) => {
                                let _ = actor_ref
                                    .tell(Disconnected {
                                        cause: DisconnectCause::ReadFailure {
                                            error: err.to_string(),
                                        },
                                    })
                                    .send()
                                    .await;
                                break;
                            }
                            None => {
                                let _ = actor_ref
                                    .tell(Disconnected {
                                        cause: DisconnectCause::StreamEnded,
                                    })
                                    .send()
                                    .await;
                                break;
                            }
                        }
                    }
                }
            }
        }));

        if let Err(err) = self.drain_pending_outbound().await {
            warn!(error = %err, "flushing queued outbound frames failed");
            let _ = self
                .actor_ref
                .tell(Disconnected {
                    cause: DisconnectCause::InternalError {
                        context: "outbound_drain".to_owned(),
                        error: err.to_string(),
                    },
                })
                .send()
                .await;
        }
    }

    /// Schedules a single retry. Never stacks: if a timer is already pending,
    /// this is a no-op.
    fn schedule_retry(&mut self) {
        if self.retry_task.is_some() {
            debug!("retry already pending, not scheduling another");
            return;
        }

        self.attempt = self.attempt.saturating_add(1);
        let delay = self.backoff.delay_for_attempt(self.attempt);
        info!(attempt = self.attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");

        let actor_ref = self.actor_ref.clone();
        self.retry_task = Some(tokio::spawn(async move {
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }
            let _ = actor_ref.tell(RetryNow).send().await;
        }));
    }

    fn abort_retry(&mut self) {
        if let Some(task) = self.retry_task.take() {
            task.abort();
        }
    }

    async fn stop_io_tasks(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.reader_task.take() {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    warn!(error = %err, "reader task terminated abnormally");
                }
            }
        }
        self.writer = None;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = shutdown_tx;
        self.shutdown_rx = shutdown_rx;
    }

    async fn enqueue_frame(&mut self, frame: WsFrame) -> RealtimeResult<()> {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(err) = writer.send(frame).await {
                warn!(error = %err, "outbound send failed");
                let _ = self
                    .actor_ref
                    .tell(Disconnected {
                        cause: DisconnectCause::InternalError {
                            context: "outbound_send".to_owned(),
                            error: err.to_string(),
                        },
                    })
                    .send()
                    .await;
                return Err(RealtimeError::TransportError {
                    context: "outbound_send",
                    error: err.to_string(),
                });
            }
            return Ok(());
        }

        if self.pending_outbound.len() >= self.outbound_capacity {
            return Err(RealtimeError::OutboundQueueFull);
        }
        self.pending_outbound.push_back(frame);
        Ok(())
    }

    async fn drain_pending_outbound(&mut self) -> RealtimeResult<()> {
        while let Some(frame) = self.pending_outbound.pop_front() {
            let Some(writer) = self.writer.as_mut() else {
                return Ok(());
            };
            if let Err(err) = writer.send(frame).await {
                self.pending_outbound.clear();
                return Err(err);
            }
        }
        Ok(())
    }
}
