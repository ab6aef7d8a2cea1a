//! Application-facing facade over the connection actor.
//!
//! One `RealtimeClient` is built at login and torn down at logout; UI
//! consumers share it and never own connection state themselves.

use kameo::prelude::{Actor, ActorRef};
use tokio::sync::watch;
use tracing::debug;

use crate::bus::EventBus;
use crate::connection::{
    Close, EnsureConnected, GetConnectionState, GetConnectionStats, RealtimeConnection,
    RealtimeConnectionArgs, SendFrame, WatchState,
};
use crate::core::{
    ConnectionState, ConnectionStats, EventKind, RealtimeError, RealtimeResult, TokenProvider,
    WsFrame, typing_payload,
};
use crate::transport::WsTransport;

/// Shared handle to the realtime core: the connection actor plus the bus.
pub struct RealtimeClient<P, T>
where
    P: TokenProvider,
    T: WsTransport,
{
    actor: ActorRef<RealtimeConnection<P, T>>,
    bus: EventBus,
    state_rx: watch::Receiver<ConnectionState>,
}

impl<P, T> RealtimeClient<P, T>
where
    P: TokenProvider,
    T: WsTransport,
{
    /// Spawn the connection actor. Call once per login; the connection itself
    /// is opened lazily by the first [`ensure_connected`](Self::ensure_connected).
    pub async fn spawn(args: RealtimeConnectionArgs<P, T>) -> RealtimeResult<Self> {
        let bus = args.bus.clone();
        let actor = RealtimeConnection::spawn(args);
        let state_rx = actor
            .ask(WatchState)
            .await
            .map_err(|err| RealtimeError::ActorError(err.to_string()))?;
        Ok(Self {
            actor,
            bus,
            state_rx,
        })
    }

    /// Idempotent: a no-op while already connecting or connected.
    pub async fn ensure_connected(&self) -> RealtimeResult<()> {
        self.actor
            .tell(EnsureConnected)
            .send()
            .await
            .map_err(|err| RealtimeError::ActorError(err.to_string()))
    }

    /// Intentional close: suppresses retries and is terminal. Bound to logout.
    pub async fn shutdown(self) -> RealtimeResult<()> {
        self.actor
            .tell(Close { intentional: true })
            .send()
            .await
            .map_err(|err| RealtimeError::ActorError(err.to_string()))?;
        debug!("realtime client shut down");
        self.actor
            .stop_gracefully()
            .await
            .map_err(|err| RealtimeError::ActorError(err.to_string()))?;
        Ok(())
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Consumers observe state transitions here, including the forced-logout
    /// signal (`ClosedFatal` after an authentication rejection).
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub async fn connection_state(&self) -> RealtimeResult<ConnectionState> {
        self.actor
            .ask(GetConnectionState)
            .await
            .map_err(|err| RealtimeError::ActorError(err.to_string()))
    }

    pub async fn connection_stats(&self) -> RealtimeResult<ConnectionStats> {
        self.actor
            .ask(GetConnectionStats)
            .await
            .map_err(|err| RealtimeError::ActorError(err.to_string()))
    }

    /// Send a raw frame over the duplex connection (queued while not open).
    pub async fn send(&self, frame: WsFrame) -> RealtimeResult<()> {
        self.actor
            .ask(SendFrame(frame))
            .await
            .map_err(|err| RealtimeError::ActorError(err.to_string()))
    }

    /// Publish a typing indicator for the chat panel.
    pub async fn send_typing(&self, conversation_id: i64, active: bool) -> RealtimeResult<()> {
        let kind = if active {
            EventKind::TypingStart
        } else {
            EventKind::TypingStop
        };
        self.send(WsFrame::text(typing_payload(kind, conversation_id)))
            .await
    }

    /// Raw actor handle for advanced call sites and tests.
    pub fn actor_ref(&self) -> &ActorRef<RealtimeConnection<P, T>> {
        &self.actor
    }
}
