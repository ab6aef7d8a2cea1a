//! Realtime event delivery core for the Pazar marketplace client.
//!
//! One shared websocket connection per signed-in identity, multiplexing chat
//! messages, typing indicators and notification events out to independent UI
//! consumers. The connection actor owns the transport; everything else talks
//! to it through [`client::RealtimeClient`] and the [`bus::EventBus`].

pub mod bus;
pub mod client;
pub mod connection;
pub mod core;
pub mod notify;
pub mod testing;
pub mod tls;
pub mod transport;
pub mod unread;

pub use bus::{EventBus, SubscriptionToken};
pub use client::RealtimeClient;
pub use connection::{
    Close, EnsureConnected, GetConnectionState, GetConnectionStats, RealtimeConnection,
    RealtimeConnectionArgs, SendFrame,
};
pub use core::{
    ConnectionState, Envelope, EventKind, ExponentialBackoff, RealtimeError, RealtimeResult,
    TokenProvider, WsFrame, should_retry_close,
};
pub use notify::{Notification, map_notification};
pub use unread::{ConversationApi, ConversationSummary, UnreadAggregator, UnreadHandle};
