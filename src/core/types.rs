use std::time::Duration;

use thiserror::Error;

/// Convenience result alias for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Canonical error surface for the realtime core.
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("Authentication rejected{}", status.map(|s| format!(" (http {s})")).unwrap_or_default())]
    AuthRejected { status: Option<u16> },

    #[error("Transport error ({context}): {error}")]
    TransportError {
        context: &'static str,
        error: String,
    },

    #[error("Handshake rejected: http {status}")]
    HandshakeRejected { status: u16 },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Actor error: {0}")]
    ActorError(String),

    #[error("REST fetch failed: {0}")]
    FetchFailed(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Backpressure: outbound queue full")]
    OutboundQueueFull,
}

/// Lifecycle states of the single shared connection.
///
/// Transitions:
/// `Idle -> Connecting` on the first ensure-connected,
/// `Connecting -> Open` on handshake success,
/// `Connecting | Open -> ClosedRetryable` on a retryable close (a single retry
/// timer re-enters `Connecting`),
/// `any -> ClosingIntentional -> ClosedFatal` on explicit logout,
/// `any -> ClosedFatal` on auth rejection or a clean remote close.
/// `ClosedFatal` is terminal; a fresh login builds a fresh client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, kameo::Reply)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    ClosingIntentional,
    ClosedRetryable,
    ClosedFatal,
}

/// Cause of a connection loss, carried alongside the human-readable reason.
#[derive(Debug, Clone)]
pub enum DisconnectCause {
    /// Remote sent a close frame (code absent for no-status closes).
    RemoteClosed { code: Option<u16> },
    /// The read half returned an error.
    ReadFailure { error: String },
    /// The stream ended without a close frame.
    StreamEnded,
    /// The connect attempt itself failed (non-auth).
    ConnectFailed { error: String },
    /// Local write/teardown error.
    InternalError { context: String, error: String },
}

/// Supplies the current bearer credential at connect time.
///
/// Token issuance and refresh are owned by the application's auth layer; the
/// connection actor only reads the latest value when (re)opening the socket.
pub trait TokenProvider: Send + Sync + 'static {
    fn bearer_token(&self) -> Option<String>;
}

impl TokenProvider for String {
    fn bearer_token(&self) -> Option<String> {
        Some(self.clone())
    }
}

/// Transport-independent buffer sizing parameters.
#[derive(Clone, Copy, Debug)]
pub struct WebSocketBufferConfig {
    pub read_buffer_bytes: usize,
    pub write_buffer_bytes: usize,
    pub max_write_buffer_bytes: usize,
    pub max_message_bytes: usize,
    pub max_frame_bytes: usize,
}

impl Default for WebSocketBufferConfig {
    fn default() -> Self {
        Self {
            // Chat/notification envelopes are small; 1 MiB leaves ample slack.
            read_buffer_bytes: 1024 * 1024,
            write_buffer_bytes: 64 << 10,
            max_write_buffer_bytes: 128 << 10,
            max_message_bytes: 1024 * 1024,
            max_frame_bytes: 1024 * 1024,
        }
    }
}

/// TLS configuration for websocket connections.
///
/// Safe-by-default: certificate validation is enabled unless explicitly
/// disabled for development environments.
#[derive(Clone, Copy, Debug)]
pub struct WsTlsConfig {
    pub validate_certs: bool,
}

impl Default for WsTlsConfig {
    fn default() -> Self {
        Self {
            validate_certs: true,
        }
    }
}

/// Timing knobs for the connection actor.
#[derive(Clone, Copy, Debug)]
pub struct ReconnectConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
        }
    }
}
