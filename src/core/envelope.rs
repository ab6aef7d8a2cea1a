use std::time::Instant;

use serde::Deserialize;
use sonic_rs::{JsonValueTrait, Value};

use super::types::RealtimeError;

/// Closed set of event kinds carried over the wire.
///
/// Unknown kinds are a handled case at decode time (logged and ignored), not
/// an error, so future backend event kinds cannot break existing consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessageNew,
    ConversationUpdate,
    NotificationNew,
    TypingStart,
    TypingStop,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::MessageNew => "message.new",
            EventKind::ConversationUpdate => "conversation.update",
            EventKind::NotificationNew => "notification.new",
            EventKind::TypingStart => "typing.start",
            EventKind::TypingStop => "typing.stop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "message.new" => Some(EventKind::MessageNew),
            "conversation.update" => Some(EventKind::ConversationUpdate),
            "notification.new" => Some(EventKind::NotificationNew),
            "typing.start" => Some(EventKind::TypingStart),
            "typing.stop" => Some(EventKind::TypingStop),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded inbound event. Transient: consumed synchronously by the bus.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub kind: EventKind,
    pub payload: Value,
    /// Local receipt time, stamped at decode. Latency-sensitive consumers
    /// (typing indicators) can discard envelopes that sat in a backlog.
    pub received_at: Instant,
}

impl Envelope {
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self {
            kind,
            payload,
            received_at: Instant::now(),
        }
    }
}

/// Outcome of decoding one inbound text frame.
#[derive(Debug)]
pub enum DecodeOutcome {
    Event(Envelope),
    /// Valid envelope whose `event` string is not in the closed set.
    UnknownKind(String),
}

#[derive(Deserialize)]
struct WireEnvelope {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Decode a wire frame `{"event": "<kind>", "data": {...}}`.
///
/// Malformed content is an error the caller drops with a diagnostic; it never
/// tears down the connection.
pub fn decode_envelope(bytes: &[u8]) -> Result<DecodeOutcome, RealtimeError> {
    let wire: WireEnvelope = sonic_rs::from_slice(bytes)
        .map_err(|err| RealtimeError::MalformedFrame(err.to_string()))?;
    match EventKind::parse(&wire.event) {
        Some(kind) => Ok(DecodeOutcome::Event(Envelope::new(kind, wire.data))),
        None => Ok(DecodeOutcome::UnknownKind(wire.event)),
    }
}

/// Typed view of a `message.new` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageNew {
    pub conversation_id: i64,
    pub sender_name: Option<String>,
    pub content: String,
}

impl MessageNew {
    pub fn from_payload(payload: &Value) -> Option<Self> {
        Some(Self {
            conversation_id: payload.get("conversationId").as_i64()?,
            sender_name: payload.get("senderName").as_str().map(str::to_owned),
            content: payload.get("content").as_str()?.to_owned(),
        })
    }
}

/// Typed view of `typing.start` / `typing.stop` payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingEvent {
    pub conversation_id: i64,
}

impl TypingEvent {
    pub fn from_payload(payload: &Value) -> Option<Self> {
        Some(Self {
            conversation_id: payload.get("conversationId").as_i64()?,
        })
    }
}

/// Build an outbound typing-indicator frame.
pub fn typing_payload(kind: EventKind, conversation_id: i64) -> String {
    debug_assert!(matches!(
        kind,
        EventKind::TypingStart | EventKind::TypingStop
    ));
    format!(
        "{{\"event\":\"{}\",\"data\":{{\"conversationId\":{}}}}}",
        kind.as_str(),
        conversation_id
    )
}
