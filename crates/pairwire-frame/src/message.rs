use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FrameError, Result};

/// A message tagged with a label for subscriber-based dispatch.
///
/// The label is an exact-match textual tag; no normalization is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutedMessage {
    pub label: String,
    pub payload: Value,
}

impl RoutedMessage {
    pub fn new(label: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            label: label.into(),
            payload: payload.into(),
        }
    }
}

/// Cooperative shutdown sentinel.
///
/// Only the two constants exist: [`DisconnectSignal::NOTICE`] ("I am
/// closing") and [`DisconnectSignal::ACK`] (the reply).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DisconnectSignal {
    acknowledgement: bool,
}

impl DisconnectSignal {
    pub const NOTICE: Self = Self {
        acknowledgement: false,
    };
    pub const ACK: Self = Self {
        acknowledgement: true,
    };

    pub fn is_acknowledgement(&self) -> bool {
        self.acknowledgement
    }
}

/// One unit of application data, as delivered to the receiving side.
///
/// Values are compared structurally; nothing about identity survives the
/// wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Plain structured data.
    Value(Value),
    /// Labeled data for the router.
    Routed(RoutedMessage),
}

impl Message {
    /// Wrap any JSON value.
    pub fn value(value: impl Into<Value>) -> Self {
        Message::Value(value.into())
    }

    /// Build a routed message.
    pub fn routed(label: impl Into<String>, payload: impl Into<Value>) -> Self {
        Message::Routed(RoutedMessage::new(label, payload))
    }

    /// Serialize an arbitrary type into a plain message.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Message::Value)
            .map_err(FrameError::Encode)
    }

    /// Deserialize the message body (the value, or the routed payload).
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(self.body()).map_err(FrameError::Decode)
    }

    /// The structured body: the value itself, or the routed payload.
    pub fn body(&self) -> &Value {
        match self {
            Message::Value(value) => value,
            Message::Routed(routed) => &routed.payload,
        }
    }

    /// The route label, for routed messages.
    pub fn label(&self) -> Option<&str> {
        match self {
            Message::Value(_) => None,
            Message::Routed(routed) => Some(&routed.label),
        }
    }

    /// Short kind name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Value(_) => "value",
            Message::Routed(_) => "routed",
        }
    }
}

impl From<Value> for Message {
    fn from(value: Value) -> Self {
        Message::Value(value)
    }
}

impl From<RoutedMessage> for Message {
    fn from(routed: RoutedMessage) -> Self {
        Message::Routed(routed)
    }
}

/// The wire envelope carried in each frame payload.
///
/// ```text
/// {"type":"value","body":<json>}
/// {"type":"routed","body":{"label":"..","payload":<json>}}
/// {"type":"disconnect","body":{"acknowledgement":false}}
/// ```
///
/// An unknown `type` tag is a decode error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum Packet {
    Value(Value),
    Routed(RoutedMessage),
    Disconnect(DisconnectSignal),
}

impl Packet {
    /// Application message carried by this packet, `None` for disconnect signals.
    pub fn into_message(self) -> Option<Message> {
        match self {
            Packet::Value(value) => Some(Message::Value(value)),
            Packet::Routed(routed) => Some(Message::Routed(routed)),
            Packet::Disconnect(_) => None,
        }
    }
}

impl From<Message> for Packet {
    fn from(message: Message) -> Self {
        match message {
            Message::Value(value) => Packet::Value(value),
            Message::Routed(routed) => Packet::Routed(routed),
        }
    }
}

impl From<DisconnectSignal> for Packet {
    fn from(signal: DisconnectSignal) -> Self {
        Packet::Disconnect(signal)
    }
}
