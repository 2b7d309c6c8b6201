//! Wire types for the notification socket.
//!
//! Inbound frames are JSON events with at least a `type` field; outbound
//! frames are room subscription directives. Fields this client does not
//! know about are carried opaquely in `extra` so newer backends keep
//! working against older clients.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Event kind tag, parsed from the inbound `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A new message exists in a room. The payload carries ids only; the
    /// message itself must be fetched over HTTP.
    NewMessage,
    /// Any kind this client has no special handling for.
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::NewMessage => "new_message",
            EventKind::Other(kind) => kind,
        }
    }
}

impl From<&str> for EventKind {
    fn from(kind: &str) -> Self {
        match kind {
            "new_message" => EventKind::NewMessage,
            other => EventKind::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let kind = String::deserialize(deserializer)?;
        Ok(EventKind::from(kind.as_str()))
    }
}

/// An inbound notification event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Unknown fields, preserved as opaque pass-through data.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Event {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let event: Event = serde_json::from_str(text)?;
        if event.kind.as_str().is_empty() {
            return Err(serde_json::Error::custom("empty event type"));
        }
        Ok(event)
    }
}

/// An outbound room subscription directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Directive {
    Subscribe { room_id: String },
    Unsubscribe { room_id: String },
}

impl Directive {
    pub fn subscribe(room_id: &str) -> Self {
        Directive::Subscribe {
            room_id: room_id.to_string(),
        }
    }

    pub fn unsubscribe(room_id: &str) -> Self {
        Directive::Unsubscribe {
            room_id: room_id.to_string(),
        }
    }

    pub fn room_id(&self) -> &str {
        match self {
            Directive::Subscribe { room_id } | Directive::Unsubscribe { room_id } => room_id,
        }
    }
}
