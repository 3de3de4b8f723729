use serde::Deserialize;
use serde_json::{Map, Value};

use crate::types::{Message, Participant};

/// A participant reference as it appears on the wire.
///
/// History items carry the sender as a bare username string while realtime
/// frames usually carry `{id, username}` objects. Resolved to [`Participant`]
/// by the normalizer and never stored past it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireParticipant {
    Structured(Participant),
    Bare(String),
    Missing,
}

impl WireParticipant {
    /// Interpret an optional JSON field. Never fails.
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Object(fields)) => Self::Structured(participant_from_fields(fields)),
            Some(Value::String(name)) => Self::Bare(name.clone()),
            Some(Value::Number(number)) => Self::Bare(number.to_string()),
            _ => Self::Missing,
        }
    }
}

/// A raw message record from either the history endpoint or the socket.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "Value")]
pub struct WireMessage {
    /// `message` (realtime), `content` (REST) or `text` (an already
    /// normalized record), first present wins.
    pub text: Option<String>,
    pub sender: WireParticipant,
    pub receiver: WireParticipant,
}

impl WireMessage {
    /// Interpret any JSON value. Non-objects become an empty record.
    pub fn from_value(value: &Value) -> Self {
        let Value::Object(fields) = value else {
            return Self::empty();
        };

        let text = text_field(fields.get("message"))
            .or_else(|| text_field(fields.get("content")))
            .or_else(|| text_field(fields.get("text")));

        Self {
            text,
            sender: WireParticipant::from_value(fields.get("sender")),
            receiver: WireParticipant::from_value(fields.get("receiver")),
        }
    }

    /// Parse a text frame. Returns `None` only when the frame is not JSON.
    pub fn parse_frame(raw: &str) -> Option<Self> {
        serde_json::from_str::<Value>(raw)
            .ok()
            .map(|value| Self::from_value(&value))
    }

    fn empty() -> Self {
        Self {
            text: None,
            sender: WireParticipant::Missing,
            receiver: WireParticipant::Missing,
        }
    }
}

impl From<Value> for WireMessage {
    fn from(value: Value) -> Self {
        Self::from_value(&value)
    }
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self {
            text: Some(message.text.clone()),
            sender: WireParticipant::Structured(message.sender.clone()),
            receiver: message
                .receiver
                .clone()
                .map_or(WireParticipant::Missing, WireParticipant::Structured),
        }
    }
}

fn participant_from_fields(fields: &Map<String, Value>) -> Participant {
    let id = fields.get("id").and_then(|id| match id {
        Value::Number(number) => number.as_u64(),
        Value::String(raw) => raw.trim().parse::<u64>().ok(),
        _ => None,
    });
    let username = fields
        .get("username")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    Participant { id, username }
}

fn text_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
