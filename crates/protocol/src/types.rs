//! Core types shared across the protocol

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Command sent once per connection to announce identity and restore subscriptions.
pub const CMD_INIT: &str = "init";
pub const CMD_SUBSCRIBE: &str = "subscribe";
pub const CMD_UNSUBSCRIBE: &str = "unsubscribe";
/// Server reply fanned out to a channel after a member joins.
pub const CMD_ON_SUBSCRIBE: &str = "onSubscribe";
pub const CMD_ON_UNSUBSCRIBE: &str = "onUnsubscribe";
pub const CMD_ON_DISCONNECT: &str = "onDisconnect";

/// Envelope type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// Data plane, routed to `onReceive`
    Message,
    /// Control plane, routed by `data.command`
    Command,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Message => "message",
            EnvelopeKind::Command => "command",
        }
    }
}

/// The wire envelope.
///
/// `type` and `channel` are optional at the serde level so that a frame
/// missing either still decodes; routing decides what to do with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EnvelopeKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    /// `data.msg` of a message envelope
    pub fn msg(&self) -> Option<&Value> {
        self.data.get("msg")
    }

    /// `data.command` of a command envelope
    pub fn command(&self) -> Option<&str> {
        self.data.get("command").and_then(Value::as_str)
    }

    /// True only when `data.notMe` is the boolean `true`.
    pub fn not_me(&self) -> bool {
        matches!(self.data.get("notMe"), Some(Value::Bool(true)))
    }

    /// `data.options`, or `Value::Null` when absent
    pub fn options(&self) -> Value {
        self.data.get("options").cloned().unwrap_or(Value::Null)
    }

    /// Server-side rejection text, if the server flagged this frame as failed.
    pub fn server_error(&self) -> Option<&str> {
        match self.success {
            Some(false) => Some(self.error.as_deref().unwrap_or("unspecified server error")),
            _ => None,
        }
    }
}

/// `data` payload of a command envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandData {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_me: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,
}

impl CommandData {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            options: None,
            not_me: None,
            channels: None,
        }
    }
}

/// A raw inbound frame as handed over by the transport.
///
/// Some transports deliver text, others already parsed JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Json(Value),
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Frame::Text(text)
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Frame::Text(text.to_string())
    }
}

impl From<Value> for Frame {
    fn from(value: Value) -> Self {
        Frame::Json(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_data_uses_camel_case_not_me() {
        let mut data = CommandData::new("typing");
        data.options = Some(json!({}));
        data.not_me = Some(true);

        let value = serde_json::to_value(&data).expect("serialize");
        assert_eq!(
            value,
            json!({"command": "typing", "options": {}, "notMe": true})
        );
    }

    #[test]
    fn not_me_requires_boolean_true() {
        let mut envelope: Envelope = serde_json::from_value(json!({
            "type": "command",
            "channel": "chat",
            "data": {"command": "typing", "notMe": "true"}
        }))
        .expect("parse");
        assert!(!envelope.not_me());

        envelope.data.insert("notMe".into(), Value::Bool(true));
        assert!(envelope.not_me());
    }

    #[test]
    fn server_error_only_when_success_is_false() {
        let envelope: Envelope = serde_json::from_value(json!({
            "type": "message",
            "success": false,
            "error": "Client has not sent init command yet!"
        }))
        .expect("parse");
        assert_eq!(
            envelope.server_error(),
            Some("Client has not sent init command yet!")
        );

        let ok: Envelope =
            serde_json::from_value(json!({"type": "message", "success": true})).expect("parse");
        assert!(ok.server_error().is_none());
    }
}
