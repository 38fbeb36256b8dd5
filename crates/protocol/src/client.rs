//! Client → Server envelopes

use serde_json::{Map, Value};

use crate::types::*;

/// Build an envelope. The payload is opaque here; no shape checks.
pub fn encode(
    kind: EnvelopeKind,
    channel: Option<&str>,
    identity: Option<&str>,
    data: Map<String, Value>,
) -> Envelope {
    Envelope {
        kind: Some(kind),
        channel: channel.map(str::to_string),
        identity: identity.map(str::to_string),
        data,
        timestamp: None,
        success: None,
        error: None,
    }
}

fn command(channel: Option<&str>, identity: Option<&str>, data: CommandData) -> Envelope {
    let data = match serde_json::to_value(data) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    encode(EnvelopeKind::Command, channel, identity, data)
}

/// `init` command carrying the previously persisted subscriptions.
pub fn init(identity: Option<&str>, channels: &[String]) -> Envelope {
    let mut data = CommandData::new(CMD_INIT);
    data.channels = Some(channels.to_vec());
    command(None, identity, data)
}

pub fn subscribe(channel: &str, identity: Option<&str>) -> Envelope {
    command(Some(channel), identity, CommandData::new(CMD_SUBSCRIBE))
}

pub fn unsubscribe(channel: &str, identity: Option<&str>) -> Envelope {
    command(Some(channel), identity, CommandData::new(CMD_UNSUBSCRIBE))
}

/// `message` envelope with `data = {msg}`.
pub fn publish(channel: &str, identity: Option<&str>, msg: Value) -> Envelope {
    let mut data = Map::new();
    data.insert("msg".to_string(), msg);
    encode(EnvelopeKind::Message, Some(channel), identity, data)
}

/// Custom command forwarded by the server to every member of `channel`.
pub fn trigger(
    channel: &str,
    identity: Option<&str>,
    event: &str,
    options: Value,
    not_me: bool,
) -> Envelope {
    let mut data = CommandData::new(event);
    data.options = Some(options);
    data.not_me = Some(not_me);
    command(Some(channel), identity, data)
}
