//! Inbound frame routing and the connection state machine.
//!
//! `dispatch` decodes one frame, resolves the channel's handler set and
//! invokes at most one handler. Nothing escapes: every failure becomes a
//! [`DispatchOutcome::Dropped`] with a log line, and the caller moves on to
//! the next frame. Handlers get the envelope or a [`CommandEvent`], never the
//! session, so a handler cannot re-enter dispatch for the frame it is
//! handling.

use std::fmt;

use switchyard_protocol::{decode, Envelope, EnvelopeKind, Frame};
use tracing::{debug, warn};

use crate::registry::{ChannelRegistry, CommandEvent, ON_RECEIVE};
use crate::sanitize::SanitizeRules;
use crate::timestamp::format_timestamp;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Frame did not decode
    Malformed(String),
    /// `type` or `channel` absent
    Incomplete,
    /// Channel-less frame the server flagged with `success: false`
    ServerError(String),
    UnknownChannel(String),
    /// Command frame without a `data.command` string
    MissingCommand { channel: String },
    MissingHandler { channel: String, handler: String },
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Malformed(e) => write!(f, "malformed envelope: {e}"),
            DropReason::Incomplete => f.write_str("envelope missing type or channel"),
            DropReason::ServerError(e) => write!(f, "server error: {e}"),
            DropReason::UnknownChannel(c) => write!(f, "unknown channel {c:?}"),
            DropReason::MissingCommand { channel } => {
                write!(f, "command frame on {channel:?} has no command name")
            }
            DropReason::MissingHandler { channel, handler } => {
                write!(f, "channel {channel:?} has no {handler:?} handler")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered { channel: String, handler: String },
    /// `notMe` command echoed back to the identity that sent it
    SelfSuppressed { channel: String, command: String },
    Dropped(DropReason),
}

/// Per-frame inputs owned by the session.
#[derive(Debug, Clone, Copy)]
pub struct DispatchContext<'a> {
    pub local_identity: Option<&'a str>,
    pub rules: &'a SanitizeRules,
    pub date_format: &'a str,
}

#[derive(Debug, Default)]
pub struct Dispatcher {
    state: ConnectionState,
    connections: u64,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Number of `Connected` events seen so far.
    pub fn connections(&self) -> u64 {
        self.connections
    }

    pub fn begin_connect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            self.state = ConnectionState::Connecting;
        }
    }

    /// Returns `true` when this is a reconnection rather than the first connect.
    pub fn on_connected(&mut self) -> bool {
        let reconnect = self.connections > 0;
        self.connections += 1;
        self.state = ConnectionState::Connected;
        reconnect
    }

    pub fn on_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    pub fn dispatch(
        &self,
        frame: Frame,
        registry: &mut ChannelRegistry,
        ctx: &DispatchContext<'_>,
    ) -> DispatchOutcome {
        let outcome = route(frame, registry, ctx);
        match &outcome {
            DispatchOutcome::Delivered { channel, handler } => debug!(
                component = "dispatcher",
                event = "dispatch.frame.delivered",
                channel = %channel,
                handler = %handler,
            ),
            DispatchOutcome::SelfSuppressed { channel, command } => debug!(
                component = "dispatcher",
                event = "dispatch.frame.self_suppressed",
                channel = %channel,
                command = %command,
            ),
            DispatchOutcome::Dropped(DropReason::Incomplete) => debug!(
                component = "dispatcher",
                event = "dispatch.frame.dropped",
                reason = %DropReason::Incomplete,
            ),
            DispatchOutcome::Dropped(reason) => warn!(
                component = "dispatcher",
                event = "dispatch.frame.dropped",
                reason = %reason,
                "Dropped inbound frame"
            ),
        }
        outcome
    }
}

fn route(
    frame: Frame,
    registry: &mut ChannelRegistry,
    ctx: &DispatchContext<'_>,
) -> DispatchOutcome {
    let mut envelope: Envelope = match decode(frame) {
        Ok(envelope) => envelope,
        Err(e) => return DispatchOutcome::Dropped(DropReason::Malformed(e.to_string())),
    };

    // Servers send "" for both when the field does not apply.
    envelope.channel = envelope.channel.take().filter(|channel| !channel.is_empty());
    envelope.identity = envelope.identity.take().filter(|identity| !identity.is_empty());

    let (Some(kind), Some(channel)) = (envelope.kind, envelope.channel.clone()) else {
        if envelope.channel.is_none() {
            if let Some(error) = envelope.server_error() {
                return DispatchOutcome::Dropped(DropReason::ServerError(error.to_string()));
            }
        }
        return DispatchOutcome::Dropped(DropReason::Incomplete);
    };

    let Some(handlers) = registry.get_handlers_mut(&channel) else {
        return DispatchOutcome::Dropped(DropReason::UnknownChannel(channel));
    };

    match kind {
        EnvelopeKind::Message => {
            if !handlers.has(ON_RECEIVE) {
                return DispatchOutcome::Dropped(DropReason::MissingHandler {
                    channel,
                    handler: ON_RECEIVE.to_string(),
                });
            }
            envelope.data = ctx.rules.apply_map(std::mem::take(&mut envelope.data));
            envelope.timestamp = formatted(envelope.timestamp.take(), ctx.date_format);
            handlers.receive(&envelope);
            DispatchOutcome::Delivered {
                channel,
                handler: ON_RECEIVE.to_string(),
            }
        }
        EnvelopeKind::Command => {
            let Some(command) = envelope.command().map(str::to_string) else {
                return DispatchOutcome::Dropped(DropReason::MissingCommand { channel });
            };
            if !handlers.has(&command) {
                return DispatchOutcome::Dropped(DropReason::MissingHandler {
                    channel,
                    handler: command,
                });
            }
            let from_self = envelope.identity.is_some()
                && envelope.identity.as_deref() == ctx.local_identity;
            if envelope.not_me() && from_self {
                return DispatchOutcome::SelfSuppressed { channel, command };
            }
            let event = CommandEvent {
                options: envelope.options(),
                timestamp: formatted(envelope.timestamp.take(), ctx.date_format),
                identity: envelope.identity,
            };
            handlers.command(&command, &event);
            DispatchOutcome::Delivered {
                channel,
                handler: command,
            }
        }
    }
}

/// Formatting failures fall back to the raw timestamp.
fn formatted(raw: Option<String>, date_format: &str) -> Option<String> {
    let raw = raw?;
    match format_timestamp(&raw, date_format) {
        Ok(text) => Some(text),
        Err(e) => {
            debug!(
                component = "dispatcher",
                event = "dispatch.timestamp.unformatted",
                error = %e,
            );
            Some(raw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HandlerSet;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    struct Harness {
        registry: ChannelRegistry,
        rules: SanitizeRules,
        date_format: String,
        local: Option<String>,
        dispatcher: Dispatcher,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                registry: ChannelRegistry::new(),
                rules: SanitizeRules::new(None, true),
                date_format: "isoDateTime".to_string(),
                local: Some("alice".to_string()),
                dispatcher: Dispatcher::new(),
            }
        }

        fn dispatch(&mut self, frame: serde_json::Value) -> DispatchOutcome {
            let ctx = DispatchContext {
                local_identity: self.local.as_deref(),
                rules: &self.rules,
                date_format: &self.date_format,
            };
            self.dispatcher
                .dispatch(Frame::Json(frame), &mut self.registry, &ctx)
        }
    }

    fn capture_receive(harness: &mut Harness, channel: &str) -> Arc<Mutex<Vec<Envelope>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        harness
            .registry
            .register_channel(
                channel,
                HandlerSet::new().on_receive(move |env| sink.lock().unwrap().push(env.clone())),
            )
            .expect("register");
        seen
    }

    fn capture_command(
        harness: &mut Harness,
        channel: &str,
        command: &str,
    ) -> Arc<Mutex<Vec<CommandEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        harness
            .registry
            .add_command_handler(channel, command, move |ev| {
                sink.lock().unwrap().push(ev.clone())
            })
            .expect("register");
        seen
    }

    #[test]
    fn chat_message_reaches_on_receive_once() {
        let mut harness = Harness::new();
        let lines = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = lines.clone();
        harness
            .registry
            .register_channel(
                "chat",
                HandlerSet::new().on_receive(move |env| {
                    let who = env.identity.clone().unwrap_or_default();
                    let msg = env.msg().and_then(|m| m.as_str()).unwrap_or_default();
                    sink.lock().unwrap().push(format!("{who}: {msg}"));
                }),
            )
            .expect("register");

        let outcome = harness.dispatch(json!({
            "type": "message",
            "channel": "chat",
            "identity": "alice",
            "data": {"msg": "hi"},
            "timestamp": "2024-01-01T00:00:00Z"
        }));

        assert_eq!(
            outcome,
            DispatchOutcome::Delivered {
                channel: "chat".into(),
                handler: ON_RECEIVE.into()
            }
        );
        assert_eq!(*lines.lock().unwrap(), vec!["alice: hi"]);
    }

    #[test]
    fn message_is_sanitized_and_timestamp_formatted() {
        let mut harness = Harness::new();
        let seen = capture_receive(&mut harness, "chat");

        harness.dispatch(json!({
            "type": "message",
            "channel": "chat",
            "data": {"msg": {"text": "<b>hi</b>", "n": 1}},
            "timestamp": "2024-01-01T00:00:00Z"
        }));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].msg(), Some(&json!({"text": "&lt;b&gt;hi</b>", "n": 1})));
        assert_eq!(seen[0].timestamp.as_deref(), Some("2024-01-01T00:00:00"));
    }

    #[test]
    fn unparseable_timestamp_falls_back_to_raw() {
        let mut harness = Harness::new();
        let seen = capture_receive(&mut harness, "chat");

        let outcome = harness.dispatch(json!({
            "type": "message",
            "channel": "chat",
            "data": {"msg": "x"},
            "timestamp": "soon"
        }));

        assert!(matches!(outcome, DispatchOutcome::Delivered { .. }));
        assert_eq!(seen.lock().unwrap()[0].timestamp.as_deref(), Some("soon"));
    }

    #[test]
    fn commands_are_not_sanitized() {
        let mut harness = Harness::new();
        let seen = capture_command(&mut harness, "chat", "onSubscribe");

        harness.dispatch(json!({
            "type": "command",
            "channel": "chat",
            "identity": "bob",
            "data": {"command": "onSubscribe", "options": {"note": "<b>"}}
        }));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].identity.as_deref(), Some("bob"));
        assert_eq!(seen[0].options, json!({"note": "<b>"}));
    }

    #[test]
    fn drops_without_invoking_anything() {
        let mut harness = Harness::new();
        let chat = capture_command(&mut harness, "chat", "typing");

        assert!(matches!(
            harness.dispatch(json!({"type": "message", "channel": "nowhere", "data": {}})),
            DispatchOutcome::Dropped(DropReason::UnknownChannel(c)) if c == "nowhere"
        ));
        assert!(matches!(
            harness.dispatch(json!({"type": "message", "channel": "chat", "data": {"msg": 1}})),
            DispatchOutcome::Dropped(DropReason::MissingHandler { .. })
        ));
        assert!(matches!(
            harness.dispatch(json!({"type": "command", "channel": "chat", "data": {"command": "other"}})),
            DispatchOutcome::Dropped(DropReason::MissingHandler { handler, .. }) if handler == "other"
        ));
        assert!(matches!(
            harness.dispatch(json!({"type": "command", "channel": "chat", "data": {}})),
            DispatchOutcome::Dropped(DropReason::MissingCommand { .. })
        ));
        assert_eq!(
            harness.dispatch(json!({"channel": "chat", "data": {"command": "typing"}})),
            DispatchOutcome::Dropped(DropReason::Incomplete)
        );
        assert_eq!(
            harness.dispatch(json!({"type": "command", "data": {"command": "typing"}})),
            DispatchOutcome::Dropped(DropReason::Incomplete)
        );
        assert!(chat.lock().unwrap().is_empty());
    }

    #[test]
    fn malformed_text_is_dropped() {
        let mut harness = Harness::new();
        let ctx = DispatchContext {
            local_identity: None,
            rules: &harness.rules,
            date_format: "",
        };
        let outcome = harness.dispatcher.dispatch(
            Frame::Text("{not json".into()),
            &mut harness.registry,
            &ctx,
        );
        assert!(matches!(
            outcome,
            DispatchOutcome::Dropped(DropReason::Malformed(_))
        ));
    }

    #[test]
    fn server_rejection_is_reported() {
        let mut harness = Harness::new();
        let outcome = harness.dispatch(json!({
            "type": "message",
            "success": false,
            "error": "Client has not sent init command yet!",
            "data": {}
        }));
        assert_eq!(
            outcome,
            DispatchOutcome::Dropped(DropReason::ServerError(
                "Client has not sent init command yet!".into()
            ))
        );
    }

    #[test]
    fn not_me_suppresses_only_own_echo() {
        let mut harness = Harness::new();
        let typing = capture_command(&mut harness, "chat", "typing");
        let frame = |identity: &str| {
            json!({
                "type": "command",
                "channel": "chat",
                "identity": identity,
                "data": {"command": "typing", "options": {}, "notMe": true}
            })
        };

        assert_eq!(
            harness.dispatch(frame("alice")),
            DispatchOutcome::SelfSuppressed {
                channel: "chat".into(),
                command: "typing".into()
            }
        );
        assert!(typing.lock().unwrap().is_empty());

        assert!(matches!(
            harness.dispatch(frame("bob")),
            DispatchOutcome::Delivered { .. }
        ));
        assert_eq!(typing.lock().unwrap().len(), 1);
    }

    #[test]
    fn own_command_without_not_me_is_delivered() {
        let mut harness = Harness::new();
        let typing = capture_command(&mut harness, "chat", "doneTyping");

        harness.dispatch(json!({
            "type": "command",
            "channel": "chat",
            "identity": "alice",
            "data": {"command": "doneTyping", "notMe": false}
        }));
        assert_eq!(typing.lock().unwrap().len(), 1);
    }

    #[test]
    fn rejection_with_empty_channel_is_reported() {
        let mut harness = Harness::new();
        let outcome = harness.dispatch(json!({
            "type": "message",
            "channel": "",
            "identity": "",
            "success": false,
            "error": "Client has not sent init command yet!",
            "data": {}
        }));
        assert_eq!(
            outcome,
            DispatchOutcome::Dropped(DropReason::ServerError(
                "Client has not sent init command yet!".into()
            ))
        );
    }

    #[test]
    fn empty_channel_without_error_is_incomplete() {
        let mut harness = Harness::new();
        assert_eq!(
            harness.dispatch(json!({"type": "message", "channel": "", "data": {"msg": 1}})),
            DispatchOutcome::Dropped(DropReason::Incomplete)
        );
    }

    #[test]
    fn command_timestamp_is_formatted_or_kept_raw() {
        let mut harness = Harness::new();
        let seen = capture_command(&mut harness, "chat", "onSubscribe");
        let frame = |timestamp: &str| {
            json!({
                "type": "command",
                "channel": "chat",
                "identity": "bob",
                "timestamp": timestamp,
                "data": {"command": "onSubscribe"}
            })
        };

        harness.dispatch(frame("2024-01-01T00:00:00Z"));
        harness.dispatch(frame("later"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].timestamp.as_deref(), Some("2024-01-01T00:00:00"));
        assert_eq!(seen[1].timestamp.as_deref(), Some("later"));
    }

    #[test]
    fn empty_identity_reads_as_absent() {
        let mut harness = Harness::new();
        let joined = capture_command(&mut harness, "chat", "onSubscribe");
        let messages = capture_receive(&mut harness, "global");

        harness.dispatch(json!({
            "type": "command",
            "channel": "chat",
            "identity": "",
            "data": {"command": "onSubscribe", "options": null}
        }));
        harness.dispatch(json!({
            "type": "message",
            "channel": "global",
            "identity": "",
            "data": {"msg": "hello"}
        }));

        assert_eq!(joined.lock().unwrap()[0].identity, None);
        assert_eq!(messages.lock().unwrap()[0].identity, None);
    }

    #[test]
    fn empty_identity_never_counts_as_self() {
        let mut harness = Harness::new();
        harness.local = Some(String::new());
        let typing = capture_command(&mut harness, "chat", "typing");

        let outcome = harness.dispatch(json!({
            "type": "command",
            "channel": "chat",
            "identity": "",
            "data": {"command": "typing", "notMe": true}
        }));
        assert!(matches!(outcome, DispatchOutcome::Delivered { .. }));
        assert_eq!(typing.lock().unwrap().len(), 1);
    }

    #[test]
    fn state_machine_tracks_reconnects() {
        let mut dispatcher = Dispatcher::new();
        assert_eq!(dispatcher.state(), ConnectionState::Disconnected);

        dispatcher.begin_connect();
        assert_eq!(dispatcher.state(), ConnectionState::Connecting);
        assert!(!dispatcher.on_connected());
        assert_eq!(dispatcher.state(), ConnectionState::Connected);

        dispatcher.begin_connect();
        assert_eq!(dispatcher.state(), ConnectionState::Connected);

        dispatcher.on_disconnected();
        assert_eq!(dispatcher.state(), ConnectionState::Disconnected);
        assert!(dispatcher.on_connected());
        assert_eq!(dispatcher.connections(), 2);
    }
}
