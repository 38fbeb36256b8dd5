//! Session controller: the public face of the client.
//!
//! A [`Session`] owns the one transport, the channel registry, the options
//! record and the identity/channel store. Outbound operations build
//! envelopes and hand them to the transport; inbound traffic arrives as
//! [`TransportEvent`]s through [`Session::handle_event`].

use serde_json::Value;
use switchyard_protocol::{self as protocol, Envelope, Frame};
use tracing::{debug, info, warn};

use crate::channel_store::ChannelStore;
use crate::dispatcher::{ConnectionState, DispatchContext, DispatchOutcome, Dispatcher};
use crate::error::{ClientError, ClientResult};
use crate::options::{OptionsPatch, SessionOptions};
use crate::registry::{ChannelRegistry, CommandEvent, HandlerSet};
use crate::sanitize::SanitizeRules;
use crate::store::Store;
use crate::transport::{Transport, TransportError, TransportEvent, TransportFactory};

pub type ConnectCallback = Box<dyn FnMut() + Send>;

/// Arguments for [`Session::connect`]. Every part is optional.
#[derive(Default)]
pub struct Connect {
    identity: Option<String>,
    options: OptionsPatch,
    on_connect: Option<ConnectCallback>,
}

impl Connect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn options(mut self, options: OptionsPatch) -> Self {
        self.options = options;
        self
    }

    /// Runs on every `Connected` event, reconnections included.
    pub fn on_connect(mut self, callback: impl FnMut() + Send + 'static) -> Self {
        self.on_connect = Some(Box::new(callback));
        self
    }
}

/// One channel name or several.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelList(Vec<String>);

impl ChannelList {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    fn validate(&self) -> ClientResult<()> {
        if self.0.iter().any(|name| name.trim().is_empty()) {
            return Err(ClientError::InvalidChannelName);
        }
        Ok(())
    }
}

impl From<&str> for ChannelList {
    fn from(name: &str) -> Self {
        ChannelList(vec![name.to_string()])
    }
}

impl From<String> for ChannelList {
    fn from(name: String) -> Self {
        ChannelList(vec![name])
    }
}

impl From<Vec<String>> for ChannelList {
    fn from(names: Vec<String>) -> Self {
        ChannelList(names)
    }
}

impl From<&[&str]> for ChannelList {
    fn from(names: &[&str]) -> Self {
        ChannelList(names.iter().map(|name| name.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for ChannelList {
    fn from(names: [&str; N]) -> Self {
        ChannelList(names.iter().map(|name| name.to_string()).collect())
    }
}

pub struct Session {
    options: SessionOptions,
    rules: SanitizeRules,
    store: ChannelStore<Box<dyn Store>>,
    factory: Box<dyn TransportFactory>,
    transport: Option<Box<dyn Transport>>,
    identity: Option<String>,
    registry: ChannelRegistry,
    dispatcher: Dispatcher,
    on_connect: Vec<ConnectCallback>,
}

impl Session {
    pub fn new(
        store: impl Store + 'static,
        factory: impl TransportFactory + 'static,
    ) -> Self {
        let options = SessionOptions::default();
        let rules = SanitizeRules::new(None, options.html_entities);
        Self::build(options, rules, Box::new(store), Box::new(factory))
    }

    /// Like [`Session::new`] but starting from `options`; fails on a bad strip pattern.
    pub fn with_options(
        options: SessionOptions,
        store: impl Store + 'static,
        factory: impl TransportFactory + 'static,
    ) -> ClientResult<Self> {
        let rules = SanitizeRules::from_options(&options)?;
        Ok(Self::build(options, rules, Box::new(store), Box::new(factory)))
    }

    fn build(
        options: SessionOptions,
        rules: SanitizeRules,
        store: Box<dyn Store>,
        factory: Box<dyn TransportFactory>,
    ) -> Self {
        Self {
            store: ChannelStore::new(store, &options),
            options,
            rules,
            factory,
            transport: None,
            identity: None,
            registry: ChannelRegistry::new(),
            dispatcher: Dispatcher::new(),
            on_connect: Vec::new(),
        }
    }

    // -- outbound ---------------------------------------------------------

    /// Merge options, open the transport if there is none yet, settle the
    /// identity and send `init` with the persisted subscriptions.
    pub fn connect(&mut self, request: Connect) -> ClientResult<()> {
        let Connect {
            identity,
            options,
            on_connect,
        } = request;

        if !options.is_empty() {
            self.apply_options(&options)?;
        }

        if self.transport.is_none() {
            let mut transport = self.factory.create(&self.options)?;
            transport.connect()?;
            self.dispatcher.begin_connect();
            self.transport = Some(transport);
            info!(
                component = "session",
                event = "session.transport.created",
                endpoint = %self.options.endpoint(),
                "Transport opened"
            );
        }

        if let Some(identity) = identity {
            self.save_identity(&identity)?;
        }
        if self.identity.is_none() {
            self.identity = self.store.identity()?;
        }

        if let Some(callback) = on_connect {
            self.on_connect.push(callback);
        }

        self.send_init()
    }

    pub fn subscribe(&mut self, channels: impl Into<ChannelList>) -> ClientResult<()> {
        let channels = channels.into();
        channels.validate()?;
        self.ensure_connected()?;
        for channel in channels.iter() {
            let envelope = protocol::subscribe(channel, self.identity.as_deref());
            self.send(&envelope)?;
            if self.store.add_channel(channel)? {
                debug!(
                    component = "session",
                    event = "session.channel.persisted",
                    channel = %channel,
                );
            }
        }
        Ok(())
    }

    pub fn unsubscribe(&mut self, channels: impl Into<ChannelList>) -> ClientResult<()> {
        let channels = channels.into();
        channels.validate()?;
        self.ensure_connected()?;
        for channel in channels.iter() {
            let envelope = protocol::unsubscribe(channel, self.identity.as_deref());
            self.send(&envelope)?;
            if self.store.remove_channel(channel)? {
                debug!(
                    component = "session",
                    event = "session.channel.forgotten",
                    channel = %channel,
                );
            }
        }
        Ok(())
    }

    /// Send `msg` on `channel`, then echo it to the channel's `onSend`.
    ///
    /// The echo runs whether or not the send succeeded; the send result is
    /// returned afterwards.
    pub fn publish(&mut self, channel: &str, msg: Value) -> ClientResult<()> {
        if channel.trim().is_empty() {
            return Err(ClientError::InvalidChannelName);
        }
        self.ensure_connected()?;
        let envelope = protocol::publish(channel, self.identity.as_deref(), msg);
        let sent = self.send(&envelope);
        if let (Some(handlers), Some(msg)) =
            (self.registry.get_handlers_mut(channel), envelope.msg())
        {
            handlers.sent(msg);
        }
        sent
    }

    /// Send a custom command to every member of `channel`.
    pub fn trigger_event(
        &mut self,
        channel: &str,
        event: &str,
        options: Value,
        not_me: bool,
    ) -> ClientResult<()> {
        if channel.trim().is_empty() {
            return Err(ClientError::InvalidChannelName);
        }
        if event.trim().is_empty() {
            return Err(ClientError::InvalidHandlerName(event.to_string()));
        }
        self.ensure_connected()?;
        let envelope =
            protocol::trigger(channel, self.identity.as_deref(), event, options, not_me);
        self.send(&envelope)
    }

    // -- identity ---------------------------------------------------------

    /// Blank identities are ignored.
    pub fn save_identity(&mut self, identity: &str) -> ClientResult<()> {
        if identity.trim().is_empty() {
            debug!(
                component = "session",
                event = "session.identity.ignored",
                "Ignoring blank identity"
            );
            return Ok(());
        }
        self.store.save_identity(identity)?;
        self.identity = Some(identity.to_string());
        Ok(())
    }

    /// Forget the identity here and in the store. Subscriptions and the
    /// transport stay as they are.
    pub fn clear_identity(&mut self) -> ClientResult<()> {
        self.identity = None;
        self.store.clear_identity()?;
        Ok(())
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    // -- inbound ----------------------------------------------------------

    /// Feed one transport event. Returns the dispatch outcome for messages.
    pub fn handle_event(&mut self, event: TransportEvent) -> Option<DispatchOutcome> {
        match event {
            TransportEvent::Connected => {
                let reconnect = self.dispatcher.on_connected();
                info!(
                    component = "session",
                    event = "session.transport.connected",
                    reconnect,
                    "Transport connected"
                );
                if reconnect {
                    if let Err(e) = self.send_init() {
                        warn!(
                            component = "session",
                            event = "session.init.failed",
                            error = %e,
                            "Could not restore subscriptions after reconnect"
                        );
                    }
                }
                for callback in &mut self.on_connect {
                    callback();
                }
                None
            }
            TransportEvent::Message(frame) => Some(self.handle_frame(frame)),
            TransportEvent::Disconnected => {
                self.dispatcher.on_disconnected();
                info!(
                    component = "session",
                    event = "session.transport.disconnected",
                    "Transport disconnected"
                );
                None
            }
        }
    }

    pub fn handle_frame(&mut self, frame: Frame) -> DispatchOutcome {
        let ctx = DispatchContext {
            local_identity: self.identity.as_deref(),
            rules: &self.rules,
            date_format: &self.options.date_format,
        };
        self.dispatcher.dispatch(frame, &mut self.registry, &ctx)
    }

    // -- registry ---------------------------------------------------------

    pub fn register_channel(
        &mut self,
        name: &str,
        handlers: HandlerSet,
    ) -> ClientResult<Option<HandlerSet>> {
        self.registry.register_channel(name, handlers)
    }

    pub fn add_message_handler(
        &mut self,
        channel: &str,
        handler: impl FnMut(&Envelope) + Send + 'static,
    ) -> ClientResult<()> {
        self.registry.add_message_handler(channel, handler)
    }

    pub fn add_command_handler(
        &mut self,
        channel: &str,
        command: &str,
        handler: impl FnMut(&CommandEvent) + Send + 'static,
    ) -> ClientResult<()> {
        self.registry.add_command_handler(channel, command, handler)
    }

    pub fn has_handler(&self, channel: &str, event: &str) -> bool {
        self.registry.has_handler(channel, event)
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    // -- state ------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.dispatcher.state()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Persisted subscription set, in subscription order.
    pub fn subscriptions(&self) -> ClientResult<Vec<String>> {
        Ok(self.store.channels()?)
    }

    // -- internals --------------------------------------------------------

    fn apply_options(&mut self, patch: &OptionsPatch) -> ClientResult<()> {
        let merged = self.options.merge(patch);
        let rules = SanitizeRules::from_options(&merged)?;
        if self.transport.is_some() && merged.endpoint() != self.options.endpoint() {
            debug!(
                component = "session",
                event = "session.options.endpoint_ignored",
                endpoint = %merged.endpoint(),
                "Transport already open, keeping its endpoint"
            );
        }
        self.store.apply_options(&merged);
        self.options = merged;
        self.rules = rules;
        Ok(())
    }

    fn ensure_connected(&mut self) -> ClientResult<()> {
        if self.transport.is_none() {
            self.connect(Connect::new())?;
        }
        Ok(())
    }

    fn send_init(&mut self) -> ClientResult<()> {
        let channels = self.store.channels()?;
        let envelope = protocol::init(self.identity.as_deref(), &channels);
        self.send(&envelope)?;
        debug!(
            component = "session",
            event = "session.init.sent",
            channels = channels.len(),
        );
        Ok(())
    }

    fn send(&mut self, envelope: &Envelope) -> ClientResult<()> {
        let transport = self.transport.as_mut().ok_or(TransportError::Closed)?;
        if let Err(e) = transport.send(envelope) {
            warn!(
                component = "session",
                event = "session.send.failed",
                channel = envelope.channel.as_deref().unwrap_or(""),
                error = %e,
                "Send failed"
            );
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::transport::testing::{recording_factory, Wire};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use switchyard_protocol::{EnvelopeKind, CMD_INIT, CMD_SUBSCRIBE};

    fn session() -> (Session, Arc<Mutex<Wire>>) {
        let (factory, wire) = recording_factory();
        (Session::new(MemoryStore::new(), factory), wire)
    }

    fn commands(wire: &Arc<Mutex<Wire>>) -> Vec<(String, Option<String>)> {
        wire.lock()
            .unwrap()
            .sent
            .iter()
            .map(|env| {
                (
                    env.command().unwrap_or("<message>").to_string(),
                    env.channel.clone(),
                )
            })
            .collect()
    }

    #[test]
    fn connect_persists_identity_and_sends_init() {
        let mut store = MemoryStore::new();
        store.set("rt_channels", r#"["chat","global"]"#, 0).unwrap();
        let (factory, wire) = recording_factory();
        let mut session = Session::new(store, factory);

        session
            .connect(Connect::new().identity("alice"))
            .expect("connect");

        assert_eq!(session.identity(), Some("alice"));
        assert_eq!(session.state(), ConnectionState::Connecting);

        let wire = wire.lock().unwrap();
        assert_eq!(wire.created, 1);
        assert_eq!(wire.connects, 1);
        assert_eq!(wire.endpoints, vec!["ws://127.0.0.1:8080/socket.io"]);
        let init = &wire.sent[0];
        assert_eq!(init.command(), Some(CMD_INIT));
        assert_eq!(init.identity.as_deref(), Some("alice"));
        assert_eq!(init.data["channels"], json!(["chat", "global"]));
    }

    #[test]
    fn second_connect_reuses_transport() {
        let (mut session, wire) = session();
        session.connect(Connect::new()).expect("connect");
        session
            .connect(Connect::new().identity("bob"))
            .expect("reconnect");

        let wire = wire.lock().unwrap();
        assert_eq!(wire.created, 1);
        assert_eq!(wire.connects, 1);
        assert_eq!(wire.sent.len(), 2);
        assert_eq!(wire.sent[1].identity.as_deref(), Some("bob"));
    }

    #[test]
    fn connect_merges_options_before_creating_transport() {
        let (mut session, wire) = session();
        let patch = OptionsPatch {
            port: Some(9000),
            resource: Some("rt".into()),
            ..Default::default()
        };
        session
            .connect(Connect::new().options(patch))
            .expect("connect");
        assert_eq!(wire.lock().unwrap().endpoints, vec!["ws://127.0.0.1:9000/rt"]);
        assert_eq!(session.options().port, 9000);
    }

    #[test]
    fn invalid_options_keep_previous_ones() {
        let (mut session, wire) = session();
        let patch = OptionsPatch {
            strip_pattern: Some("(".into()),
            port: Some(1),
            ..Default::default()
        };
        assert!(matches!(
            session.connect(Connect::new().options(patch)),
            Err(ClientError::InvalidOptions(_))
        ));
        assert_eq!(session.options(), &SessionOptions::default());
        assert_eq!(wire.lock().unwrap().created, 0);
    }

    #[test]
    fn identity_loaded_from_store_and_blank_ignored() {
        let mut store = MemoryStore::new();
        store.set("rt_identity", "carol", 0).unwrap();
        let (factory, _wire) = recording_factory();
        let mut session = Session::new(store, factory);

        session
            .connect(Connect::new().identity("   "))
            .expect("connect");
        assert_eq!(session.identity(), Some("carol"));
    }

    #[test]
    fn subscribe_lazily_connects_and_persists_set() {
        let (mut session, wire) = session();
        session.subscribe(["a", "b"]).expect("subscribe");
        session.unsubscribe("a").expect("unsubscribe");

        assert_eq!(session.subscriptions().unwrap(), vec!["b"]);
        assert_eq!(
            commands(&wire),
            vec![
                (CMD_INIT.to_string(), None),
                (CMD_SUBSCRIBE.to_string(), Some("a".to_string())),
                (CMD_SUBSCRIBE.to_string(), Some("b".to_string())),
                ("unsubscribe".to_string(), Some("a".to_string())),
            ]
        );
    }

    #[test]
    fn duplicate_subscribe_stores_once() {
        let (mut session, _wire) = session();
        session.subscribe(["a", "a"]).expect("subscribe");
        session.subscribe("a".to_string()).expect("subscribe");
        assert_eq!(session.subscriptions().unwrap(), vec!["a"]);
    }

    #[test]
    fn blank_channel_names_send_nothing() {
        let (mut session, wire) = session();
        assert!(matches!(
            session.subscribe(["ok", " "]),
            Err(ClientError::InvalidChannelName)
        ));
        assert!(wire.lock().unwrap().sent.is_empty());
    }

    #[test]
    fn publish_echoes_to_on_send_even_when_send_fails() {
        let (mut session, wire) = session();
        let echoed = Arc::new(Mutex::new(Vec::new()));
        let sink = echoed.clone();
        session
            .register_channel(
                "chat",
                HandlerSet::new().on_send(move |msg| sink.lock().unwrap().push(msg.clone())),
            )
            .expect("register");

        session.publish("chat", json!("hello")).expect("publish");
        {
            let wire = wire.lock().unwrap();
            let sent = wire.sent.last().expect("message sent");
            assert_eq!(sent.kind, Some(EnvelopeKind::Message));
            assert_eq!(sent.msg(), Some(&json!("hello")));
        }

        wire.lock().unwrap().fail_sends = true;
        assert!(matches!(
            session.publish("chat", json!("lost")),
            Err(ClientError::Transport(TransportError::Closed))
        ));
        assert_eq!(*echoed.lock().unwrap(), vec![json!("hello"), json!("lost")]);
    }

    #[test]
    fn typing_echo_suppressed_for_sender_only() {
        let (mut alice, alice_wire) = session();
        let (mut bob, _bob_wire) = session();
        alice.connect(Connect::new().identity("alice")).unwrap();
        bob.connect(Connect::new().identity("bob")).unwrap();

        let typed = Arc::new(Mutex::new(Vec::new()));
        for session in [&mut alice, &mut bob] {
            let sink = typed.clone();
            session
                .add_command_handler("chat", "typing", move |ev| {
                    sink.lock().unwrap().push(ev.identity.clone())
                })
                .unwrap();
        }

        alice
            .trigger_event("chat", "typing", json!({}), true)
            .expect("trigger");
        let frame = {
            let wire = alice_wire.lock().unwrap();
            let sent = wire.sent.last().expect("sent").clone();
            assert_eq!(sent.kind, Some(EnvelopeKind::Command));
            assert_eq!(sent.channel.as_deref(), Some("chat"));
            assert_eq!(
                serde_json::Value::Object(sent.data.clone()),
                json!({"command": "typing", "options": {}, "notMe": true})
            );
            serde_json::to_value(&sent).unwrap()
        };

        assert!(matches!(
            alice.handle_frame(Frame::Json(frame.clone())),
            DispatchOutcome::SelfSuppressed { .. }
        ));
        assert!(matches!(
            bob.handle_frame(Frame::Json(frame)),
            DispatchOutcome::Delivered { .. }
        ));
        assert_eq!(*typed.lock().unwrap(), vec![Some("alice".to_string())]);
    }

    #[test]
    fn reconnect_resends_init_then_runs_callbacks() {
        let (mut session, wire) = session();
        let connects = Arc::new(Mutex::new(0));
        let counter = connects.clone();
        session
            .register_channel("chat", HandlerSet::new().on_receive(|_| {}))
            .unwrap();
        session
            .connect(Connect::new().on_connect(move || *counter.lock().unwrap() += 1))
            .unwrap();
        session.subscribe("chat").unwrap();

        assert!(session.handle_event(TransportEvent::Connected).is_none());
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(wire.lock().unwrap().sent.len(), 2);

        session.handle_event(TransportEvent::Disconnected);
        assert_eq!(session.state(), ConnectionState::Disconnected);
        session.handle_event(TransportEvent::Connected);

        let wire = wire.lock().unwrap();
        let last = wire.sent.last().expect("init resent");
        assert_eq!(last.command(), Some(CMD_INIT));
        assert_eq!(last.data["channels"], json!(["chat"]));
        assert_eq!(*connects.lock().unwrap(), 2);
        assert!(session.has_handler("chat", "onReceive"));
    }

    #[test]
    fn message_events_are_dispatched() {
        let (mut session, _wire) = session();
        let seen = Arc::new(Mutex::new(0));
        let sink = seen.clone();
        session
            .add_message_handler("chat", move |_| *sink.lock().unwrap() += 1)
            .unwrap();

        let outcome = session.handle_event(TransportEvent::Message(Frame::Text(
            r#"{"type":"message","channel":"chat","data":{"msg":"hi"}}"#.into(),
        )));
        assert!(matches!(outcome, Some(DispatchOutcome::Delivered { .. })));
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn clear_identity_keeps_subscriptions() {
        let (mut session, wire) = session();
        session
            .connect(Connect::new().identity("alice"))
            .unwrap();
        session.subscribe("chat").unwrap();

        session.clear_identity().expect("clear");
        assert_eq!(session.identity(), None);
        assert_eq!(session.subscriptions().unwrap(), vec!["chat"]);

        session.publish("chat", json!("anon")).unwrap();
        let wire = wire.lock().unwrap();
        assert_eq!(wire.created, 1);
        assert_eq!(wire.sent.last().unwrap().identity, None);
    }
}
