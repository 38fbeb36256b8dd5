//! Channel registry: channel name → handler set.
//!
//! Registration replaces the whole handler set for a name. The incremental
//! `add_*_handler` helpers create the channel on demand and touch one
//! handler only.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;
use switchyard_protocol::Envelope;

use crate::error::{ClientError, ClientResult};

pub const ON_RECEIVE: &str = "onReceive";
pub const ON_SEND: &str = "onSend";

pub type MessageHandler = Box<dyn FnMut(&Envelope) + Send>;
pub type SendHandler = Box<dyn FnMut(&Value) + Send>;
pub type CommandHandler = Box<dyn FnMut(&CommandEvent) + Send>;

/// What a command handler receives.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEvent {
    pub identity: Option<String>,
    pub timestamp: Option<String>,
    /// `data.options` of the frame, `Null` when absent
    pub options: Value,
}

#[derive(Default)]
pub struct HandlerSet {
    on_receive: Option<MessageHandler>,
    on_send: Option<SendHandler>,
    commands: HashMap<String, CommandHandler>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_receive(mut self, handler: impl FnMut(&Envelope) + Send + 'static) -> Self {
        self.on_receive = Some(Box::new(handler));
        self
    }

    pub fn on_send(mut self, handler: impl FnMut(&Value) + Send + 'static) -> Self {
        self.on_send = Some(Box::new(handler));
        self
    }

    /// Handler for `onSubscribe`, `onUnsubscribe`, `onDisconnect` or any custom command.
    pub fn on_command(
        mut self,
        name: impl Into<String>,
        handler: impl FnMut(&CommandEvent) + Send + 'static,
    ) -> Self {
        self.commands.insert(name.into(), Box::new(handler));
        self
    }

    pub fn has(&self, event: &str) -> bool {
        match event {
            ON_RECEIVE => self.on_receive.is_some(),
            ON_SEND => self.on_send.is_some(),
            name => self.commands.contains_key(name),
        }
    }

    pub fn command_names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    fn validate(&self) -> ClientResult<()> {
        match self.commands.keys().find(|name| !is_valid_command_name(name)) {
            Some(bad) => Err(ClientError::InvalidHandlerName(bad.clone())),
            None => Ok(()),
        }
    }

    /// Run a second message handler after the current one, as a single `onReceive`.
    fn chain_receive(&mut self, mut handler: MessageHandler) {
        let chained: MessageHandler = match self.on_receive.take() {
            Some(mut first) => Box::new(move |envelope: &Envelope| {
                first(envelope);
                handler(envelope);
            }),
            None => handler,
        };
        self.on_receive = Some(chained);
    }

    pub(crate) fn receive(&mut self, envelope: &Envelope) -> bool {
        match self.on_receive.as_mut() {
            Some(handler) => {
                handler(envelope);
                true
            }
            None => false,
        }
    }

    pub(crate) fn sent(&mut self, msg: &Value) -> bool {
        match self.on_send.as_mut() {
            Some(handler) => {
                handler(msg);
                true
            }
            None => false,
        }
    }

    pub(crate) fn command(&mut self, name: &str, event: &CommandEvent) -> bool {
        match self.commands.get_mut(name) {
            Some(handler) => {
                handler(event);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut commands: Vec<&str> = self.command_names().collect();
        commands.sort_unstable();
        f.debug_struct("HandlerSet")
            .field("on_receive", &self.on_receive.is_some())
            .field("on_send", &self.on_send.is_some())
            .field("commands", &commands)
            .finish()
    }
}

fn is_valid_command_name(name: &str) -> bool {
    !name.trim().is_empty() && name != ON_RECEIVE && name != ON_SEND
}

#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: HashMap<String, HandlerSet>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `handlers` under `name`, replacing (not merging) any earlier set.
    pub fn register_channel(
        &mut self,
        name: &str,
        handlers: HandlerSet,
    ) -> ClientResult<Option<HandlerSet>> {
        if name.trim().is_empty() {
            return Err(ClientError::InvalidChannelName);
        }
        handlers.validate()?;
        Ok(self.channels.insert(name.to_string(), handlers))
    }

    pub fn add_message_handler(
        &mut self,
        name: &str,
        handler: impl FnMut(&Envelope) + Send + 'static,
    ) -> ClientResult<()> {
        self.entry(name)?.chain_receive(Box::new(handler));
        Ok(())
    }

    pub fn add_command_handler(
        &mut self,
        name: &str,
        command: &str,
        handler: impl FnMut(&CommandEvent) + Send + 'static,
    ) -> ClientResult<()> {
        if !is_valid_command_name(command) {
            return Err(ClientError::InvalidHandlerName(command.to_string()));
        }
        self.entry(name)?
            .commands
            .insert(command.to_string(), Box::new(handler));
        Ok(())
    }

    fn entry(&mut self, name: &str) -> ClientResult<&mut HandlerSet> {
        if name.trim().is_empty() {
            return Err(ClientError::InvalidChannelName);
        }
        Ok(self.channels.entry(name.to_string()).or_default())
    }

    pub fn has_handler(&self, name: &str, event: &str) -> bool {
        self.channels
            .get(name)
            .is_some_and(|handlers| handlers.has(event))
    }

    pub fn get_handlers(&self, name: &str) -> Option<&HandlerSet> {
        self.channels.get(name)
    }

    pub fn get_handlers_mut(&mut self, name: &str) -> Option<&mut HandlerSet> {
        self.channels.get_mut(name)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }
}
