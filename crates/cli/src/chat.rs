//! Terminal presentation: chat printer, typing indicator, live counter and
//! slash commands.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use console::style;
use serde_json::{json, Value};
use switchyard_client::{ClientResult, CommandEvent, HandlerSet, Session};
use switchyard_protocol::{Envelope, CMD_ON_DISCONNECT, CMD_ON_SUBSCRIBE, CMD_ON_UNSUBSCRIBE};

pub const ON_TYPING: &str = "onTyping";
pub const DONE_TYPING: &str = "doneTyping";

pub type Printer = Arc<dyn Fn(String) + Send + Sync>;

pub fn stdout_printer() -> Printer {
    Arc::new(|line| println!("{line}"))
}

/// Identity used when none is configured or persisted.
pub fn guest_identity() -> String {
    format!("guest-{}", switchyard_protocol::new_id())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Say(String),
    Join(Vec<String>),
    Leave(Vec<String>),
    Typing(bool),
    Who,
    Forget,
    Quit,
    Empty,
    Unknown(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Say(line.to_string());
    };

    let mut words = command.split_whitespace();
    let name = words.next().unwrap_or_default();
    let args: Vec<String> = words.map(str::to_string).collect();
    match name {
        "join" if !args.is_empty() => Input::Join(args),
        "leave" if !args.is_empty() => Input::Leave(args),
        "typing" => Input::Typing(args.first().map(String::as_str) != Some("off")),
        "who" => Input::Who,
        "forget" => Input::Forget,
        "quit" | "exit" => Input::Quit,
        _ => Input::Unknown(line.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

#[derive(Debug, Default)]
struct Room {
    typing: BTreeSet<String>,
    live: Option<u64>,
}

/// Per-channel view state shared with the registered handlers.
#[derive(Clone, Default)]
struct Rooms(Arc<Mutex<HashMap<String, Room>>>);

impl Rooms {
    fn with<R>(&self, channel: &str, f: impl FnOnce(&mut Room) -> R) -> R {
        let mut rooms = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(rooms.entry(channel.to_string()).or_default())
    }
}

pub struct Chat {
    active: String,
    typing: bool,
    rooms: Rooms,
    printer: Printer,
}

impl Chat {
    pub fn new(active: impl Into<String>, printer: Printer) -> Self {
        Self {
            active: active.into(),
            typing: false,
            rooms: Rooms::default(),
            printer,
        }
    }

    pub fn active(&self) -> &str {
        &self.active
    }

    fn print(&self, line: String) {
        (self.printer)(line)
    }

    /// Register the presentation handlers for `channel` once.
    pub fn install(&self, session: &mut Session, channel: &str) -> ClientResult<()> {
        if session.registry().is_registered(channel) {
            return Ok(());
        }

        let name = channel.to_string();
        let printer = self.printer.clone();
        let receive = move |envelope: &Envelope| printer(render_message(&name, envelope));

        let (printer, rooms, name) = (self.printer.clone(), self.rooms.clone(), channel.to_string());
        let joined = move |event: &CommandEvent| {
            let live = event.options.get("count").and_then(Value::as_u64);
            if live.is_some() {
                rooms.with(&name, |room| room.live = live);
            }
            printer(render_notice(&name, event, "joined"));
        };

        let (printer, rooms, name) = (self.printer.clone(), self.rooms.clone(), channel.to_string());
        let left = move |event: &CommandEvent| {
            if let Some(who) = &event.identity {
                rooms.with(&name, |room| room.typing.remove(who));
            }
            printer(render_notice(&name, event, "left"));
        };

        let (printer, rooms, name) = (self.printer.clone(), self.rooms.clone(), channel.to_string());
        let dropped = move |event: &CommandEvent| {
            if let Some(who) = &event.identity {
                rooms.with(&name, |room| room.typing.remove(who));
            }
            printer(render_notice(&name, event, "disconnected"));
        };

        let (printer, rooms, name) = (self.printer.clone(), self.rooms.clone(), channel.to_string());
        let typing = move |event: &CommandEvent| {
            let who = event.identity.clone().unwrap_or_else(|| "someone".into());
            if rooms.with(&name, |room| room.typing.insert(who.clone())) {
                printer(format!("{} {} is typing", channel_tag(&name), style(&who).italic()));
            }
        };

        let (rooms, name) = (self.rooms.clone(), channel.to_string());
        let done_typing = move |event: &CommandEvent| {
            if let Some(who) = &event.identity {
                rooms.with(&name, |room| room.typing.remove(who));
            }
        };

        session.register_channel(
            channel,
            HandlerSet::new()
                .on_receive(receive)
                .on_command(CMD_ON_SUBSCRIBE, joined)
                .on_command(CMD_ON_UNSUBSCRIBE, left)
                .on_command(CMD_ON_DISCONNECT, dropped)
                .on_command(ON_TYPING, typing)
                .on_command(DONE_TYPING, done_typing),
        )?;

        // A message from someone ends their typing indicator.
        let (rooms, name) = (self.rooms.clone(), channel.to_string());
        session.add_message_handler(channel, move |envelope| {
            if let Some(who) = &envelope.identity {
                rooms.with(&name, |room| room.typing.remove(who));
            }
        })
    }

    pub fn execute(&mut self, session: &mut Session, input: Input) -> ClientResult<Flow> {
        match input {
            Input::Empty => {}
            Input::Say(text) => {
                session.publish(&self.active, Value::String(text))?;
                if self.typing {
                    self.set_typing(session, false)?;
                }
            }
            Input::Join(channels) => {
                for channel in &channels {
                    self.install(session, channel)?;
                }
                session.subscribe(channels.clone())?;
                if let Some(last) = channels.last() {
                    self.active = last.clone();
                }
                self.print(format!("* now talking in {}", channel_tag(&self.active)));
            }
            Input::Leave(channels) => {
                session.unsubscribe(channels.clone())?;
                if channels.contains(&self.active) {
                    if let Some(next) = session.subscriptions()?.into_iter().next() {
                        self.active = next;
                    }
                }
                self.print(format!("* left {}", channels.join(", ")));
            }
            Input::Typing(on) => self.set_typing(session, on)?,
            Input::Who => {
                let (live, typing) = self.rooms.with(&self.active, |room| {
                    (room.live, room.typing.iter().cloned().collect::<Vec<_>>())
                });
                let mut line = format!(
                    "* you are {} in {}",
                    session.identity().unwrap_or("anonymous"),
                    channel_tag(&self.active)
                );
                if let Some(live) = live {
                    line.push_str(&format!(", {live} live"));
                }
                if !typing.is_empty() {
                    line.push_str(&format!(", typing: {}", typing.join(", ")));
                }
                line.push_str(&format!(", subscribed: {}", session.subscriptions()?.join(", ")));
                self.print(line);
            }
            Input::Forget => {
                session.clear_identity()?;
                self.print("* identity forgotten".to_string());
            }
            Input::Quit => return Ok(Flow::Quit),
            Input::Unknown(line) => {
                self.print(format!(
                    "* unknown command {line:?} (try /join /leave /typing /who /forget /quit)"
                ));
            }
        }
        Ok(Flow::Continue)
    }

    fn set_typing(&mut self, session: &mut Session, on: bool) -> ClientResult<()> {
        if on {
            session.trigger_event(&self.active, ON_TYPING, json!({}), true)?;
        } else {
            session.trigger_event(&self.active, DONE_TYPING, json!({}), false)?;
        }
        self.typing = on;
        Ok(())
    }
}

fn channel_tag(channel: &str) -> String {
    style(format!("#{channel}")).dim().to_string()
}

fn render_message(channel: &str, envelope: &Envelope) -> String {
    let who = envelope.identity.as_deref().unwrap_or("anonymous");
    let text = match envelope.msg() {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    match &envelope.timestamp {
        Some(at) => format!(
            "{} {} {} - {}",
            style(at).dim(),
            channel_tag(channel),
            style(who).bold().cyan(),
            text
        ),
        None => format!("{} {} - {}", channel_tag(channel), style(who).bold().cyan(), text),
    }
}

fn render_notice(channel: &str, event: &CommandEvent, verb: &str) -> String {
    let who = event.identity.as_deref().unwrap_or("someone");
    format!("* {} {} {}", style(who).yellow(), verb, channel_tag(channel))
}
