//! Switchyard
//!
//! Terminal chat client for realtime channel servers.

mod chat;
mod logging;
mod paths;
mod ws_transport;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use switchyard_client::{
    Connect, OptionsPatch, Session, SessionOptions, SqliteStore, Store, Transport, TransportError,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::chat::{Chat, Flow};
use crate::logging::{init_logging, LogSettings};
use crate::paths::DataDir;
use crate::ws_transport::WsTransport;

#[derive(Debug, Parser)]
#[command(
    name = "switchyard",
    version,
    about = "Chat over a switchyard realtime server from the terminal"
)]
struct Args {
    /// Server host
    #[arg(long, env = "SWITCHYARD_HOST")]
    host: Option<String>,

    /// Server port
    #[arg(long, env = "SWITCHYARD_PORT")]
    port: Option<u16>,

    /// Path the server mounts its socket on
    #[arg(long, env = "SWITCHYARD_RESOURCE")]
    resource: Option<String>,

    /// Identity to announce; defaults to the stored one, then a guest name
    #[arg(long, short, env = "SWITCHYARD_IDENTITY")]
    identity: Option<String>,

    /// Channels to join at startup; the first one is active
    #[arg(
        long = "channel",
        short,
        env = "SWITCHYARD_CHANNELS",
        value_delimiter = ',',
        default_value = "chat"
    )]
    channels: Vec<String>,

    /// Timestamp mask or named mask, empty for raw timestamps
    #[arg(long, env = "SWITCHYARD_DATE_FORMAT")]
    date_format: Option<String>,

    /// Regex removed from incoming text
    #[arg(long, env = "SWITCHYARD_STRIP_PATTERN")]
    strip_pattern: Option<String>,

    /// Escape the first `<` and `>` of incoming text
    #[arg(long, env = "SWITCHYARD_HTML_ENTITIES")]
    html_entities: Option<bool>,

    /// Days the identity and channel list are kept; 0 keeps them forever
    #[arg(long, env = "SWITCHYARD_RETENTION_DAYS")]
    retention_days: Option<u32>,

    /// Seconds between reconnect attempts
    #[arg(long, env = "SWITCHYARD_RETRY_SECS", default_value_t = 3)]
    retry_secs: u64,

    /// Data directory (defaults to SWITCHYARD_DATA_DIR, then ~/.switchyard)
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

impl Args {
    fn options_patch(&self) -> OptionsPatch {
        OptionsPatch {
            host: self.host.clone(),
            port: self.port,
            resource: self.resource.clone(),
            strip_pattern: self.strip_pattern.clone(),
            html_entities: self.html_entities,
            date_format: self.date_format.clone(),
            retention_days: self.retention_days,
            ..Default::default()
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let data_dir = DataDir::resolve(args.data_dir.as_deref())?;
    data_dir.ensure_dirs()?;
    let logging = init_logging(&data_dir.log_dir(), &LogSettings::from_env())?;
    let _log_guard = logging.guard;

    let options = SessionOptions::default().merge(&args.options_patch());
    info!(
        component = "main",
        event = "main.starting",
        run_id = %logging.run_id,
        log_path = %logging.log_path.display(),
        endpoint = %options.endpoint(),
        data_dir = %data_dir.root().display(),
        "Starting switchyard"
    );

    let store = SqliteStore::open(&data_dir.db_path())?;
    let identity = match args.identity.clone() {
        Some(identity) => Some(identity),
        None if store.get(&options.identity_key)?.is_some() => None,
        None => Some(chat::guest_identity()),
    };

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let retry_delay = Duration::from_secs(args.retry_secs);
    let factory = move |options: &SessionOptions| -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(WsTransport::new(
            options.endpoint(),
            retry_delay,
            events_tx.clone(),
        )))
    };
    let mut session = Session::with_options(options, store, factory)?;

    let printer = chat::stdout_printer();
    let active = args.channels.first().cloned().unwrap_or_else(|| "chat".into());
    let mut chat = Chat::new(active, printer.clone());
    for channel in &args.channels {
        chat.install(&mut session, channel)?;
    }

    let mut connect = Connect::new().on_connect({
        let printer = printer.clone();
        move || printer(console::style("* connected").dim().to_string())
    });
    if let Some(identity) = identity {
        connect = connect.identity(identity);
    }
    session.connect(connect)?;
    session.subscribe(args.channels.clone())?;
    printer(format!(
        "* {} in #{}",
        session.identity().unwrap_or("anonymous"),
        chat.active()
    ));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            Some(event) = events_rx.recv() => {
                session.handle_event(event);
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match chat.execute(&mut session, chat::parse_input(&line)) {
                    Ok(Flow::Quit) => break,
                    Ok(Flow::Continue) => {}
                    Err(e) => {
                        warn!(
                            component = "main",
                            event = "main.command.failed",
                            error = %e,
                            "Command failed"
                        );
                        printer(format!("! {e}"));
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!(component = "main", event = "main.stopped", "Stopped");
    Ok(())
}
