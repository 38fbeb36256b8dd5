//! File logging for the chat binary. Stdout carries the chat itself, so
//! nothing is ever logged to the terminal.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Socket-level crates log every frame at debug; keep them at warn unless asked.
const DEFAULT_FILTER: &str = "info,tungstenite=warn,tokio_tungstenite=warn";
const LOG_FILE: &str = "client.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub filter: String,
    pub format: LogFormat,
    /// Start each run with an empty log file
    pub truncate: bool,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let filter = lookup("SWITCHYARD_LOG_FILTER")
            .filter(|value| EnvFilter::try_new(value).is_ok())
            .or_else(|| lookup("RUST_LOG").filter(|value| EnvFilter::try_new(value).is_ok()))
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let format = match lookup("SWITCHYARD_LOG_FORMAT") {
            Some(value) if value.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        };
        let truncate = lookup("SWITCHYARD_TRUNCATE_LOG_ON_START").as_deref() == Some("1");
        Self {
            filter,
            format,
            truncate,
        }
    }
}

pub struct LoggingHandle {
    pub run_id: String,
    pub log_path: PathBuf,
    pub guard: WorkerGuard,
}

pub fn init_logging(log_dir: &Path, settings: &LogSettings) -> anyhow::Result<LoggingHandle> {
    std::fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join(LOG_FILE);
    if settings.truncate {
        std::fs::File::create(&log_path)?;
    }

    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    let registry = tracing_subscriber::registry().with(EnvFilter::try_new(&settings.filter)?);
    match settings.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .pretty()
                    .with_target(true),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .json()
                    .flatten_event(true)
                    .with_target(true),
            )
            .try_init()?,
    }

    let run_id = format!("pid-{}-{}", std::process::id(), switchyard_protocol::new_id());
    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        run_id = %run_id,
        log_path = %log_path.display(),
        format = ?settings.format,
        filter = %settings.filter,
    );

    Ok(LoggingHandle {
        run_id,
        log_path,
        guard,
    })
}
