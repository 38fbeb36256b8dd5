//! Session configuration record

use serde::{Deserialize, Serialize};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_RESOURCE: &str = "socket.io";
pub const DEFAULT_IDENTITY_KEY: &str = "rt_identity";
pub const DEFAULT_CHANNELS_KEY: &str = "rt_channels";
pub const DEFAULT_DATE_FORMAT: &str = "shortTime";
pub const DEFAULT_RETENTION_DAYS: u32 = 365;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionOptions {
    pub host: String,
    pub port: u16,
    /// Path segment the server mounts its socket endpoint on
    pub resource: String,
    /// Store key holding the identity string
    pub identity_key: String,
    /// Store key holding the persisted subscription set
    pub channels_key: String,
    /// Regex removed from every inbound string; wins over `html_entities`
    pub strip_pattern: Option<String>,
    pub html_entities: bool,
    /// Mask or named mask; empty leaves timestamps untouched
    pub date_format: String,
    pub retention_days: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            resource: DEFAULT_RESOURCE.to_string(),
            identity_key: DEFAULT_IDENTITY_KEY.to_string(),
            channels_key: DEFAULT_CHANNELS_KEY.to_string(),
            strip_pattern: None,
            html_entities: true,
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

/// Partial options; every `Some` field overrides the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OptionsPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub resource: Option<String>,
    pub identity_key: Option<String>,
    pub channels_key: Option<String>,
    pub strip_pattern: Option<String>,
    pub html_entities: Option<bool>,
    pub date_format: Option<String>,
    pub retention_days: Option<u32>,
}

impl OptionsPatch {
    pub fn is_empty(&self) -> bool {
        *self == OptionsPatch::default()
    }
}

impl SessionOptions {
    /// Shallow merge, later keys win.
    pub fn merge(&self, patch: &OptionsPatch) -> SessionOptions {
        let mut merged = self.clone();
        if let Some(host) = &patch.host {
            merged.host = host.clone();
        }
        if let Some(port) = patch.port {
            merged.port = port;
        }
        if let Some(resource) = &patch.resource {
            merged.resource = resource.clone();
        }
        if let Some(key) = &patch.identity_key {
            merged.identity_key = key.clone();
        }
        if let Some(key) = &patch.channels_key {
            merged.channels_key = key.clone();
        }
        if let Some(pattern) = &patch.strip_pattern {
            // An empty pattern switches stripping back off.
            merged.strip_pattern = Some(pattern.clone()).filter(|p| !p.is_empty());
        }
        if let Some(enabled) = patch.html_entities {
            merged.html_entities = enabled;
        }
        if let Some(format) = &patch.date_format {
            merged.date_format = format.clone();
        }
        if let Some(days) = patch.retention_days {
            merged.retention_days = days;
        }
        merged
    }

    /// `ws://host:port/resource`
    pub fn endpoint(&self) -> String {
        let resource = self.resource.trim_start_matches('/');
        format!("ws://{}:{}/{}", self.host, self.port, resource)
    }
}
