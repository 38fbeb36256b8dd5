//! Identity and subscribed-channel persistence on top of a [`Store`].
//!
//! The subscription set is kept as a JSON array: ordered, no duplicates.

use tracing::warn;

use crate::options::SessionOptions;
use crate::store::{Store, StoreError};

pub struct ChannelStore<S: Store> {
    store: S,
    identity_key: String,
    channels_key: String,
    retention_days: u32,
}

impl<S: Store> ChannelStore<S> {
    pub fn new(store: S, options: &SessionOptions) -> Self {
        Self {
            store,
            identity_key: options.identity_key.clone(),
            channels_key: options.channels_key.clone(),
            retention_days: options.retention_days,
        }
    }

    /// Pick up key names and retention after an options merge.
    pub fn apply_options(&mut self, options: &SessionOptions) {
        self.identity_key = options.identity_key.clone();
        self.channels_key = options.channels_key.clone();
        self.retention_days = options.retention_days;
    }

    pub fn identity(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .store
            .get(&self.identity_key)?
            .filter(|identity| !identity.is_empty()))
    }

    pub fn save_identity(&mut self, identity: &str) -> Result<(), StoreError> {
        self.store
            .set(&self.identity_key, identity, self.retention_days)
    }

    pub fn clear_identity(&mut self) -> Result<(), StoreError> {
        self.store.remove(&self.identity_key)
    }

    pub fn channels(&self) -> Result<Vec<String>, StoreError> {
        let Some(raw) = self.store.get(&self.channels_key)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(channels) => Ok(dedup(channels)),
            Err(e) => {
                warn!(
                    component = "channel_store",
                    event = "channel_store.corrupt",
                    key = %self.channels_key,
                    error = %e,
                    "Persisted channel set unreadable, treating as empty"
                );
                Ok(Vec::new())
            }
        }
    }

    /// Returns `true` when the channel was not yet persisted.
    pub fn add_channel(&mut self, channel: &str) -> Result<bool, StoreError> {
        let mut channels = self.channels()?;
        if channels.iter().any(|c| c == channel) {
            return Ok(false);
        }
        channels.push(channel.to_string());
        self.write_channels(&channels)?;
        Ok(true)
    }

    /// Returns `true` when the channel was persisted before.
    pub fn remove_channel(&mut self, channel: &str) -> Result<bool, StoreError> {
        let mut channels = self.channels()?;
        let before = channels.len();
        channels.retain(|c| c != channel);
        if channels.len() == before {
            return Ok(false);
        }
        self.write_channels(&channels)?;
        Ok(true)
    }

    fn write_channels(&mut self, channels: &[String]) -> Result<(), StoreError> {
        let encoded = serde_json::to_string(channels).unwrap_or_else(|_| "[]".into());
        self.store
            .set(&self.channels_key, &encoded, self.retention_days)
    }
}

fn dedup(channels: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(channels.len());
    for channel in channels {
        if !out.contains(&channel) {
            out.push(channel);
        }
    }
    out
}
