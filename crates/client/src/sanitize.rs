//! Receipt-side text cleanup for message payloads.
//!
//! Only string leaves are touched. A strip pattern takes priority over
//! entity escaping; escaping replaces just the first `<` and the first `>`
//! of each string, which is what existing servers and pages expect.

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{ClientError, ClientResult};
use crate::options::SessionOptions;

#[derive(Debug, Clone, Default)]
pub struct SanitizeRules {
    strip: Option<Regex>,
    html_entities: bool,
}

impl SanitizeRules {
    pub fn new(strip: Option<Regex>, html_entities: bool) -> Self {
        Self {
            strip,
            html_entities,
        }
    }

    pub fn from_options(options: &SessionOptions) -> ClientResult<Self> {
        let strip = match options.strip_pattern.as_deref() {
            Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
                ClientError::InvalidOptions(format!("strip pattern {pattern:?}: {e}"))
            })?),
            None => None,
        };
        Ok(Self::new(strip, options.html_entities))
    }

    pub fn is_noop(&self) -> bool {
        self.strip.is_none() && !self.html_entities
    }

    pub fn apply_str(&self, text: &str) -> String {
        if let Some(strip) = &self.strip {
            strip.replace_all(text, "").into_owned()
        } else if self.html_entities {
            text.replacen('<', "&lt;", 1).replacen('>', "&gt;", 1)
        } else {
            text.to_string()
        }
    }

    pub fn apply(&self, value: Value) -> Value {
        match value {
            Value::String(text) => Value::String(self.apply_str(&text)),
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.apply(v)).collect()),
            Value::Object(map) => Value::Object(self.apply_map(map)),
            other => other,
        }
    }

    pub fn apply_map(&self, map: Map<String, Value>) -> Map<String, Value> {
        if self.is_noop() {
            return map;
        }
        map.into_iter().map(|(k, v)| (k, self.apply(v))).collect()
    }
}
