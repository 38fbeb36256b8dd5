//! Server → Client envelopes

use thiserror::Error;

use crate::types::{Envelope, Frame};

/// Frame could not be turned into an [`Envelope`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parse a frame into an envelope, unless it is already structured JSON.
pub fn decode(frame: Frame) -> Result<Envelope, DecodeError> {
    let envelope = match frame {
        Frame::Text(text) => serde_json::from_str(&text)?,
        Frame::Json(value) => serde_json::from_value(value)?,
    };
    Ok(envelope)
}
