//! Client error taxonomy

use thiserror::Error;

use switchyard_protocol::DecodeError;

use crate::store::StoreError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    MalformedEnvelope(#[from] DecodeError),

    #[error("channel {0:?} is not registered")]
    UnknownChannel(String),

    #[error("channel {channel:?} has no {handler:?} handler")]
    MissingHandler { channel: String, handler: String },

    #[error("cannot format timestamp {0:?}")]
    InvalidTimestamp(String),

    #[error("channel name must not be empty")]
    InvalidChannelName,

    #[error("invalid handler name {0:?}")]
    InvalidHandlerName(String),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ClientResult<T> = Result<T, ClientError>;
