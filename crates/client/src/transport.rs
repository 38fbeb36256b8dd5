//! Transport collaborator: a duplex message socket.
//!
//! The session owns at most one transport and creates it lazily through a
//! [`TransportFactory`]. Inbound traffic is not pulled from the transport;
//! the host feeds [`TransportEvent`]s into the session instead.

use switchyard_protocol::{Envelope, Frame};
use thiserror::Error;

use crate::options::SessionOptions;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait Transport: Send {
    /// Start connecting. Completion is reported as [`TransportEvent::Connected`].
    fn connect(&mut self) -> Result<(), TransportError>;
    fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError>;
}

/// Events a transport reports back to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Message(Frame),
    Disconnected,
}

pub trait TransportFactory: Send {
    fn create(&mut self, options: &SessionOptions) -> Result<Box<dyn Transport>, TransportError>;
}

impl<F> TransportFactory for F
where
    F: FnMut(&SessionOptions) -> Result<Box<dyn Transport>, TransportError> + Send,
{
    fn create(&mut self, options: &SessionOptions) -> Result<Box<dyn Transport>, TransportError> {
        (self)(options)
    }
}
