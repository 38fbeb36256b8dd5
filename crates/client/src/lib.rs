//! Switchyard Client
//!
//! Multiplexes named channels over one realtime transport. Application code
//! registers a handler set per channel, the [`Session`] sends
//! subscribe/publish/trigger envelopes, and inbound frames are routed to the
//! matching handler by the dispatcher.
//!
//! Identity and the subscribed-channel set are kept in a [`Store`] so a
//! reconnecting client can ask the server to restore its subscriptions.

pub mod channel_store;
pub mod dispatcher;
pub mod error;
pub mod options;
pub mod registry;
pub mod sanitize;
pub mod session;
pub mod sqlite_store;
pub mod store;
pub mod timestamp;
pub mod transport;

pub use dispatcher::{ConnectionState, DispatchOutcome, DropReason};
pub use error::{ClientError, ClientResult};
pub use options::{OptionsPatch, SessionOptions};
pub use registry::{CommandEvent, HandlerSet, ON_RECEIVE, ON_SEND};
pub use session::{ChannelList, Connect, Session};
pub use sqlite_store::SqliteStore;
pub use store::{MemoryStore, Store, StoreError};
pub use transport::{Transport, TransportError, TransportEvent, TransportFactory};
