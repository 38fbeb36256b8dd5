//! Switchyard Protocol
//!
//! Wire envelope shared between switchyard clients and the realtime server.
//! Envelopes are serialized as JSON text frames over the transport.

use uuid::Uuid;

pub mod client;
pub mod server;
pub mod types;

pub use client::{encode, init, publish, subscribe, trigger, unsubscribe};
pub use server::{decode, DecodeError};
pub use types::*;

/// Random v4 UUID string, used for guest identities and run ids
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
