//! Peer transport abstraction.
//!
//! Sessions join a named room and exchange opaque document updates with
//! whoever else is in it. Delivery is best-effort and unordered; the CRDT
//! merge makes duplicates and reordering harmless.

mod loopback;

pub use loopback::LoopbackHub;

use std::sync::Arc;

use async_trait::async_trait;
use hqsync_types::RoomName;
use thiserror::Error;

use crate::events::ConnectionStatus;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport unreachable: {0}")]
    Unreachable(String),
    #[error("room {0} already left")]
    Closed(RoomName),
}

/// Event delivered to a room member.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// Document update from another member.
    Update(Vec<u8>),
    /// Number of connected clients in the room, this one included.
    Presence(usize),
    Status(ConnectionStatus),
}

/// Callback receiving transport events. Must not block.
pub type TransportSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn join(&self, room: &RoomName, sink: TransportSink) -> Result<Box<dyn PeerLink>, TransportError>;
}

/// Membership in one room.
pub trait PeerLink: Send {
    fn room(&self) -> &RoomName;

    /// Send an update to every other member.
    fn broadcast(&self, update: &[u8]) -> Result<(), TransportError>;

    /// Connected clients, this one included.
    fn peers(&self) -> usize;

    /// Leave the room; the sink receives nothing after this returns.
    fn leave(self: Box<Self>);
}
