//! Client event types.
//!
//! Provides [`ClientEvent`], the typed enum of everything the engine tells
//! its host about, and [`ConnectionStatus`] for per-session peer
//! connectivity. Subscribe via
//! [`SyncClient::subscribe_events()`](crate::SyncClient::subscribe_events).
//!
//! Also defines [`Inbound`], the envelope collaborator callbacks use to
//! hand events to the session owner.

use std::fmt;

use hqsync_types::{RoomName, ScopeKey};

use crate::store::StoreChange;
use crate::transport::TransportEvent;

// ============================================================================
// Event Types
// ============================================================================

/// Peer connectivity of one session.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// Joining the room, or the transport could not be reached.
    #[default]
    Connecting,
    /// Connected; carries a human-readable label.
    Online(String),
}

impl ConnectionStatus {
    pub fn online(room: &RoomName) -> Self {
        ConnectionStatus::Online(format!("Online: {room}"))
    }

    pub fn is_online(&self) -> bool {
        matches!(self, ConnectionStatus::Online(_))
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connecting => f.write_str("Connecting..."),
            ConnectionStatus::Online(label) => f.write_str(label),
        }
    }
}

/// Events pushed from the engine to its host via broadcast.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    /// Local state of a session has been restored; its records are readable.
    SessionReady { scope: ScopeKey },
    /// A session was shut down after its scope left the resident set.
    SessionClosed { scope: ScopeKey },
    /// Aggregated content changed; re-read [`SyncClient::data`](crate::SyncClient::data).
    ContentChanged { version: u64 },
    /// Peer count of a session changed.
    PresenceChanged { scope: ScopeKey, peers: usize },
    /// Peer connectivity of a session changed.
    StatusChanged { scope: ScopeKey, status: ConnectionStatus },
    /// An outbound snapshot exceeded the size ceiling and was not written.
    SaveSkipped { scope: ScopeKey, bytes: usize, limit: usize },
    /// An outbound snapshot write failed.
    SaveFailed { scope: ScopeKey, error: String },
    /// The team or HQ catalog for the current month changed.
    CatalogChanged,
}

// ============================================================================
// Inbound envelope
// ============================================================================

/// Collaborator event addressed to one session.
///
/// `epoch` identifies the session instance that registered the callback; an
/// envelope whose epoch no longer matches a live session is dropped.
#[derive(Clone, Debug)]
pub struct Inbound {
    pub scope: ScopeKey,
    pub epoch: u64,
    pub event: InboundEvent,
}

#[derive(Clone, Debug)]
pub enum InboundEvent {
    Store(StoreChange),
    Transport(TransportEvent),
}
