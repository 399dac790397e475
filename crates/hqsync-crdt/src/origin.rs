//! Origin tracking for document mutations.
//!
//! Used to prevent echo loops across the three sync paths:
//! - Local edits are saved to the durable store and broadcast to peers
//! - Updates received from peers or the store are NOT sent back

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

/// Where a document mutation came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Origin {
    /// User action on this client.
    #[default]
    Local,
    /// Update received over the peer transport.
    Peer,
    /// Update relayed in from the durable store.
    Relay,
    /// State restored from local persistence or read during session open.
    InitialLoad,
}

impl Origin {
    /// Only local edits trigger an outbound durable save.
    pub fn schedules_save(self) -> bool {
        self == Origin::Local
    }

    /// Only local edits are re-broadcast to peers.
    pub fn rebroadcasts(self) -> bool {
        self == Origin::Local
    }
}
