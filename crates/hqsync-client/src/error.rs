//! Client error type.

use hqsync_crdt::CrdtError;
use hqsync_types::{ScopeError, ScopeKey};
use thiserror::Error;

use crate::config::ConfigError;
use crate::persistence::PersistenceError;
use crate::store::StoreError;
use crate::transport::TransportError;

/// Errors returned by [`SyncClient`](crate::SyncClient) actions.
///
/// Collaborator failures inside a running session are logged and degrade
/// the session instead; only direct user actions surface errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("document: {0}")]
    Crdt(#[from] CrdtError),

    #[error("invalid scope: {0}")]
    Scope(#[from] ScopeError),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("persistence: {0}")]
    Persistence(#[from] PersistenceError),

    /// Record actions need exactly one team and one HQ selected.
    #[error("select exactly one team and one HQ (have {teams} teams, {hqs} HQs)")]
    AmbiguousTarget { teams: usize, hqs: usize },

    #[error("no live session for {0}")]
    NotLive(ScopeKey),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("record {0} not found")]
    RecordNotFound(String),

    #[error("record is missing {0}")]
    MissingField(&'static str),

    #[error("snapshot is {bytes} bytes, over the {limit} byte limit")]
    SnapshotTooLarge { bytes: usize, limit: usize },
}

pub type Result<T> = std::result::Result<T, ClientError>;
