//! hqsync client library
//!
//! Scoped replication engine for Month → Team → HQ record sets. Each HQ is
//! one replicated document kept convergent over three paths: a peer room,
//! a durable document store, and local on-device persistence.
//!
//! Collaborators are traits ([`DurableStore`], [`PeerTransport`],
//! [`LocalPersistence`]); in-memory and SQLite implementations ship here.

pub mod aggregate;
pub mod catalog;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod loader;
pub mod month;
pub mod persistence;
pub mod relay;
pub mod resolver;
pub mod selection;
pub mod session;
pub mod store;
pub mod subscription;
pub mod transport;

pub use aggregate::{DataAggregator, QualityReport, RecordSource, aggregate};
pub use catalog::Catalog;
pub use client::SyncClient;
pub use config::{ConfigError, SyncConfig};
pub use error::{ClientError, Result};
pub use events::{ClientEvent, ConnectionStatus, Inbound, InboundEvent};
pub use loader::{HierarchicalLoader, LoadOutcome, LoadedSet};
pub use month::{MonthSession, ReconcileReport, SummaryOutcome};
pub use persistence::{LocalPersistence, MemoryPersistence, PersistenceError, ReplicaHandle, SqlitePersistence};
pub use relay::{CloudRelay, FanoutReport, InitialLoad, RelayResult, RelaySkip, SaveResult, load_fanout};
pub use resolver::resolve;
pub use selection::SelectionState;
pub use session::{ReplicaSession, SessionDeps, SessionUpdate};
pub use store::{
    ChangeSink, DocPath, DurableStore, FieldValue, MemoryStore, SqliteStore, StoreChange, StoreDocument, StoreError,
    StoreLayout,
};
pub use subscription::SubscriptionHandle;
pub use transport::{LoopbackHub, PeerLink, PeerTransport, TransportError, TransportEvent, TransportSink};
