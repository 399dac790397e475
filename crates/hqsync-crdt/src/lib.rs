//! Replicated record document model for hqsync.
//!
//! Wraps a [Loro](https://crates.io/crates/loro) document holding one or more
//! named ordered sequences of [`Record`](hqsync_types::Record)s. HQ documents
//! use the single sequence [`DEFAULT_SEQUENCE`]; the month cache uses one
//! namespaced sequence per HQ (`data/{team}/{hq}`).
//!
//! # CRDT Semantics
//!
//! - **Sequences**: list CRDT; concurrent appends from different peers
//!   interleave deterministically, deletes remove exactly the targeted element
//! - **Snapshots**: full-state exports; importing one is commutative and
//!   idempotent, so re-delivery through any path is a no-op
//!
//! # Origins
//!
//! Every mutation carries an [`Origin`]. Observers use it to decide whether a
//! change should be saved, broadcast, or left alone.

mod document;
mod error;
mod origin;

pub use document::{DEFAULT_SEQUENCE, DocEvent, DocObserver, RecordDocument};
pub use error::CrdtError;
pub use origin::Origin;

/// Result type for CRDT operations.
pub type Result<T> = std::result::Result<T, CrdtError>;
