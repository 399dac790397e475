//! Error types for CRDT operations.

use thiserror::Error;

/// Errors that can occur during document operations.
#[derive(Error, Debug)]
pub enum CrdtError {
    /// Index out of bounds for a sequence.
    #[error("index {index} out of bounds for sequence {sequence:?} with length {len}")]
    IndexOutOfBounds {
        sequence: String,
        index: usize,
        len: usize,
    },

    /// Snapshot or update bytes could not be decoded.
    #[error("failed to decode update ({bytes} bytes): {reason}")]
    Decode { bytes: usize, reason: String },

    /// Snapshot export failed.
    #[error("failed to export snapshot: {0}")]
    Export(String),

    /// Internal CRDT consistency error.
    #[error("internal CRDT error: {0}")]
    Internal(String),
}
