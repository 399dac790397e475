//! Record document backed by a Loro document.
//!
//! # Document Structure
//!
//! ```text
//! ROOT
//! ├── data (List<Str>)               # HQ documents: one JSON-encoded record per element
//! └── data/{team}/{hq} (List<Str>)   # month cache: one namespaced list per HQ
//! ```
//!
//! Records are immutable, so each element is a single JSON string rather than
//! a nested map container. Identity lives in the record's `invoice_no` field.
//!
//! # Convergence
//!
//! All mutation goes through the Loro oplog. Snapshots exported with
//! [`RecordDocument::export_snapshot`] carry the full history, so importing
//! the same snapshot twice (or importing our own state back) leaves the
//! frontier unchanged and emits no event.

use hqsync_types::Record;
use loro::{ExportMode, LoroDoc, LoroList, ToJson, ValueOrContainer};
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::{CrdtError, Origin, Result};

/// Sequence name used by HQ-level documents.
pub const DEFAULT_SEQUENCE: &str = "data";

/// Emitted after every mutation that changed the document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocEvent {
    pub document_id: String,
    pub origin: Origin,
    /// Document version after the change.
    pub version: u64,
}

/// Receiving side of a document observation. Dropping it unsubscribes.
#[derive(Debug)]
pub struct DocObserver {
    rx: mpsc::UnboundedReceiver<DocEvent>,
}

impl DocObserver {
    /// All queued events, in order.
    pub fn drain(&mut self) -> Vec<DocEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            out.push(event);
        }
        out
    }
}

/// Ordered record sequences with CRDT merge.
pub struct RecordDocument {
    /// Identifier used in logs and events (normally the scope string).
    document_id: String,

    /// Loro document containing all CRDT state.
    doc: LoroDoc,

    /// Bumped on every change, local or merged.
    version: u64,

    observers: Vec<mpsc::UnboundedSender<DocEvent>>,
}

impl std::fmt::Debug for RecordDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordDocument")
            .field("document_id", &self.document_id)
            .field("version", &self.version)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl RecordDocument {
    /// Create a new empty document.
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            doc: LoroDoc::new(),
            version: 0,
            observers: Vec::new(),
        }
    }

    /// Decode a snapshot into a standalone document.
    pub fn from_snapshot(document_id: impl Into<String>, bytes: &[u8]) -> Result<Self> {
        let doc = LoroDoc::new();
        doc.import(bytes).map_err(|e| CrdtError::Decode {
            bytes: bytes.len(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            document_id: document_id.into(),
            doc,
            version: 0,
            observers: Vec::new(),
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    fn list(&self, sequence: &str) -> LoroList {
        self.doc.get_list(sequence)
    }

    /// Number of elements in a sequence (including undecodable ones).
    pub fn len(&self, sequence: &str) -> usize {
        self.list(sequence).len()
    }

    pub fn is_sequence_empty(&self, sequence: &str) -> bool {
        self.len(sequence) == 0
    }

    fn decode_at(&self, list: &LoroList, index: usize) -> Option<Record> {
        let value = match list.get(index)? {
            ValueOrContainer::Value(v) => v.to_json_value(),
            ValueOrContainer::Container(_) => {
                warn!("{}: element {} is a container, expected a record", self.document_id, index);
                return None;
            }
        };
        let serde_json::Value::String(encoded) = value else {
            warn!("{}: element {} is not an encoded record", self.document_id, index);
            return None;
        };
        match Record::from_json_str(&encoded) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("{}: skipping malformed record at {}: {}", self.document_id, index, e);
                None
            }
        }
    }

    /// All decodable records of a sequence, in document order.
    pub fn records(&self, sequence: &str) -> Vec<Record> {
        let list = self.list(sequence);
        (0..list.len()).filter_map(|i| self.decode_at(&list, i)).collect()
    }

    /// Index of the first record with the given invoice number.
    pub fn position_of_invoice(&self, sequence: &str, invoice_no: &str) -> Option<usize> {
        let list = self.list(sequence);
        (0..list.len()).find(|&i| {
            self.decode_at(&list, i)
                .is_some_and(|r| r.invoice_no() == Some(invoice_no))
        })
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Append records to the end of a sequence.
    pub fn append(&mut self, sequence: &str, records: &[Record], origin: Origin) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let list = self.list(sequence);
        for record in records {
            list.push(record.to_json_string())
                .map_err(|e| CrdtError::Internal(e.to_string()))?;
        }
        self.doc.commit();
        trace!("{}: appended {} records to {:?}", self.document_id, records.len(), sequence);
        self.changed(origin);
        Ok(())
    }

    /// Delete the element at `index`, returning it if it decoded.
    pub fn delete_at(&mut self, sequence: &str, index: usize, origin: Origin) -> Result<Option<Record>> {
        let list = self.list(sequence);
        let len = list.len();
        if index >= len {
            return Err(CrdtError::IndexOutOfBounds {
                sequence: sequence.to_string(),
                index,
                len,
            });
        }
        let removed = self.decode_at(&list, index);
        list.delete(index, 1)
            .map_err(|e| CrdtError::Internal(e.to_string()))?;
        self.doc.commit();
        self.changed(origin);
        Ok(removed)
    }

    /// Delete exactly one record, the first whose `invoice_no` matches.
    ///
    /// Returns `Ok(None)` when no record matches.
    pub fn delete_invoice(&mut self, sequence: &str, invoice_no: &str, origin: Origin) -> Result<Option<Record>> {
        match self.position_of_invoice(sequence, invoice_no) {
            Some(index) => self.delete_at(sequence, index, origin),
            None => Ok(None),
        }
    }

    /// Replace the whole content of a sequence.
    pub fn replace_sequence(&mut self, sequence: &str, records: &[Record], origin: Origin) -> Result<()> {
        let list = self.list(sequence);
        let len = list.len();
        if len > 0 {
            list.delete(0, len)
                .map_err(|e| CrdtError::Internal(e.to_string()))?;
        }
        for record in records {
            list.push(record.to_json_string())
                .map_err(|e| CrdtError::Internal(e.to_string()))?;
        }
        self.doc.commit();
        self.changed(origin);
        Ok(())
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Export the full document state.
    pub fn export_snapshot(&self) -> Result<Vec<u8>> {
        self.doc
            .export(ExportMode::Snapshot)
            .map_err(|e| CrdtError::Export(e.to_string()))
    }

    /// Merge a snapshot or update into this document.
    ///
    /// Returns `true` when the document changed. Re-importing state that is
    /// already present returns `false` and notifies nobody.
    pub fn import(&mut self, bytes: &[u8], origin: Origin) -> Result<bool> {
        let before = self.doc.oplog_frontiers();
        self.doc.import(bytes).map_err(|e| CrdtError::Decode {
            bytes: bytes.len(),
            reason: e.to_string(),
        })?;
        self.doc.commit();
        if self.doc.oplog_frontiers() == before {
            trace!("{}: import from {} was a no-op", self.document_id, origin);
            return Ok(false);
        }
        self.changed(origin);
        Ok(true)
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Subscribe to change events.
    pub fn observe(&mut self) -> DocObserver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push(tx);
        DocObserver { rx }
    }

    fn changed(&mut self, origin: Origin) {
        self.version = self.version.wrapping_add(1);
        let event = DocEvent {
            document_id: self.document_id.clone(),
            origin,
            version: self.version,
        };
        self.observers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

// ============================================================================
// TESTS
// ============================================================================
