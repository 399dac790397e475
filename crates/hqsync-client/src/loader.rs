//! Hierarchical loader: one-shot reads of HQ documents into the month cache.
//!
//! Used for resident scopes that have no live session. Each scope is read at
//! most once per month; the [`LoadedSet`] lives with the month and is
//! dropped with it.

use std::collections::HashSet;
use std::sync::Arc;

use hqsync_crdt::{DEFAULT_SEQUENCE, Origin, RecordDocument};
use hqsync_types::{Record, ScopeKey};
use tracing::{debug, trace, warn};

use crate::constants::FIELD_HQ_UPDATE;
use crate::store::{DurableStore, StoreLayout};

/// Scopes already merged into the month cache.
#[derive(Debug, Clone, Default)]
pub struct LoadedSet(HashSet<ScopeKey>);

impl LoadedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, scope: &ScopeKey) -> bool {
        self.0.contains(scope)
    }

    pub fn mark(&mut self, scope: ScopeKey) -> bool {
        self.0.insert(scope)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What happened to one scope in a load pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Already in the LoadedSet; nothing read.
    AlreadyLoaded,
    /// Records appended to the cache.
    Appended { records: usize },
    /// Read and decoded, but the cache already had records for the scope or
    /// the document had none.
    Kept,
    /// No document, or no snapshot in it.
    Absent,
    /// Read or decode failed; left unmarked for a later retry.
    Failed(String),
}

pub struct HierarchicalLoader {
    store: Arc<dyn DurableStore>,
    layout: StoreLayout,
}

impl HierarchicalLoader {
    pub fn new(store: Arc<dyn DurableStore>, layout: StoreLayout) -> Self {
        Self { store, layout }
    }

    /// Load every scope not yet in `loaded` into `cache`.
    pub async fn load_missing(
        &self,
        scopes: &[ScopeKey],
        loaded: &mut LoadedSet,
        cache: &mut RecordDocument,
    ) -> Vec<(ScopeKey, LoadOutcome)> {
        let mut outcomes = Vec::with_capacity(scopes.len());
        for scope in scopes {
            let outcome = self.load_one(scope, loaded, cache).await;
            outcomes.push((scope.clone(), outcome));
        }
        outcomes
    }

    pub async fn load_one(&self, scope: &ScopeKey, loaded: &mut LoadedSet, cache: &mut RecordDocument) -> LoadOutcome {
        if loaded.contains(scope) {
            trace!("{}: already loaded", scope);
            return LoadOutcome::AlreadyLoaded;
        }

        let path = match self.layout.hq_doc(scope) {
            Ok(path) => path,
            Err(e) => return LoadOutcome::Failed(e.to_string()),
        };

        let stored = match self.store.get(&path).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("{}: load read failed: {}", scope, e);
                return LoadOutcome::Failed(e.to_string());
            }
        };

        let Some(bytes) = stored.as_ref().and_then(|d| d.bytes(FIELD_HQ_UPDATE)).filter(|b| !b.is_empty()) else {
            debug!("{}: nothing stored", scope);
            loaded.mark(scope.clone());
            return LoadOutcome::Absent;
        };

        let records = match extract_records(bytes) {
            Ok(records) => records,
            Err(e) => {
                warn!("{}: stored snapshot failed to decode: {}", scope, e);
                return LoadOutcome::Failed(e);
            }
        };

        let namespace = scope.namespace();
        let outcome = if cache.is_sequence_empty(&namespace) && !records.is_empty() {
            if let Err(e) = cache.append(&namespace, &records, Origin::InitialLoad) {
                warn!("{}: cache append failed: {}", scope, e);
                return LoadOutcome::Failed(e.to_string());
            }
            LoadOutcome::Appended {
                records: records.len(),
            }
        } else {
            LoadOutcome::Kept
        };

        loaded.mark(scope.clone());
        debug!("{}: loaded ({:?})", scope, outcome);
        outcome
    }
}

/// Decode a stored snapshot in a standalone document and list its records.
pub fn extract_records(snapshot: &[u8]) -> Result<Vec<Record>, String> {
    let doc = RecordDocument::from_snapshot("extract", snapshot).map_err(|e| e.to_string())?;
    Ok(doc.records(DEFAULT_SEQUENCE))
}
