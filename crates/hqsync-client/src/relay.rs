//! Cloud relay: bridges one HQ document to its durable store location.
//!
//! # Protocol
//!
//! - Initial load: read `hqUpdate` and merge it (origin `InitialLoad`)
//!   before any outbound save is allowed. A failed load keeps saves
//!   disabled; the next save attempt retries the load first.
//! - Outbound: local mutations mark the relay dirty; a due save writes the
//!   full snapshot with `{hq, sales_team, hqUpdate, last_updated}` as a
//!   merge-style write.
//! - Inbound: store notifications are merged with origin `Relay`. Our own
//!   writes coming back are recognised by digest and skipped.
//! - Write-back: if an inbound snapshot is missing operations this replica
//!   has (a concurrent writer replaced ours), the relay marks itself dirty
//!   so the union is written back on the next save.
//!
//! ```text
//! +-----------+  initial_load ok  +---------+  mark_dirty  +-------+
//! | Unloaded  | ----------------> |  Clean  | -----------> | Dirty |
//! | (no save) | <--+              +---------+ <----------- +-------+
//! +-----------+    | load failed        save / too large / failed
//! ```

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use hqsync_crdt::{CrdtError, Origin, RecordDocument};
use hqsync_types::{ScopeKey, now_rfc3339};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::constants::{FIELD_HQ_NAME, FIELD_HQ_UPDATE, FIELD_LAST_UPDATED, FIELD_TEAM_NAME};
use crate::store::{
    ChangeSink, DocPath, DurableStore, FieldValue, StoreChange, StoreDocument, StoreError, StoreLayout,
};
use crate::subscription::SubscriptionHandle;

/// Result of the initial load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitialLoad {
    /// A stored snapshot was merged.
    Merged {
        changed: bool,
        /// Local state holds operations the store lacks; a save is scheduled.
        local_ahead: bool,
    },
    /// Nothing stored yet for this scope.
    Missing { local_ahead: bool },
    /// Read or decode failed; outbound saves stay disabled.
    Failed(String),
}

/// Outcome of handling one store notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayResult {
    /// The snapshot was merged.
    Merged { changed: bool },
    /// Notification ignored (see reason).
    Skipped { reason: RelaySkip },
}

/// Why a store notification was ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelaySkip {
    /// Arrived before the initial load completed.
    BeforeInitialLoad,
    /// Document deleted or carries no snapshot field.
    NoSnapshot,
    /// Byte-identical to the last snapshot this relay wrote.
    OwnEcho,
    /// Snapshot failed to decode.
    Decode(String),
}

/// Outcome of a save attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveResult {
    Saved { bytes: usize },
    /// Nothing pending.
    Clean,
    /// Initial load still failing; the save stays pending.
    Deferred,
    /// Snapshot over the size ceiling; dropped without retry.
    TooLarge { bytes: usize, limit: usize },
    /// Store write failed; dropped until the next local mutation.
    Failed(String),
}

fn digest(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

/// True if `snapshot` already contains every operation in `local`.
fn snapshot_covers(snapshot: &[u8], local: &RecordDocument) -> Result<bool, CrdtError> {
    let mut incoming = RecordDocument::from_snapshot("incoming", snapshot)?;
    let ours = local.export_snapshot()?;
    Ok(!incoming.import(&ours, Origin::Relay)?)
}

/// Relay state for one HQ scope.
pub struct CloudRelay {
    scope: ScopeKey,
    path: DocPath,
    store: Arc<dyn DurableStore>,
    max_snapshot_bytes: usize,
    subscription: Option<SubscriptionHandle>,
    /// Outbound saves are enabled only after a successful initial load.
    loaded: bool,
    /// Digest of the last snapshot we wrote (echo detection).
    last_written: Option<u64>,
    /// Set while a save is pending.
    dirty_since: Option<Instant>,
    saves: u64,
}

impl CloudRelay {
    pub fn new(
        scope: ScopeKey,
        layout: &StoreLayout,
        store: Arc<dyn DurableStore>,
        max_snapshot_bytes: usize,
    ) -> Result<Self, StoreError> {
        let path = layout.hq_doc(&scope)?;
        Ok(Self {
            scope,
            path,
            store,
            max_snapshot_bytes,
            subscription: None,
            loaded: false,
            last_written: None,
            dirty_since: None,
            saves: 0,
        })
    }

    pub fn path(&self) -> &DocPath {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_since.is_some()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Successful saves so far.
    pub fn saves(&self) -> u64 {
        self.saves
    }

    /// Start receiving store notifications for this scope.
    pub fn subscribe(&mut self, sink: ChangeSink) {
        self.subscription = Some(self.store.subscribe(&self.path, sink));
    }

    /// Stop receiving notifications. Returns once the sink is unregistered.
    pub fn detach(&mut self) {
        if let Some(handle) = self.subscription.take() {
            handle.cancel();
            trace!("{}: relay listener detached", self.scope);
        }
    }

    // =========================================================================
    // Initial load
    // =========================================================================

    pub async fn initial_load(&mut self, doc: &mut RecordDocument) -> InitialLoad {
        let stored = match self.store.get(&self.path).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("{}: initial load read failed: {}", self.scope, e);
                return InitialLoad::Failed(e.to_string());
            }
        };

        let Some(bytes) = stored.as_ref().and_then(|d| d.bytes(FIELD_HQ_UPDATE)).filter(|b| !b.is_empty()) else {
            self.loaded = true;
            let local_ahead = !doc.is_sequence_empty(hqsync_crdt::DEFAULT_SEQUENCE);
            if local_ahead {
                info!("{}: nothing stored yet, scheduling save of local state", self.scope);
                self.mark_dirty(Instant::now());
            }
            return InitialLoad::Missing { local_ahead };
        };

        let changed = match doc.import(bytes, Origin::InitialLoad) {
            Ok(changed) => changed,
            Err(e) => {
                warn!("{}: stored snapshot failed to decode: {}", self.scope, e);
                return InitialLoad::Failed(e.to_string());
            }
        };
        self.loaded = true;

        let local_ahead = match snapshot_covers(bytes, doc) {
            Ok(covers) => !covers,
            Err(e) => {
                warn!("{}: coverage check failed: {}", self.scope, e);
                false
            }
        };
        if local_ahead {
            info!("{}: local state ahead of store, scheduling save", self.scope);
            self.mark_dirty(Instant::now());
        }
        debug!("{}: initial load merged {} bytes (changed={})", self.scope, bytes.len(), changed);
        InitialLoad::Merged { changed, local_ahead }
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    pub fn handle_change(&mut self, doc: &mut RecordDocument, change: &StoreChange) -> RelayResult {
        if !self.loaded {
            trace!("{}: notification before initial load suppressed", self.scope);
            return RelayResult::Skipped {
                reason: RelaySkip::BeforeInitialLoad,
            };
        }

        let Some(bytes) = change
            .document
            .as_ref()
            .and_then(|d| d.bytes(FIELD_HQ_UPDATE))
            .filter(|b| !b.is_empty())
        else {
            return RelayResult::Skipped {
                reason: RelaySkip::NoSnapshot,
            };
        };

        if self.last_written == Some(digest(bytes)) {
            trace!("{}: own write echoed back, skipping", self.scope);
            return RelayResult::Skipped {
                reason: RelaySkip::OwnEcho,
            };
        }

        let changed = match doc.import(bytes, Origin::Relay) {
            Ok(changed) => changed,
            Err(e) => {
                warn!("{}: relayed snapshot failed to decode: {}", self.scope, e);
                return RelayResult::Skipped {
                    reason: RelaySkip::Decode(e.to_string()),
                };
            }
        };

        match snapshot_covers(bytes, doc) {
            Ok(true) => {}
            Ok(false) => {
                debug!("{}: store snapshot is missing local operations, writing back", self.scope);
                self.mark_dirty(Instant::now());
            }
            Err(e) => warn!("{}: coverage check failed: {}", self.scope, e),
        }

        trace!("{}: relayed {} bytes (changed={})", self.scope, bytes.len(), changed);
        RelayResult::Merged { changed }
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Record a pending save. The debounce window starts at the first mark.
    pub fn mark_dirty(&mut self, now: Instant) {
        if self.dirty_since.is_none() {
            self.dirty_since = Some(now);
        }
    }

    /// When the pending save becomes due.
    pub fn due_at(&self, debounce: Duration) -> Option<Instant> {
        self.dirty_since.map(|since| since + debounce)
    }

    pub fn is_save_due(&self, now: Instant, debounce: Duration) -> bool {
        self.due_at(debounce).is_some_and(|due| now >= due)
    }

    /// Write the full snapshot if a save is pending.
    pub async fn save(&mut self, doc: &mut RecordDocument) -> SaveResult {
        if self.dirty_since.is_none() {
            return SaveResult::Clean;
        }
        if !self.loaded {
            if let InitialLoad::Failed(_) = self.initial_load(doc).await {
                debug!("{}: save deferred, initial load still failing", self.scope);
                return SaveResult::Deferred;
            }
        }

        let snapshot = match doc.export_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("{}: snapshot export failed: {}", self.scope, e);
                self.dirty_since = None;
                return SaveResult::Failed(e.to_string());
            }
        };

        if snapshot.len() > self.max_snapshot_bytes {
            warn!(
                "{}: snapshot is {} bytes, over the {} byte limit; not saved",
                self.scope,
                snapshot.len(),
                self.max_snapshot_bytes
            );
            self.dirty_since = None;
            return SaveResult::TooLarge {
                bytes: snapshot.len(),
                limit: self.max_snapshot_bytes,
            };
        }

        let bytes = snapshot.len();
        let previous = self.last_written.replace(digest(&snapshot));
        let fields = StoreDocument::new()
            .with(FIELD_HQ_NAME, FieldValue::Str(self.scope.hq().unwrap_or_default().to_string()))
            .with(FIELD_TEAM_NAME, FieldValue::Str(self.scope.team().unwrap_or_default().to_string()))
            .with(FIELD_HQ_UPDATE, FieldValue::Bytes(snapshot))
            .with(FIELD_LAST_UPDATED, FieldValue::Str(now_rfc3339()));

        self.dirty_since = None;
        match self.store.set_merge(&self.path, fields).await {
            Ok(()) => {
                self.saves += 1;
                debug!("{}: saved {} bytes to {}", self.scope, bytes, self.path);
                SaveResult::Saved { bytes }
            }
            Err(e) => {
                self.last_written = previous;
                warn!("{}: save failed: {}", self.scope, e);
                SaveResult::Failed(e.to_string())
            }
        }
    }
}

impl std::fmt::Debug for CloudRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudRelay")
            .field("scope", &self.scope)
            .field("path", &self.path)
            .field("loaded", &self.loaded)
            .field("dirty", &self.is_dirty())
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

// ============================================================================
// Fan-out
// ============================================================================

/// Summary of a fan-out load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub merged: usize,
    pub missing: usize,
    pub failed: usize,
}

/// Merge the stored snapshot of every listed HQ of `team_scope` into `doc`.
///
/// Each HQ document is merged on its own; sequences of independent HQ
/// histories union, and re-applying a snapshot already present is a no-op.
pub async fn load_fanout(
    store: &dyn DurableStore,
    layout: &StoreLayout,
    team_scope: &ScopeKey,
    hqs: &[String],
    doc: &mut RecordDocument,
) -> FanoutReport {
    let mut report = FanoutReport::default();
    let Some(team) = team_scope.team() else {
        return report;
    };

    for hq in hqs {
        let scope = ScopeKey::for_hq(team_scope.month().clone(), team, hq.as_str());
        let path = match layout.hq_doc(&scope) {
            Ok(path) => path,
            Err(e) => {
                warn!("{}: {}", scope, e);
                report.failed += 1;
                continue;
            }
        };
        match store.get(&path).await {
            Ok(Some(stored)) => match stored.bytes(FIELD_HQ_UPDATE).filter(|b| !b.is_empty()) {
                Some(bytes) => match doc.import(bytes, Origin::InitialLoad) {
                    Ok(_) => report.merged += 1,
                    Err(e) => {
                        warn!("{}: fan-out decode failed: {}", scope, e);
                        report.failed += 1;
                    }
                },
                None => report.missing += 1,
            },
            Ok(None) => report.missing += 1,
            Err(e) => {
                warn!("{}: fan-out read failed: {}", scope, e);
                report.failed += 1;
            }
        }
    }
    debug!("{}: fan-out {:?}", team_scope, report);
    report
}
