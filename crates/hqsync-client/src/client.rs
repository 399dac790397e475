//! Sync client: the host-facing API.
//!
//! Wraps the selection state machine and the current month's
//! [`MonthSession`]. Every selection action that changes something is
//! followed by a reconcile, so the resident set always tracks the
//! selection.
//!
//! # Example
//!
//! ```ignore
//! let mut client = SyncClient::start(deps, Month::parse("2025-01")?).await;
//! client.toggle_team("North").await;
//! client.toggle_hq(&HqRef::new("North", "Delhi")).await;
//! client.add_record(RecordDraft::new("Acme", "Widget", 3, 120.0))?;
//! client.flush().await;
//! for record in client.data() { /* ... */ }
//! ```

use hqsync_crdt::{DEFAULT_SEQUENCE, Origin, RecordDocument};
use hqsync_types::{
    FIELD_CUSTOMER, FIELD_HQ, FIELD_INVOICE_NO, FIELD_ITEM_NAME, FIELD_POSTING_DATE, FIELD_QTY,
    FIELD_SALES_TEAM, FIELD_VALUE, HqRef, Month, Record, RecordDraft, ScopeKey, now_millis, now_rfc3339,
    today, validate_segment,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregate::{DataAggregator, QualityReport};
use crate::catalog::Catalog;
use crate::constants::{
    EVENT_CHANNEL_CAPACITY, FIELD_HQ_NAME, FIELD_HQ_UPDATE, FIELD_LAST_UPDATED, FIELD_MONTH, FIELD_TEAMS,
    FIELD_TEAM_NAME,
};
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, ConnectionStatus};
use crate::month::{MonthSession, ReconcileReport, SummaryOutcome};
use crate::resolver::resolve;
use crate::selection::SelectionState;
use crate::session::SessionDeps;
use crate::store::{FieldValue, StoreDocument};

pub struct SyncClient {
    deps: SessionDeps,
    selection: SelectionState,
    month: MonthSession,
    aggregator: DataAggregator,
    events: broadcast::Sender<ClientEvent>,
}

impl SyncClient {
    /// Start on `month` with nothing selected. A failed team-list read is
    /// logged; the catalog starts empty.
    pub async fn start(deps: SessionDeps, month: Month) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let mut session = MonthSession::new(month.clone(), deps.clone(), events.clone());
        if let Err(e) = session.refresh_teams().await {
            warn!("{}: team list unavailable: {}", month, e);
        }
        info!("client started on {}", month);
        Self {
            deps,
            selection: SelectionState::new(month),
            month: session,
            aggregator: DataAggregator::new(),
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn catalog(&self) -> &Catalog {
        self.month.catalog()
    }

    pub fn month_session(&self) -> &MonthSession {
        &self.month
    }

    pub fn available_teams(&self) -> &[String] {
        self.month.catalog().teams()
    }

    /// HQs of the selected teams.
    pub fn available_hqs(&self) -> Vec<HqRef> {
        self.month.catalog().available_hqs(self.selection.teams())
    }

    /// Connected clients in the busiest live room, this one included.
    pub fn peers(&self) -> usize {
        self.month
            .sessions()
            .map(|session| session.peers())
            .max()
            .unwrap_or(0)
    }

    pub fn status(&self, scope: &ScopeKey) -> Option<ConnectionStatus> {
        self.month.session(scope).map(|session| session.status().clone())
    }

    /// `Online` if any live session is online (first one's label).
    pub fn overall_status(&self) -> ConnectionStatus {
        self.month
            .sessions()
            .map(|session| session.status())
            .find(|status| status.is_online())
            .cloned()
            .unwrap_or_default()
    }

    // =========================================================================
    // View
    // =========================================================================

    /// Flat records for the current selection.
    pub fn data(&mut self) -> &[Record] {
        self.aggregator.view(&self.selection, self.month.catalog(), &self.month)
    }

    /// Data-quality findings of the last `data()` computation.
    pub fn quality(&self) -> &QualityReport {
        self.aggregator.report()
    }

    // =========================================================================
    // Selection actions
    // =========================================================================

    /// Switch months: tear down every session of the old month and start a
    /// fresh one with nothing selected and an empty LoadedSet.
    ///
    /// Re-selecting the current month does the same. Returns whether the
    /// selection changed.
    pub async fn set_month(&mut self, month: Month) -> bool {
        let next = MonthSession::new(month.clone(), self.deps.clone(), self.events.clone());
        let previous = std::mem::replace(&mut self.month, next);
        previous.shutdown().await;

        if let Err(e) = self.month.refresh_teams().await {
            warn!("{}: team list unavailable: {}", month, e);
        }
        let changed = self.selection.set_month(month);
        self.aggregator.reset();
        changed
    }

    pub async fn toggle_team(&mut self, team: &str) -> bool {
        let changed = self.selection.toggle_team(team);
        if changed {
            self.reconcile().await;
        }
        changed
    }

    pub async fn toggle_hq(&mut self, hq: &HqRef) -> bool {
        let changed = self.selection.toggle_hq(hq);
        if changed {
            self.reconcile().await;
        }
        changed
    }

    pub async fn select_all_hqs(&mut self) -> bool {
        let available = self.available_hqs();
        let changed = self.selection.select_all_hqs(&available);
        if changed {
            self.reconcile().await;
        }
        changed
    }

    pub async fn deselect_all_hqs(&mut self) -> bool {
        let changed = self.selection.deselect_all_hqs();
        if changed {
            self.reconcile().await;
        }
        changed
    }

    /// Refresh the selected teams' HQ lists and align the resident set.
    pub async fn reconcile(&mut self) -> ReconcileReport {
        let teams = self.selection.teams().to_vec();
        self.month.refresh_hqs(&teams).await;
        let resident = resolve(&self.selection, self.month.catalog());
        self.month.reconcile(resident).await
    }

    // =========================================================================
    // Record actions
    // =========================================================================

    /// Stamp a draft for the single selected HQ and append it.
    ///
    /// The save to the durable store is debounced; it goes out on a later
    /// [`pump`](Self::pump), [`run`](Self::run) or [`flush`](Self::flush).
    pub fn add_record(&mut self, draft: RecordDraft) -> Result<Record> {
        let Some(hq) = self.selection.single_hq().cloned() else {
            return Err(ClientError::AmbiguousTarget {
                teams: self.selection.teams().len(),
                hqs: self.selection.hqs().len(),
            });
        };
        let record = draft.stamp(&hq, &today());
        let scope = ScopeKey::from_hq_ref(self.selection.month().clone(), &hq);
        self.month.append(&scope, record.clone())?;
        info!("{}: added {}", scope, record.invoice_no().unwrap_or_default());
        Ok(record)
    }

    /// Delete a record from the HQ its tags name.
    pub fn delete_record(&mut self, record: &Record) -> Result<Record> {
        let hq = record.hq_ref().ok_or(ClientError::MissingField("sales_team/hq"))?;
        let invoice = record.invoice_no().ok_or(ClientError::MissingField(FIELD_INVOICE_NO))?;
        self.delete_invoice(&hq, invoice)
    }

    pub fn delete_invoice(&mut self, hq: &HqRef, invoice_no: &str) -> Result<Record> {
        let scope = ScopeKey::from_hq_ref(self.selection.month().clone(), hq);
        let removed = self
            .month
            .delete_invoice(&scope, invoice_no)?
            .ok_or_else(|| ClientError::RecordNotFound(invoice_no.to_string()))?;
        info!("{}: deleted {}", scope, invoice_no);
        Ok(removed)
    }

    // =========================================================================
    // Catalog actions
    // =========================================================================

    /// Add a team to the month's team list.
    pub async fn create_team(&mut self, name: &str) -> Result<()> {
        validate_segment(name)?;
        if self.month.catalog().has_team(name) {
            return Err(ClientError::AlreadyExists(format!("team {name}")));
        }
        let month = self.selection.month().clone();
        let path = self.deps.layout().month_doc(&month)?;
        self.deps
            .store
            .array_union(&path, FIELD_TEAMS, &[name.to_string()])
            .await?;
        self.deps
            .store
            .set_merge(&path, StoreDocument::new().with(FIELD_MONTH, FieldValue::Str(month.to_string())))
            .await?;
        self.month.note_team(name);
        info!("{}: created team {}", month, name);
        Ok(())
    }

    /// Create an HQ document seeded with a placeholder record.
    pub async fn create_hq(&mut self, team: &str, name: &str) -> Result<Record> {
        validate_segment(team)?;
        validate_segment(name)?;
        let month = self.selection.month().clone();
        let hq = HqRef::new(team, name);
        let scope = ScopeKey::from_hq_ref(month.clone(), &hq);
        let layout = self.deps.layout();
        let path = layout.hq_doc(&scope)?;

        if self.deps.store.get(&path).await?.is_some() {
            return Err(ClientError::AlreadyExists(format!("HQ {hq}")));
        }

        let record = Record::new()
            .with(FIELD_CUSTOMER, "System")
            .with(FIELD_ITEM_NAME, format!("HQ {name} created"))
            .with(FIELD_QTY, 0)
            .with(FIELD_VALUE, 0)
            .with(FIELD_INVOICE_NO, format!("INIT-HQ-{}", now_millis()))
            .with(FIELD_POSTING_DATE, today())
            .with(FIELD_SALES_TEAM, team)
            .with(FIELD_HQ, name);

        let mut doc = RecordDocument::new(scope.room_name().as_str());
        doc.append(DEFAULT_SEQUENCE, &[record.clone()], Origin::Local)?;
        let snapshot = doc.export_snapshot()?;
        let limit = self.deps.config.max_snapshot_bytes;
        if snapshot.len() > limit {
            return Err(ClientError::SnapshotTooLarge {
                bytes: snapshot.len(),
                limit,
            });
        }

        let fields = StoreDocument::new()
            .with(FIELD_HQ_NAME, FieldValue::Str(name.to_string()))
            .with(FIELD_TEAM_NAME, FieldValue::Str(team.to_string()))
            .with(FIELD_HQ_UPDATE, FieldValue::Bytes(snapshot))
            .with(FIELD_LAST_UPDATED, FieldValue::Str(now_rfc3339()));
        self.deps.store.set_merge(&path, fields).await?;
        self.deps
            .store
            .array_union(&layout.month_doc(&month)?, FIELD_TEAMS, &[team.to_string()])
            .await?;

        self.month.note_hq(&hq);
        info!("{}: created HQ {}", month, hq);
        if self.selection.is_team_selected(team) {
            self.reconcile().await;
        }
        Ok(record)
    }

    /// Publish the best-effort month summary.
    pub async fn publish_month_summary(&mut self) -> Result<SummaryOutcome> {
        self.month.publish_summary().await
    }

    // =========================================================================
    // Event loop
    // =========================================================================

    /// Handle queued collaborator events and due saves without waiting.
    pub async fn pump(&mut self) -> usize {
        self.month.pump().await
    }

    /// Flush every pending save now.
    pub async fn flush(&mut self) {
        self.month.flush_all().await;
    }

    /// Drive the current month until cancelled.
    pub async fn run(&mut self, cancel: CancellationToken) {
        self.month.run(cancel).await;
    }

    /// Flush and release every session.
    pub async fn shutdown(self) {
        let month = self.selection.month().clone();
        self.month.shutdown().await;
        info!("client on {} shut down", month);
    }
}
