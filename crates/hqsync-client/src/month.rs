//! Month orchestrator.
//!
//! Owns everything scoped to one month: the catalog, the live HQ sessions,
//! the month cache for resident scopes beyond the live-session limit, the
//! LoadedSet guarding that cache, and the inbound channel every collaborator
//! callback of every session feeds. Dropping a `MonthSession` drops all of
//! it, which is how a month change starts from a clean slate.
//!
//! # Inbound routing
//!
//! ```text
//! store / transport callback
//!         │  Inbound { scope, epoch, event }
//!         ▼
//!   unbounded mpsc ──► route() ──► sessions[scope] (epoch must match)
//!                                  otherwise dropped
//! ```

use std::collections::BTreeMap;

use hqsync_crdt::{DEFAULT_SEQUENCE, Origin, RecordDocument};
use hqsync_types::{HqRef, Month, Record, ScopeKey, now_rfc3339};
use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::aggregate::RecordSource;
use crate::catalog::Catalog;
use crate::constants::{FIELD_LAST_UPDATED, FIELD_MONTH, FIELD_MONTH_STATE, FIELD_TEAMS};
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, Inbound};
use crate::loader::{HierarchicalLoader, LoadOutcome, LoadedSet};
use crate::relay::{SaveResult, load_fanout};
use crate::session::{ReplicaSession, SessionDeps};
use crate::store::{FieldValue, StoreDocument, StoreLayout};

/// What a reconcile pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub opened: Vec<ScopeKey>,
    pub closed: Vec<ScopeKey>,
    pub backfilled: Vec<ScopeKey>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.opened.is_empty() && self.closed.is_empty() && self.backfilled.is_empty()
    }
}

/// Result of publishing the month summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryOutcome {
    pub records: usize,
    pub bytes: usize,
    /// False when the snapshot was over the limit and only metadata was written.
    pub included: bool,
}

pub struct MonthSession {
    month: Month,
    deps: SessionDeps,
    layout: StoreLayout,
    loader: HierarchicalLoader,
    catalog: Catalog,
    sessions: BTreeMap<ScopeKey, ReplicaSession>,
    resident: Vec<ScopeKey>,
    loaded: LoadedSet,
    cache: RecordDocument,
    inbound_tx: UnboundedSender<Inbound>,
    inbound_rx: UnboundedReceiver<Inbound>,
    next_epoch: u64,
    content_version: u64,
    events: broadcast::Sender<ClientEvent>,
}

impl MonthSession {
    pub fn new(month: Month, deps: SessionDeps, events: broadcast::Sender<ClientEvent>) -> Self {
        let layout = deps.layout();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            loader: HierarchicalLoader::new(deps.store.clone(), layout.clone()),
            cache: RecordDocument::new(format!("{month}-cache")),
            month,
            deps,
            layout,
            catalog: Catalog::new(),
            sessions: BTreeMap::new(),
            resident: Vec::new(),
            loaded: LoadedSet::new(),
            inbound_tx,
            inbound_rx,
            next_epoch: 0,
            content_version: 0,
            events,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn month(&self) -> &Month {
        &self.month
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn resident(&self) -> &[ScopeKey] {
        &self.resident
    }

    pub fn live_scopes(&self) -> impl Iterator<Item = &ScopeKey> {
        self.sessions.keys()
    }

    pub fn sessions(&self) -> impl Iterator<Item = &ReplicaSession> {
        self.sessions.values()
    }

    pub fn session(&self, scope: &ScopeKey) -> Option<&ReplicaSession> {
        self.sessions.get(scope)
    }

    pub fn loaded(&self) -> &LoadedSet {
        &self.loaded
    }

    /// Records held in the month cache for a scope.
    pub fn cached_records(&self, scope: &ScopeKey) -> Vec<Record> {
        self.cache.records(&scope.namespace())
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn bump_content(&mut self) {
        self.content_version += 1;
        self.emit(ClientEvent::ContentChanged {
            version: self.content_version,
        });
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    /// Re-read the month document's team list.
    pub async fn refresh_teams(&mut self) -> Result<bool> {
        let path = self.layout.month_doc(&self.month)?;
        let teams = self
            .deps
            .store
            .get(&path)
            .await?
            .and_then(|doc| doc.str_list(FIELD_TEAMS).map(<[String]>::to_vec))
            .unwrap_or_default();
        let changed = self.catalog.set_teams(teams);
        if changed {
            self.emit(ClientEvent::CatalogChanged);
        }
        Ok(changed)
    }

    /// Re-list the HQ collections of the given teams. Failures are logged
    /// and leave that team's list as it was.
    pub async fn refresh_hqs(&mut self, teams: &[String]) -> bool {
        let mut changed = false;
        for team in teams {
            let listing = match self.layout.team_collection(&self.month, team) {
                Ok(path) => self.deps.store.list_collection(&path).await,
                Err(e) => Err(e),
            };
            match listing {
                Ok(hqs) => changed |= self.catalog.set_hqs(team, hqs),
                Err(e) => warn!("{}/{}: HQ listing failed: {}", self.month, team, e),
            }
        }
        if changed {
            self.emit(ClientEvent::CatalogChanged);
        }
        changed
    }

    pub fn note_team(&mut self, team: &str) {
        if self.catalog.add_team(team) {
            self.emit(ClientEvent::CatalogChanged);
        }
    }

    pub fn note_hq(&mut self, hq: &HqRef) {
        let team_added = self.catalog.add_team(&hq.team);
        if self.catalog.add_hq(hq) || team_added {
            self.emit(ClientEvent::CatalogChanged);
        }
    }

    // =========================================================================
    // Reconcile
    // =========================================================================

    /// Make `resident` the set of scopes held in memory.
    ///
    /// The first `max_live_sessions` scopes get live sessions; the rest are
    /// backfilled once into the month cache. Listeners of every closing
    /// session are cancelled before anything is flushed or opened.
    pub async fn reconcile(&mut self, resident: Vec<ScopeKey>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let cap = self.deps.config.max_live_sessions;
        let live_target: Vec<ScopeKey> = resident.iter().take(cap).cloned().collect();
        let backfill: Vec<ScopeKey> = resident.iter().skip(cap).cloned().collect();
        self.resident = resident;

        let closing: Vec<ScopeKey> = self
            .sessions
            .keys()
            .filter(|scope| !live_target.contains(scope))
            .cloned()
            .collect();
        let mut detached = Vec::with_capacity(closing.len());
        for scope in &closing {
            if let Some(mut session) = self.sessions.remove(scope) {
                session.detach_listeners();
                detached.push(session);
            }
        }

        for session in detached {
            let scope = session.scope().clone();
            let records = session.records();
            let result = session.flush_and_close().await;
            self.report_save(&scope, result);
            if let Err(e) = self.cache.replace_sequence(&scope.namespace(), &records, Origin::InitialLoad) {
                warn!("{}: cache write-back failed: {}", scope, e);
            } else {
                self.loaded.mark(scope.clone());
            }
            self.emit(ClientEvent::SessionClosed { scope: scope.clone() });
            report.closed.push(scope);
        }

        for scope in live_target {
            if self.sessions.contains_key(&scope) {
                continue;
            }
            self.next_epoch += 1;
            match ReplicaSession::open(scope.clone(), self.next_epoch, &self.deps, self.inbound_tx.clone()).await {
                Ok(session) => {
                    self.sessions.insert(scope.clone(), session);
                    self.emit(ClientEvent::SessionReady { scope: scope.clone() });
                    report.opened.push(scope);
                }
                Err(e) => warn!("{}: session open failed: {}", scope, e),
            }
        }

        let outcomes = self.loader.load_missing(&backfill, &mut self.loaded, &mut self.cache).await;
        for (scope, outcome) in outcomes {
            if let LoadOutcome::Appended { .. } = outcome {
                report.backfilled.push(scope);
            }
        }

        if !report.is_empty() {
            info!(
                "{}: reconciled (opened {}, closed {}, backfilled {}, live {})",
                self.month,
                report.opened.len(),
                report.closed.len(),
                report.backfilled.len(),
                self.sessions.len()
            );
            self.bump_content();
        }
        report
    }

    // =========================================================================
    // Local mutations
    // =========================================================================

    pub fn append(&mut self, scope: &ScopeKey, record: Record) -> Result<()> {
        let session = self
            .sessions
            .get_mut(scope)
            .ok_or_else(|| ClientError::NotLive(scope.clone()))?;
        session.append(record)?;
        self.bump_content();
        Ok(())
    }

    pub fn delete_invoice(&mut self, scope: &ScopeKey, invoice_no: &str) -> Result<Option<Record>> {
        let session = self
            .sessions
            .get_mut(scope)
            .ok_or_else(|| ClientError::NotLive(scope.clone()))?;
        let removed = session.delete_invoice(invoice_no)?;
        if removed.is_some() {
            self.bump_content();
        }
        Ok(removed)
    }

    // =========================================================================
    // Event loop
    // =========================================================================

    /// Handle every queued inbound message and flush saves that are due.
    /// Never waits for new messages.
    pub async fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(msg) = self.inbound_rx.try_recv() {
            self.route(msg);
            handled += 1;
        }
        self.flush_due(Instant::now()).await;
        handled
    }

    /// Process inbound messages and debounced saves until cancelled.
    pub async fn run(&mut self, cancel: CancellationToken) {
        debug!("{}: event loop started", self.month);
        loop {
            let next_due = self.next_save_due();
            let save_timer = async move {
                match next_due {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                msg = self.inbound_rx.recv() => match msg {
                    Some(msg) => self.route(msg),
                    None => break,
                },
                _ = save_timer => self.flush_due(Instant::now()).await,
            }
        }
        debug!("{}: event loop stopped", self.month);
    }

    fn route(&mut self, msg: Inbound) {
        let update = match self.sessions.get_mut(&msg.scope) {
            Some(session) if session.epoch() == msg.epoch => session.handle_inbound(msg.event),
            Some(session) => {
                trace!("{}: dropping message for epoch {} (live {})", msg.scope, msg.epoch, session.epoch());
                return;
            }
            None => {
                trace!("{}: dropping message for closed session", msg.scope);
                return;
            }
        };

        if let Some(peers) = update.peers {
            self.emit(ClientEvent::PresenceChanged {
                scope: msg.scope.clone(),
                peers,
            });
        }
        if let Some(status) = update.status {
            self.emit(ClientEvent::StatusChanged {
                scope: msg.scope.clone(),
                status,
            });
        }
        if update.content_changed {
            self.bump_content();
        }
    }

    fn next_save_due(&self) -> Option<Instant> {
        self.sessions.values().filter_map(ReplicaSession::save_due_at).min()
    }

    pub async fn flush_due(&mut self, now: Instant) {
        let due: Vec<ScopeKey> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.save_due_at().is_some_and(|at| at <= now))
            .map(|(scope, _)| scope.clone())
            .collect();
        for scope in due {
            self.flush_scope(&scope).await;
        }
    }

    /// Flush every pending save now, ignoring the debounce.
    pub async fn flush_all(&mut self) {
        let pending: Vec<ScopeKey> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.has_pending_save())
            .map(|(scope, _)| scope.clone())
            .collect();
        for scope in pending {
            self.flush_scope(&scope).await;
        }
    }

    async fn flush_scope(&mut self, scope: &ScopeKey) {
        let Some(session) = self.sessions.get_mut(scope) else {
            return;
        };
        let result = session.flush().await;
        self.report_save(scope, result);
    }

    fn report_save(&self, scope: &ScopeKey, result: SaveResult) {
        match result {
            SaveResult::TooLarge { bytes, limit } => self.emit(ClientEvent::SaveSkipped {
                scope: scope.clone(),
                bytes,
                limit,
            }),
            SaveResult::Failed(error) => self.emit(ClientEvent::SaveFailed {
                scope: scope.clone(),
                error,
            }),
            SaveResult::Saved { .. } | SaveResult::Clean | SaveResult::Deferred => {}
        }
    }

    // =========================================================================
    // Month summary
    // =========================================================================

    /// Write the best-effort month summary to the month document.
    ///
    /// Combines every HQ snapshot in the store with the live sessions'
    /// state. Over the size limit only `month` and `last_updated` are
    /// written.
    pub async fn publish_summary(&mut self) -> Result<SummaryOutcome> {
        let teams = self.catalog.teams().to_vec();
        self.refresh_hqs(&teams).await;

        let mut summary = RecordDocument::new(format!("{}-summary", self.month));
        for team in &teams {
            let scope = ScopeKey::for_team(self.month.clone(), team.as_str());
            load_fanout(
                self.deps.store.as_ref(),
                &self.layout,
                &scope,
                self.catalog.hqs_of(team),
                &mut summary,
            )
            .await;
        }
        for session in self.sessions.values() {
            let snapshot = session.export_snapshot()?;
            summary.import(&snapshot, Origin::InitialLoad)?;
        }

        let snapshot = summary.export_snapshot()?;
        let bytes = snapshot.len();
        let limit = self.deps.config.max_month_snapshot_bytes;
        let included = bytes <= limit;

        let mut fields = StoreDocument::new()
            .with(FIELD_MONTH, FieldValue::Str(self.month.to_string()))
            .with(FIELD_LAST_UPDATED, FieldValue::Str(now_rfc3339()));
        if included {
            fields.set(FIELD_MONTH_STATE, FieldValue::Bytes(snapshot));
        } else {
            warn!(
                "{}: month summary is {} bytes, over the {} byte limit; writing metadata only",
                self.month, bytes, limit
            );
        }
        self.deps.store.set_merge(&self.layout.month_doc(&self.month)?, fields).await?;

        let outcome = SummaryOutcome {
            records: summary.len(DEFAULT_SEQUENCE),
            bytes,
            included,
        };
        info!("{}: month summary published {:?}", self.month, outcome);
        Ok(outcome)
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Detach every session, flush pending saves and release everything.
    pub async fn shutdown(mut self) {
        for session in self.sessions.values_mut() {
            session.detach_listeners();
        }
        let sessions = std::mem::take(&mut self.sessions);
        for (scope, session) in sessions {
            let result = session.flush_and_close().await;
            self.report_save(&scope, result);
        }
        debug!("{}: month closed", self.month);
    }
}

impl RecordSource for MonthSession {
    fn records_for(&self, scope: &ScopeKey) -> Vec<Record> {
        match self.sessions.get(scope) {
            Some(session) => session.records(),
            None => self.cache.records(&scope.namespace()),
        }
    }

    fn content_version(&self) -> u64 {
        self.content_version
    }
}
