//! Replica session: one live HQ document and its three sync paths.
//!
//! # Lifecycle
//!
//! ```text
//! open:  document → local persistence (restore, ready) → peer room → relay
//! close: peer room → relay listener → persistence handle → document
//! ```
//!
//! Collaborator callbacks never touch the session directly. They push an
//! [`Inbound`] envelope, tagged with this session's epoch, onto the month's
//! channel; the owner routes it back through [`ReplicaSession::handle_inbound`].

use std::sync::Arc;
use std::time::Duration;

use hqsync_crdt::{DEFAULT_SEQUENCE, DocObserver, Origin, RecordDocument};
use hqsync_types::{Record, RoomName, ScopeKey};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::SyncConfig;
use crate::error::Result;
use crate::events::{ConnectionStatus, Inbound, InboundEvent};
use crate::persistence::{LocalPersistence, ReplicaHandle};
use crate::relay::{CloudRelay, InitialLoad, RelayResult, SaveResult};
use crate::store::{DurableStore, StoreChange, StoreLayout};
use crate::transport::{PeerLink, PeerTransport, TransportEvent};

/// Collaborators shared by every session of a client.
#[derive(Clone)]
pub struct SessionDeps {
    pub store: Arc<dyn DurableStore>,
    pub transport: Arc<dyn PeerTransport>,
    pub persistence: Arc<dyn LocalPersistence>,
    pub config: Arc<SyncConfig>,
}

impl SessionDeps {
    pub fn new(
        store: Arc<dyn DurableStore>,
        transport: Arc<dyn PeerTransport>,
        persistence: Arc<dyn LocalPersistence>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            transport,
            persistence,
            config: Arc::new(config),
        }
    }

    pub fn layout(&self) -> StoreLayout {
        StoreLayout::new(self.config.collection_root.clone())
    }
}

/// What an inbound event changed, for the owner to surface.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    pub content_changed: bool,
    pub peers: Option<usize>,
    pub status: Option<ConnectionStatus>,
}

pub struct ReplicaSession {
    scope: ScopeKey,
    room: RoomName,
    epoch: u64,
    doc: RecordDocument,
    observer: DocObserver,
    link: Option<Box<dyn PeerLink>>,
    relay: CloudRelay,
    replica: Option<Box<dyn ReplicaHandle>>,
    status: ConnectionStatus,
    peers: usize,
    ready: bool,
    debounce: Duration,
}

impl ReplicaSession {
    /// Open a session for an HQ scope.
    ///
    /// Only an invalid scope is an error. Collaborator failures leave the
    /// session degraded: no local restore, no peer room (status stays
    /// `Connecting`), or no cloud state until a later save retries the load.
    pub async fn open(
        scope: ScopeKey,
        epoch: u64,
        deps: &SessionDeps,
        inbound: UnboundedSender<Inbound>,
    ) -> Result<Self> {
        let room = scope.room_name();
        let relay = CloudRelay::new(
            scope.clone(),
            &deps.layout(),
            deps.store.clone(),
            deps.config.max_snapshot_bytes,
        )?;
        let mut doc = RecordDocument::new(room.as_str());
        let observer = doc.observe();

        let mut session = Self {
            scope,
            room,
            epoch,
            doc,
            observer,
            link: None,
            relay,
            replica: None,
            status: ConnectionStatus::Connecting,
            peers: 0,
            ready: false,
            debounce: deps.config.save_debounce(),
        };

        session.attach_persistence(deps.persistence.as_ref());
        session.ready = true;
        session.attach_transport(deps.transport.as_ref(), inbound.clone()).await;
        session.attach_relay(inbound).await;
        session.process_doc_events();

        info!(
            "{}: session open (epoch {}, {} records, {})",
            session.scope,
            epoch,
            session.doc.len(DEFAULT_SEQUENCE),
            session.status
        );
        Ok(session)
    }

    fn attach_persistence(&mut self, persistence: &dyn LocalPersistence) {
        let handle = match persistence.attach(&self.room) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("{}: local persistence unavailable: {}", self.scope, e);
                return;
            }
        };
        match handle.load() {
            Ok(Some(bytes)) if !bytes.is_empty() => {
                if let Err(e) = self.doc.import(&bytes, Origin::InitialLoad) {
                    warn!("{}: local snapshot failed to decode: {}", self.scope, e);
                }
            }
            Ok(_) => trace!("{}: no local snapshot", self.scope),
            Err(e) => warn!("{}: local snapshot read failed: {}", self.scope, e),
        }
        self.replica = Some(handle);
    }

    async fn attach_transport(&mut self, transport: &dyn PeerTransport, inbound: UnboundedSender<Inbound>) {
        let scope = self.scope.clone();
        let epoch = self.epoch;
        let sink = Arc::new(move |event: TransportEvent| {
            let _ = inbound.send(Inbound {
                scope: scope.clone(),
                epoch,
                event: InboundEvent::Transport(event),
            });
        });
        match transport.join(&self.room, sink).await {
            Ok(link) => self.link = Some(link),
            Err(e) => warn!("{}: peer transport unavailable: {}", self.scope, e),
        }
    }

    async fn attach_relay(&mut self, inbound: UnboundedSender<Inbound>) {
        let scope = self.scope.clone();
        let epoch = self.epoch;
        self.relay.subscribe(Arc::new(move |change: StoreChange| {
            let _ = inbound.send(Inbound {
                scope: scope.clone(),
                epoch,
                event: InboundEvent::Store(change),
            });
        }));
        if let InitialLoad::Failed(reason) = self.relay.initial_load(&mut self.doc).await {
            debug!("{}: starting without cloud state: {}", self.scope, reason);
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    pub fn room(&self) -> &RoomName {
        &self.room
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Local state restored; records are readable.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    /// Connected clients in this session's room, this one included.
    pub fn peers(&self) -> usize {
        self.peers
    }

    pub fn version(&self) -> u64 {
        self.doc.version()
    }

    pub fn records(&self) -> Vec<Record> {
        self.doc.records(DEFAULT_SEQUENCE)
    }

    pub fn has_pending_save(&self) -> bool {
        self.relay.is_dirty()
    }

    pub fn relay(&self) -> &CloudRelay {
        &self.relay
    }

    pub fn export_snapshot(&self) -> Result<Vec<u8>> {
        Ok(self.doc.export_snapshot()?)
    }

    // =========================================================================
    // Local mutations
    // =========================================================================

    pub fn append(&mut self, record: Record) -> Result<()> {
        self.doc.append(DEFAULT_SEQUENCE, &[record], Origin::Local)?;
        self.process_doc_events();
        Ok(())
    }

    /// Delete the first record with this invoice number.
    pub fn delete_invoice(&mut self, invoice_no: &str) -> Result<Option<Record>> {
        let removed = self.doc.delete_invoice(DEFAULT_SEQUENCE, invoice_no, Origin::Local)?;
        self.process_doc_events();
        Ok(removed)
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    pub fn handle_inbound(&mut self, event: InboundEvent) -> SessionUpdate {
        let mut update = SessionUpdate::default();
        match event {
            InboundEvent::Store(change) => {
                if let RelayResult::Merged { changed } = self.relay.handle_change(&mut self.doc, &change) {
                    update.content_changed = changed;
                }
            }
            InboundEvent::Transport(TransportEvent::Update(bytes)) => match self.doc.import(&bytes, Origin::Peer) {
                Ok(changed) => update.content_changed = changed,
                Err(e) => warn!("{}: peer update failed to decode: {}", self.scope, e),
            },
            InboundEvent::Transport(TransportEvent::Presence(peers)) => {
                if peers > self.peers {
                    // Newcomers get our full state.
                    self.broadcast_state();
                }
                if peers != self.peers {
                    self.peers = peers;
                    update.peers = Some(peers);
                }
            }
            InboundEvent::Transport(TransportEvent::Status(status)) => {
                if status != self.status {
                    debug!("{}: {}", self.scope, status);
                    self.status = status.clone();
                    update.status = Some(status);
                }
            }
        }
        if self.process_doc_events() {
            update.content_changed = true;
        }
        update
    }

    /// Persist, save-schedule and broadcast according to mutation origin.
    /// Returns true if the document changed.
    fn process_doc_events(&mut self) -> bool {
        let events = self.observer.drain();
        if events.is_empty() {
            return false;
        }
        let save = events.iter().any(|e| e.origin.schedules_save());
        let rebroadcast = events.iter().any(|e| e.origin.rebroadcasts());

        let snapshot = match self.doc.export_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("{}: snapshot export failed: {}", self.scope, e);
                return true;
            }
        };

        if let Some(replica) = self.replica.as_mut() {
            if let Err(e) = replica.store(&snapshot) {
                warn!("{}: local persist failed: {}", self.scope, e);
            }
        }

        if save {
            self.relay.mark_dirty(Instant::now());
        }
        if rebroadcast {
            if let Some(link) = &self.link {
                if let Err(e) = link.broadcast(&snapshot) {
                    warn!("{}: peer broadcast failed: {}", self.scope, e);
                }
            }
        }
        true
    }

    fn broadcast_state(&self) {
        let Some(link) = &self.link else { return };
        if self.doc.is_sequence_empty(DEFAULT_SEQUENCE) {
            return;
        }
        match self.doc.export_snapshot() {
            Ok(snapshot) => {
                if let Err(e) = link.broadcast(&snapshot) {
                    warn!("{}: peer broadcast failed: {}", self.scope, e);
                }
            }
            Err(e) => warn!("{}: snapshot export failed: {}", self.scope, e),
        }
    }

    // =========================================================================
    // Saves
    // =========================================================================

    /// When the pending save, if any, becomes due.
    pub fn save_due_at(&self) -> Option<Instant> {
        self.relay.due_at(self.debounce)
    }

    pub async fn flush(&mut self) -> SaveResult {
        let result = self.relay.save(&mut self.doc).await;
        self.process_doc_events();
        result
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Leave the peer room and cancel the store listener. Pending saves can
    /// still be flushed afterwards.
    pub fn detach_listeners(&mut self) {
        if let Some(link) = self.link.take() {
            link.leave();
        }
        self.relay.detach();
        self.status = ConnectionStatus::Connecting;
        self.peers = 0;
    }

    /// Release every collaborator. Safe to call more than once.
    pub fn close(mut self) {
        self.release();
    }

    /// Best-effort pending save, then close.
    pub async fn flush_and_close(mut self) -> SaveResult {
        self.detach_listeners();
        let result = self.flush().await;
        self.release();
        result
    }

    fn release(&mut self) {
        self.detach_listeners();
        if let Some(replica) = self.replica.take() {
            replica.close();
        }
        if self.ready {
            self.ready = false;
            debug!("{}: session closed (epoch {})", self.scope, self.epoch);
        }
    }
}

impl Drop for ReplicaSession {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ReplicaSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaSession")
            .field("scope", &self.scope)
            .field("epoch", &self.epoch)
            .field("ready", &self.ready)
            .field("status", &self.status)
            .field("peers", &self.peers)
            .field("relay", &self.relay)
            .finish()
    }
}
