//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use hqsync_client::{
    DurableStore, FieldValue, LoopbackHub, MemoryPersistence, MemoryStore, SessionDeps, StoreDocument, StoreLayout,
    SyncClient, SyncConfig,
};
use hqsync_crdt::{DEFAULT_SEQUENCE, Origin, RecordDocument};
use hqsync_types::{Month, Record, ScopeKey};
use tracing_subscriber::EnvFilter;

pub const MONTH: &str = "2025-01";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn month() -> Month {
    Month::parse(MONTH).unwrap()
}

pub fn hq_scope(team: &str, hq: &str) -> ScopeKey {
    ScopeKey::for_hq(month(), team, hq)
}

pub fn record(team: &str, hq: &str, invoice: &str) -> Record {
    Record::new()
        .with("invoice_no", invoice)
        .with("sales_team", team)
        .with("hq", hq)
        .with("qty", 5)
}

/// Shared "network": one durable store and one peer hub.
#[derive(Clone, Default)]
pub struct World {
    pub store: MemoryStore,
    pub hub: LoopbackHub,
}

impl World {
    pub fn new() -> Self {
        init_tracing();
        Self::default()
    }

    /// Write an HQ document holding `records` and list its team in the
    /// month document. Returns the snapshot size.
    pub async fn seed_hq(&self, team: &str, hq: &str, records: &[Record]) -> usize {
        let mut doc = RecordDocument::new("seed");
        doc.append(DEFAULT_SEQUENCE, records, Origin::Local).unwrap();
        let snapshot = doc.export_snapshot().unwrap();
        let size = snapshot.len();

        let layout = StoreLayout::new("Primary");
        let path = layout.hq_doc(&hq_scope(team, hq)).unwrap();
        self.store
            .set_merge(
                &path,
                StoreDocument::new()
                    .with("hq", FieldValue::Str(hq.into()))
                    .with("sales_team", FieldValue::Str(team.into()))
                    .with("hqUpdate", FieldValue::Bytes(snapshot)),
            )
            .await
            .unwrap();
        self.store
            .array_union(&layout.month_doc(&month()).unwrap(), "teams", &[team.to_string()])
            .await
            .unwrap();
        size
    }

    /// Stored `hqUpdate` bytes of an HQ.
    pub fn stored_snapshot(&self, team: &str, hq: &str) -> Option<Vec<u8>> {
        let path = StoreLayout::new("Primary").hq_doc(&hq_scope(team, hq)).unwrap();
        self.store
            .peek(&path)
            .and_then(|doc| doc.bytes("hqUpdate").map(<[u8]>::to_vec))
    }

    /// A device: its own local persistence, sharing store and hub.
    pub fn device(&self, config: SyncConfig) -> Device {
        let persistence = MemoryPersistence::new();
        let deps = SessionDeps::new(
            Arc::new(self.store.clone()),
            Arc::new(self.hub.clone()),
            Arc::new(persistence.clone()),
            config,
        );
        Device { deps, persistence }
    }

    pub async fn client(&self) -> SyncClient {
        self.device(SyncConfig::default()).start().await
    }
}

pub struct Device {
    pub deps: SessionDeps,
    pub persistence: MemoryPersistence,
}

impl Device {
    pub async fn start(&self) -> SyncClient {
        SyncClient::start(self.deps.clone(), month()).await
    }
}

pub fn invoices(records: &[Record]) -> Vec<String> {
    let mut out: Vec<String> = records.iter().filter_map(|r| r.invoice_no()).map(str::to_string).collect();
    out.sort();
    out
}

/// Pump every client until no one has anything left to handle.
pub async fn settle(clients: &mut [&mut SyncClient]) {
    for _ in 0..16 {
        let mut handled = 0;
        for client in clients.iter_mut() {
            handled += client.pump().await;
        }
        if handled == 0 {
            return;
        }
    }
}
