//! End-to-end scenarios for a single client.
//!
//! Each test wires a [`SyncClient`] to an in-memory store, a loopback peer
//! hub and in-memory device storage, then drives it through the public API.

mod common;

use std::time::Duration;

use common::{World, hq_scope, invoices, record, settle};
use hqsync_client::{ClientError, ClientEvent, StoreLayout, SyncConfig};
use hqsync_crdt::{DEFAULT_SEQUENCE, RecordDocument};
use hqsync_types::{HqRef, Month, RecordDraft};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_team_selection_shows_hq_records() {
    let world = World::new();
    world
        .seed_hq("North", "Delhi", &[record("North", "Delhi", "INV-1")])
        .await;

    let mut client = world.client().await;
    assert_eq!(client.available_teams(), ["North"]);

    assert!(client.toggle_team("North").await);
    assert_eq!(invoices(client.data()), ["INV-1"]);
    assert_eq!(client.data()[0].get("qty"), Some(&serde_json::json!(5)));
}

#[tokio::test]
async fn test_added_record_is_stamped_and_not_duplicated_on_reload() {
    let world = World::new();
    world.seed_hq("North", "Delhi", &[]).await;
    let mut client = world.client().await;
    client.toggle_team("North").await;
    client.toggle_hq(&HqRef::new("North", "Delhi")).await;

    let added = client.add_record(RecordDraft::new("X", "Y", 2, 100.0)).unwrap();
    assert_eq!(added.sales_team(), Some("North"));
    assert_eq!(added.hq(), Some("Delhi"));
    assert!(added.invoice_no().unwrap().starts_with("INV-"));
    assert_eq!(added.get("customer"), Some(&serde_json::json!("X")));

    client.flush().await;
    settle(&mut [&mut client]).await;

    // Close and reopen the session: local state and the stored snapshot are
    // both re-applied.
    client.toggle_team("North").await;
    assert!(client.month_session().live_scopes().next().is_none());
    client.toggle_team("North").await;
    client.toggle_hq(&HqRef::new("North", "Delhi")).await;
    settle(&mut [&mut client]).await;

    let view = client.data().to_vec();
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].invoice_no(), added.invoice_no());
}

#[tokio::test]
async fn test_two_teams_span_all_hqs_and_ignore_hq_toggles() {
    let world = World::new();
    world.seed_hq("North", "Delhi", &[record("North", "Delhi", "D1")]).await;
    world.seed_hq("North", "Agra", &[record("North", "Agra", "A1")]).await;
    world
        .seed_hq("South", "Chennai", &[record("South", "Chennai", "C1")])
        .await;

    let mut client = world.client().await;
    client.toggle_team("North").await;
    client.toggle_team("South").await;

    assert_eq!(invoices(client.data()), ["A1", "C1", "D1"]);
    assert!(!client.toggle_hq(&HqRef::new("North", "Delhi")).await);
    assert!(client.selection().hqs().is_empty());
    assert_eq!(invoices(client.data()), ["A1", "C1", "D1"]);
}

#[tokio::test]
async fn test_delete_by_invoice_removes_exactly_one() {
    let world = World::new();
    world.seed_hq("North", "Delhi", &[]).await;
    let mut client = world.client().await;
    client.toggle_team("North").await;
    client.toggle_hq(&HqRef::new("North", "Delhi")).await;

    let first = client.add_record(RecordDraft::new("X", "Y", 2, 100.0)).unwrap();
    let second = client.add_record(RecordDraft::new("X", "Y", 2, 100.0)).unwrap();
    assert_ne!(first.invoice_no(), second.invoice_no());

    let removed = client.delete_record(&first).unwrap();
    assert_eq!(removed.invoice_no(), first.invoice_no());

    let view = client.data().to_vec();
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].invoice_no(), second.invoice_no());

    let again = client.delete_record(&first).unwrap_err();
    assert!(matches!(again, ClientError::RecordNotFound(_)));
}

#[tokio::test]
async fn test_oversized_snapshot_leaves_stored_state_untouched() {
    let world = World::new();
    let seeded = world
        .seed_hq("North", "Delhi", &[record("North", "Delhi", "INV-1")])
        .await;
    let before = world.stored_snapshot("North", "Delhi").unwrap();

    let config = SyncConfig {
        max_snapshot_bytes: seeded + 256,
        ..SyncConfig::default()
    };
    let mut client = world.device(config).start().await;
    let mut events = client.subscribe_events();
    client.toggle_team("North").await;
    client.toggle_hq(&HqRef::new("North", "Delhi")).await;

    // Hex noise so the snapshot cannot compress under the ceiling.
    let mut x: u64 = 0x9e37_79b9_7f4a_7c15;
    let noise: String = (0..4096)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            format!("{:x}", x & 0xf)
        })
        .collect();
    client
        .add_record(RecordDraft::new(noise, "Y", 1, 1.0))
        .unwrap();

    client.flush().await;

    assert_eq!(world.stored_snapshot("North", "Delhi").unwrap(), before);
    let mut skipped = None;
    while let Ok(event) = events.try_recv() {
        if let ClientEvent::SaveSkipped { scope, bytes, limit } = event {
            skipped = Some((scope, bytes, limit));
        }
    }
    let (scope, bytes, limit) = skipped.expect("SaveSkipped event");
    assert_eq!(scope, hq_scope("North", "Delhi"));
    assert!(bytes > limit);

    // Still visible locally.
    assert_eq!(client.data().len(), 2);
}

// ============================================================================
// Selection and actions
// ============================================================================

#[tokio::test]
async fn test_add_record_needs_single_team_and_hq() {
    let world = World::new();
    world.seed_hq("North", "Delhi", &[]).await;
    world.seed_hq("North", "Agra", &[]).await;
    let mut client = world.client().await;

    let err = client.add_record(RecordDraft::new("X", "Y", 1, 1.0)).unwrap_err();
    assert!(matches!(err, ClientError::AmbiguousTarget { teams: 0, hqs: 0 }));

    client.toggle_team("North").await;
    client.select_all_hqs().await;
    let err = client.add_record(RecordDraft::new("X", "Y", 1, 1.0)).unwrap_err();
    assert!(matches!(err, ClientError::AmbiguousTarget { teams: 1, hqs: 2 }));
}

#[tokio::test]
async fn test_local_saves_do_not_feed_back() {
    let world = World::new();
    world.seed_hq("North", "Delhi", &[]).await;
    let mut client = world.client().await;
    client.toggle_team("North").await;
    client.toggle_hq(&HqRef::new("North", "Delhi")).await;
    settle(&mut [&mut client]).await;

    client.add_record(RecordDraft::new("X", "Y", 1, 1.0)).unwrap();
    let writes_before = world.store.writes();
    client.flush().await;
    assert_eq!(world.store.writes(), writes_before + 1);

    for _ in 0..5 {
        client.pump().await;
        client.flush().await;
    }
    assert_eq!(world.store.writes(), writes_before + 1);
}

#[tokio::test]
async fn test_backfilled_scope_is_read_once_per_month() {
    let world = World::new();
    world.seed_hq("North", "Delhi", &[record("North", "Delhi", "D1")]).await;
    let config = SyncConfig {
        max_live_sessions: 0,
        ..SyncConfig::default()
    };
    let mut client = world.device(config).start().await;
    let reads_before = world.store.reads();

    client.toggle_team("North").await;
    assert_eq!(invoices(client.data()), ["D1"]);
    assert_eq!(world.store.reads(), reads_before + 1);

    client.toggle_hq(&HqRef::new("North", "Delhi")).await;
    client.toggle_hq(&HqRef::new("North", "Delhi")).await;
    client.toggle_team("North").await;
    client.toggle_team("North").await;
    assert_eq!(invoices(client.data()), ["D1"]);
    assert_eq!(world.store.reads(), reads_before + 1);

    // A new month starts with an empty LoadedSet.
    client.set_month(Month::parse("2025-02").unwrap()).await;
    client.set_month(common::month()).await;
    let reads_after_switch = world.store.reads();
    client.toggle_team("North").await;
    assert_eq!(world.store.reads(), reads_after_switch + 1);
}

#[tokio::test]
async fn test_sessions_beyond_cap_are_backfilled() {
    let world = World::new();
    world.seed_hq("North", "Delhi", &[record("North", "Delhi", "D1")]).await;
    world.seed_hq("North", "Agra", &[record("North", "Agra", "A1")]).await;
    let config = SyncConfig {
        max_live_sessions: 1,
        ..SyncConfig::default()
    };
    let mut client = world.device(config).start().await;
    client.toggle_team("North").await;

    let month = client.month_session();
    let live: Vec<_> = month.live_scopes().cloned().collect();
    assert_eq!(live, [hq_scope("North", "Agra")]);
    assert_eq!(month.cached_records(&hq_scope("North", "Delhi")).len(), 1);
    assert_eq!(invoices(client.data()), ["A1", "D1"]);

    // Narrowing to Delhi makes it live; Agra's records move to the cache.
    client.toggle_hq(&HqRef::new("North", "Delhi")).await;
    let month = client.month_session();
    let live: Vec<_> = month.live_scopes().cloned().collect();
    assert_eq!(live, [hq_scope("North", "Delhi")]);
    assert_eq!(month.cached_records(&hq_scope("North", "Agra")).len(), 1);
    assert_eq!(invoices(client.data()), ["D1"]);
}

#[tokio::test]
async fn test_month_change_tears_down_sessions() {
    let world = World::new();
    world.seed_hq("North", "Delhi", &[record("North", "Delhi", "D1")]).await;
    let mut client = world.client().await;
    client.toggle_team("North").await;
    assert_eq!(world.hub.members(&hq_scope("North", "Delhi").room_name()), 1);
    assert_eq!(world.store.watcher_count(), 1);

    assert!(client.set_month(Month::parse("2025-02").unwrap()).await);
    assert_eq!(world.hub.members(&hq_scope("North", "Delhi").room_name()), 0);
    assert_eq!(world.store.watcher_count(), 0);
    assert!(client.selection().teams().is_empty());
    assert!(client.data().is_empty());
    assert!(client.available_teams().is_empty());
}

#[tokio::test]
async fn test_reselecting_current_month_resets_it() {
    let world = World::new();
    world.seed_hq("North", "Delhi", &[record("North", "Delhi", "D1")]).await;
    let config = SyncConfig {
        max_live_sessions: 0,
        ..SyncConfig::default()
    };
    let mut client = world.device(config).start().await;
    client.toggle_team("North").await;
    assert!(client.month_session().loaded().contains(&hq_scope("North", "Delhi")));
    assert_eq!(invoices(client.data()), ["D1"]);

    assert!(client.set_month(common::month()).await);
    assert!(client.selection().teams().is_empty());
    assert!(client.data().is_empty());
    assert!(client.month_session().loaded().is_empty());
    assert_eq!(client.available_teams(), ["North"]);

    // Nothing selected and nothing loaded: a second re-select is a no-op.
    assert!(!client.set_month(common::month()).await);

    let reads = world.store.reads();
    client.toggle_team("North").await;
    assert_eq!(world.store.reads(), reads + 1);
    assert_eq!(invoices(client.data()), ["D1"]);
}

#[tokio::test]
async fn test_reselecting_current_month_leaves_rooms() {
    let world = World::new();
    world.seed_hq("North", "Delhi", &[record("North", "Delhi", "D1")]).await;
    let mut client = world.client().await;
    client.toggle_team("North").await;
    let room = hq_scope("North", "Delhi").room_name();
    assert_eq!(world.hub.members(&room), 1);

    assert!(client.set_month(common::month()).await);
    assert_eq!(world.hub.members(&room), 0);
    assert_eq!(world.store.watcher_count(), 0);
}

#[tokio::test]
async fn test_status_and_presence() {
    let world = World::new();
    world.seed_hq("North", "Delhi", &[]).await;
    let mut client = world.client().await;
    client.toggle_team("North").await;
    settle(&mut [&mut client]).await;

    let scope = hq_scope("North", "Delhi");
    assert_eq!(
        client.status(&scope).unwrap().to_string(),
        "Online: 2025-01-North-Delhi"
    );
    assert_eq!(client.peers(), 1);
    assert!(client.overall_status().is_online());
}

#[tokio::test]
async fn test_unreachable_transport_keeps_connecting() {
    let world = World::new();
    world.seed_hq("North", "Delhi", &[record("North", "Delhi", "D1")]).await;
    world.hub.set_unreachable(true);
    let mut client = world.client().await;
    client.toggle_team("North").await;
    settle(&mut [&mut client]).await;

    assert_eq!(client.status(&hq_scope("North", "Delhi")).unwrap().to_string(), "Connecting...");
    assert_eq!(invoices(client.data()), ["D1"]);
}

#[tokio::test]
async fn test_create_team_and_hq() {
    let world = World::new();
    let mut client = world.client().await;

    client.create_team("East").await.unwrap();
    assert!(matches!(
        client.create_team("East").await.unwrap_err(),
        ClientError::AlreadyExists(_)
    ));
    assert_eq!(client.available_teams(), ["East"]);

    client.toggle_team("East").await;
    let placeholder = client.create_hq("East", "Kolkata").await.unwrap();
    assert!(placeholder.invoice_no().unwrap().starts_with("INIT-HQ-"));
    assert_eq!(placeholder.get("customer"), Some(&serde_json::json!("System")));
    assert_eq!(placeholder.get("item_name"), Some(&serde_json::json!("HQ Kolkata created")));

    assert!(matches!(
        client.create_hq("East", "Kolkata").await.unwrap_err(),
        ClientError::AlreadyExists(_)
    ));
    assert!(client.create_hq("East", "a/b").await.is_err());

    // The team is selected, so the new HQ is resident straight away.
    assert_eq!(client.data().len(), 1);
    assert!(world.stored_snapshot("East", "Kolkata").is_some());
}

#[tokio::test]
async fn test_month_summary_is_best_effort() {
    let world = World::new();
    world.seed_hq("North", "Delhi", &[record("North", "Delhi", "D1")]).await;
    world.seed_hq("South", "Chennai", &[record("South", "Chennai", "C1")]).await;
    let mut client = world.client().await;
    client.toggle_team("North").await;
    client.toggle_hq(&HqRef::new("North", "Delhi")).await;
    client.add_record(RecordDraft::new("X", "Y", 1, 1.0)).unwrap();

    let outcome = client.publish_month_summary().await.unwrap();
    assert!(outcome.included);
    assert_eq!(outcome.records, 3);

    let month_doc = world
        .store
        .peek(&StoreLayout::new("Primary").month_doc(&common::month()).unwrap())
        .unwrap();
    let state = month_doc.bytes("monthState").unwrap();
    let summary = RecordDocument::from_snapshot("check", state).unwrap();
    assert_eq!(summary.len(DEFAULT_SEQUENCE), 3);
    assert_eq!(month_doc.str_list("teams").unwrap(), ["North", "South"]);

    // Over the limit only metadata goes out.
    let tiny = SyncConfig {
        max_month_snapshot_bytes: 8,
        ..SyncConfig::default()
    };
    let world2 = World::new();
    world2.seed_hq("North", "Delhi", &[record("North", "Delhi", "D1")]).await;
    let mut small = world2.device(tiny).start().await;
    let outcome = small.publish_month_summary().await.unwrap();
    assert!(!outcome.included);
    let month_doc = world2
        .store
        .peek(&StoreLayout::new("Primary").month_doc(&common::month()).unwrap())
        .unwrap();
    assert!(month_doc.bytes("monthState").is_none());
    assert_eq!(month_doc.str("month"), Some("2025-01"));
}

#[tokio::test]
async fn test_run_flushes_debounced_save_until_cancelled() {
    let world = World::new();
    world.seed_hq("North", "Delhi", &[]).await;
    let config = SyncConfig {
        save_debounce_ms: 20,
        ..SyncConfig::default()
    };
    let mut client = world.device(config).start().await;
    client.toggle_team("North").await;
    let added = client.add_record(RecordDraft::new("X", "Y", 1, 1.0)).unwrap();

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        stopper.cancel();
    });
    client.run(cancel).await;

    let stored = world.stored_snapshot("North", "Delhi").unwrap();
    let doc = RecordDocument::from_snapshot("check", &stored).unwrap();
    let records = doc.records(DEFAULT_SEQUENCE);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].invoice_no(), added.invoice_no());
}
