//! Multi-client convergence over the peer room and the durable store.

mod common;

use common::{World, invoices, record, settle};
use hqsync_client::SyncClient;
use hqsync_crdt::{DEFAULT_SEQUENCE, RecordDocument};
use hqsync_types::{HqRef, RecordDraft};

async fn open_delhi(world: &World) -> SyncClient {
    let mut client = world.client().await;
    client.toggle_team("North").await;
    client.toggle_hq(&HqRef::new("North", "Delhi")).await;
    client
}

fn stored_invoices(world: &World) -> Vec<String> {
    let bytes = world.stored_snapshot("North", "Delhi").unwrap_or_default();
    let doc = RecordDocument::from_snapshot("check", &bytes).unwrap();
    invoices(&doc.records(DEFAULT_SEQUENCE))
}

#[tokio::test]
async fn test_peer_edits_reach_other_client_without_store_writes() {
    let world = World::new();
    world.seed_hq("North", "Delhi", &[record("North", "Delhi", "D1")]).await;
    let mut alice = open_delhi(&world).await;
    let mut bob = open_delhi(&world).await;
    settle(&mut [&mut alice, &mut bob]).await;
    assert_eq!(alice.peers(), 2);
    assert_eq!(bob.peers(), 2);

    let writes = world.store.writes();
    let added = alice.add_record(RecordDraft::new("X", "Y", 1, 1.0)).unwrap();
    settle(&mut [&mut alice, &mut bob]).await;

    let expected = invoices(&[
        record("North", "Delhi", "D1"),
        record("North", "Delhi", added.invoice_no().unwrap()),
    ]);
    assert_eq!(invoices(bob.data()), expected);
    assert_eq!(world.store.writes(), writes);

    // Only the author saves, once.
    alice.flush().await;
    bob.flush().await;
    settle(&mut [&mut alice, &mut bob]).await;
    alice.flush().await;
    bob.flush().await;
    assert_eq!(world.store.writes(), writes + 1);
    assert_eq!(stored_invoices(&world), expected);
}

#[tokio::test]
async fn test_concurrent_edits_converge_through_store() {
    let world = World::new();
    world.seed_hq("North", "Delhi", &[]).await;
    world.hub.set_unreachable(true);
    let mut alice = open_delhi(&world).await;
    let mut bob = open_delhi(&world).await;

    let a = alice.add_record(RecordDraft::new("A", "Y", 1, 1.0)).unwrap();
    let b = bob.add_record(RecordDraft::new("B", "Y", 1, 1.0)).unwrap();
    let writes = world.store.writes();

    alice.flush().await;
    settle(&mut [&mut alice, &mut bob]).await;
    // Bob merged Alice's save but still holds an op the store lacks.
    assert_eq!(invoices(bob.data()).len(), 2);
    bob.flush().await;
    settle(&mut [&mut alice, &mut bob]).await;

    let mut expected = vec![a.invoice_no().unwrap().to_string(), b.invoice_no().unwrap().to_string()];
    expected.sort();
    assert_eq!(invoices(alice.data()), expected);
    assert_eq!(invoices(bob.data()), expected);
    assert_eq!(stored_invoices(&world), expected);

    // Merging each other's saves schedules nothing further.
    alice.flush().await;
    bob.flush().await;
    assert_eq!(world.store.writes(), writes + 2);

    // A fresh device sees the converged state from the store alone.
    let mut carol = open_delhi(&world).await;
    assert_eq!(invoices(carol.data()), expected);
}

#[tokio::test]
async fn test_late_joiner_gets_state_from_peer_room() {
    let world = World::new();
    world.seed_hq("North", "Delhi", &[]).await;
    let mut alice = open_delhi(&world).await;
    let added = alice.add_record(RecordDraft::new("X", "Y", 1, 1.0)).unwrap();

    // Nothing saved yet, so only the peer room can deliver it.
    assert!(stored_invoices(&world).is_empty());
    let mut bob = open_delhi(&world).await;
    settle(&mut [&mut alice, &mut bob]).await;

    assert_eq!(invoices(bob.data()), [added.invoice_no().unwrap()]);
}

#[tokio::test]
async fn test_scopes_with_dashes_keep_separate_rooms() {
    let world = World::new();
    world.seed_hq("North-A", "B", &[record("North-A", "B", "INV-NA-B")]).await;
    world.seed_hq("North", "A-B", &[]).await;

    let mut first = world.client().await;
    first.toggle_team("North-A").await;
    first.toggle_hq(&HqRef::new("North-A", "B")).await;
    let mut second = world.client().await;
    second.toggle_team("North").await;
    second.toggle_hq(&HqRef::new("North", "A-B")).await;
    settle(&mut [&mut first, &mut second]).await;
    assert_eq!(first.peers(), 1);
    assert_eq!(second.peers(), 1);

    let added = second.add_record(RecordDraft::new("X", "Y", 1, 1.0)).unwrap();
    second.flush().await;
    settle(&mut [&mut first, &mut second]).await;

    assert_eq!(invoices(first.data()), ["INV-NA-B"]);
    assert_eq!(invoices(second.data()), [added.invoice_no().unwrap()]);

    let stored = |team: &str, hq: &str| {
        let bytes = world.stored_snapshot(team, hq).unwrap_or_default();
        invoices(&RecordDocument::from_snapshot("check", &bytes).unwrap().records(DEFAULT_SEQUENCE))
    };
    assert_eq!(stored("North-A", "B"), ["INV-NA-B"]);
    assert_eq!(stored("North", "A-B"), [added.invoice_no().unwrap()]);
}
