//! Connection/room store invariants: capacity, empty-room deletion, the
//! reverse index and the write-through shared tier.

use altruist_server::protocol::TransportKind;
use altruist_server::store::{Connection, ConnectionStore, InMemorySharedTier};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

fn connection(id: Uuid) -> Connection {
    let (tx, _rx) = mpsc::channel(8);
    Connection::new(id, TransportKind::Ws, tx)
}

/// S3: a room capped at 100 accepts exactly 100 clients; the 101st join
/// returns None and the membership stays at the cap.
#[tokio::test]
async fn room_capacity_is_a_hard_limit() {
    let store = ConnectionStore::new(100);
    let room = store.create_room().await;

    for _ in 0..100 {
        let id = Uuid::new_v4();
        store.add(id, connection(id), None).await;
        assert!(
            store.add_client_to_room(&id, &room.id).await.is_some(),
            "join under capacity must succeed"
        );
    }

    let overflow = Uuid::new_v4();
    store.add(overflow, connection(overflow), None).await;
    assert!(store.add_client_to_room(&overflow, &room.id).await.is_none());

    let room = store.get_room(&room.id).await.expect("room still exists");
    assert_eq!(room.len(), 100);
    assert!(!room.connection_ids.contains(&overflow));
}

#[tokio::test]
async fn join_to_unknown_room_returns_none() {
    let store = ConnectionStore::new(100);
    let id = Uuid::new_v4();
    store.add(id, connection(id), None).await;

    assert!(store.add_client_to_room(&id, &Uuid::new_v4()).await.is_none());
    assert!(store.find_room_for_client(&id).is_none());
}

/// Empty-room deletion: removing the last member deletes the room.
#[tokio::test]
async fn last_member_removal_deletes_room() {
    let store = ConnectionStore::new(4);
    let room = store.create_room().await;
    let members: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();

    for id in &members {
        store.add(*id, connection(*id), Some(room.id)).await;
    }
    assert_eq!(store.get_room(&room.id).await.unwrap().len(), 3);

    for (i, id) in members.iter().enumerate() {
        store.remove(id).await;
        if i < members.len() - 1 {
            assert!(store.get_room(&room.id).await.is_some());
        }
    }
    assert!(store.get_room(&room.id).await.is_none());
    assert_eq!(store.room_count(), 0);
}

#[tokio::test]
async fn reverse_index_tracks_single_room_membership() {
    let store = ConnectionStore::new(10);
    let room = store.create_room().await;
    let id = Uuid::new_v4();
    store.add(id, connection(id), Some(room.id)).await;

    assert_eq!(store.find_room_for_client(&id), Some(room.id));

    store.remove_client_from_room(&id).await;
    assert_eq!(store.find_room_for_client(&id), None);
    assert!(store.exists(&id), "leaving a room keeps the connection");
}

#[tokio::test]
async fn find_available_room_reuses_then_creates() {
    let store = ConnectionStore::new(2);

    // No rooms yet: one is created.
    let first = store.find_available_room().await;
    assert_eq!(store.room_count(), 1);

    // Still has space: the same room is returned.
    let member = Uuid::new_v4();
    store.add(member, connection(member), Some(first.id)).await;
    assert_eq!(store.find_available_room().await.id, first.id);

    // Fill it up: the next call creates a fresh room.
    let second_member = Uuid::new_v4();
    store
        .add(second_member, connection(second_member), Some(first.id))
        .await;
    let fresh = store.find_available_room().await;
    assert_ne!(fresh.id, first.id);
    assert_eq!(store.room_count(), 2);
}

#[tokio::test]
async fn cleanup_sweeps_only_disconnected_clients() {
    let store = ConnectionStore::new(10);
    let room = store.create_room().await;

    let keep = Uuid::new_v4();
    let drop_a = Uuid::new_v4();
    let drop_b = Uuid::new_v4();
    for id in [keep, drop_a, drop_b] {
        store.add(id, connection(id), Some(room.id)).await;
    }

    store.mark_disconnected(&drop_a);
    store.mark_disconnected(&drop_b);

    assert_eq!(store.cleanup().await, 2);
    assert!(store.exists(&keep));
    assert!(!store.exists(&drop_a));
    assert!(!store.exists(&drop_b));
    assert_eq!(store.get_room(&room.id).await.unwrap().len(), 1);
}

// ===========================================================================
// Shared tier
// ===========================================================================

/// Two stores over one shared tier model two processes: connections and
/// room membership written by one are readable (and rehydrated) by the
/// other, without a local transport attachment.
#[tokio::test]
async fn shared_tier_spans_processes() {
    use altruist_server::store::SharedTier;
    use tokio_test::assert_ok;

    let shared = Arc::new(InMemorySharedTier::new());
    let process_a = ConnectionStore::with_shared_tier(10, shared.clone());
    let process_b = ConnectionStore::with_shared_tier(10, shared.clone());

    let room = process_a.create_room().await;
    let id = Uuid::new_v4();
    process_a.add(id, connection(id), Some(room.id)).await;

    let remote = process_b.get(&id).await.expect("visible via shared tier");
    assert!(!remote.is_local());

    let remote_room = process_b.get_room(&room.id).await.expect("room visible");
    assert!(remote_room.connection_ids.contains(&id));

    // Removal on A propagates to the shared tier.
    process_a.remove(&id).await;
    assert!(assert_ok!(shared.get_connection(&id).await).is_none());
    assert!(assert_ok!(shared.get_room(&room.id).await).is_none());
}
