use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::portal::{Portal, PortalError};
use crate::protocol::{ConnectionId, FailType, Packet, PacketHeader, SuccessType};
use crate::router::Router;
use crate::store::ConnectionStore;
use crate::world::GameWorldCoordinator;

const PLAYER_OBJECT_TYPE: &str = "player";
const PLAYER_RADIUS: f32 = 0.5;

/// The core game portal: join/leave, room payload relay and movement
/// intents, answered with `SuccessPacket`/`FailedPacket`.
pub fn game_portal(
    path: impl Into<String>,
    store: Arc<ConnectionStore>,
    router: Arc<Router>,
    coordinator: Arc<GameWorldCoordinator>,
) -> Result<Portal, PortalError> {
    let join_store = Arc::clone(&store);
    let join_router = Arc::clone(&router);
    let leave_store = Arc::clone(&store);
    let leave_router = Arc::clone(&router);
    let room_store = store;
    let room_router = Arc::clone(&router);
    let move_router = router;

    Portal::builder(path)
        .gate_with_sender("JoinGamePacket", move |packet, sender| {
            let store = Arc::clone(&join_store);
            let router = Arc::clone(&join_router);
            async move { handle_join(store, router, packet, sender).await }
        })
        .gate_with_sender("LeaveGamePacket", move |packet, sender| {
            let store = Arc::clone(&leave_store);
            let router = Arc::clone(&leave_router);
            async move { handle_leave(store, router, packet, sender).await }
        })
        .gate_with_sender("RoomPacket", move |packet, sender| {
            let store = Arc::clone(&room_store);
            let router = Arc::clone(&room_router);
            async move { handle_room(store, router, packet, sender).await }
        })
        .gate_with_sender("MoveIntentPacket", move |packet, sender| {
            let router = Arc::clone(&move_router);
            let coordinator = Arc::clone(&coordinator);
            async move { handle_move(router, coordinator, packet, sender).await }
        })
        .build()
}

async fn handle_join(
    store: Arc<ConnectionStore>,
    router: Arc<Router>,
    packet: Packet,
    sender: ConnectionId,
) -> anyhow::Result<()> {
    let Packet::JoinGame {
        room_id,
        player_name,
        ..
    } = packet
    else {
        return Ok(());
    };

    if store.find_room_for_client(&sender).is_some() {
        let _ = router
            .client
            .send(sender, Packet::failed("already in a room", FailType::AlreadyInRoom))
            .await;
        return Ok(());
    }

    let joined = match room_id {
        Some(requested) => match store.add_client_to_room(&sender, &requested).await {
            Some(room) => room,
            None => {
                let fail_type = if store.get_room(&requested).await.is_some() {
                    FailType::RoomFull
                } else {
                    FailType::RoomNotFound
                };
                let _ = router
                    .client
                    .send(sender, Packet::failed(format!("cannot join room {requested}"), fail_type))
                    .await;
                return Ok(());
            }
        },
        None => {
            let available = store.find_available_room().await;
            match store.add_client_to_room(&sender, &available.id).await {
                Some(room) => room,
                None => {
                    let _ = router
                        .client
                        .send(sender, Packet::failed("no room available", FailType::Internal))
                        .await;
                    return Ok(());
                }
            }
        }
    };

    debug!(%sender, room_id = %joined.id, player_name, "Client joined room");
    router
        .client
        .send(
            sender,
            Packet::success(format!("joined room {}", joined.id), SuccessType::RoomJoined),
        )
        .await?;

    let announce = Packet::Room {
        header: PacketHeader::from_server(),
        room_id: joined.id,
        data: json!({
            "event": "player_joined",
            "player_name": player_name,
            "connection_id": sender,
        }),
    };
    router.room.send(joined.id, announce).await?;
    Ok(())
}

async fn handle_leave(
    store: Arc<ConnectionStore>,
    router: Arc<Router>,
    _packet: Packet,
    sender: ConnectionId,
) -> anyhow::Result<()> {
    let Some(room_id) = store.remove_client_from_room(&sender).await else {
        let _ = router
            .client
            .send(sender, Packet::failed("not in a room", FailType::NotInRoom))
            .await;
        return Ok(());
    };

    router
        .client
        .send(
            sender,
            Packet::success(format!("left room {room_id}"), SuccessType::RoomLeft),
        )
        .await?;

    // The room may already be gone if the leaver was its last member.
    if store.get_room(&room_id).await.is_some() {
        let announce = Packet::Room {
            header: PacketHeader::from_server(),
            room_id,
            data: json!({"event": "player_left", "connection_id": sender}),
        };
        router.room.send(room_id, announce).await?;
    }
    Ok(())
}

async fn handle_room(
    store: Arc<ConnectionStore>,
    router: Arc<Router>,
    packet: Packet,
    sender: ConnectionId,
) -> anyhow::Result<()> {
    let Packet::Room { room_id, .. } = &packet else {
        return Ok(());
    };
    let room_id = *room_id;

    if store.find_room_for_client(&sender) != Some(room_id) {
        let _ = router
            .client
            .send(sender, Packet::failed("not in that room", FailType::NotInRoom))
            .await;
        return Ok(());
    }

    router.room.send(room_id, packet).await?;
    Ok(())
}

async fn handle_move(
    router: Arc<Router>,
    coordinator: Arc<GameWorldCoordinator>,
    packet: Packet,
    sender: ConnectionId,
) -> anyhow::Result<()> {
    let Packet::MoveIntent {
        world_index,
        instance_id,
        dx,
        dy,
        ..
    } = packet
    else {
        return Ok(());
    };

    let Ok(manager) = coordinator.get(world_index) else {
        let _ = router
            .client
            .send(
                sender,
                Packet::failed(format!("world {world_index} not registered"), FailType::WorldNotFound),
            )
            .await;
        return Ok(());
    };

    // Integrated by the next physics step.
    manager.queue_move(PLAYER_OBJECT_TYPE, instance_id, (dx, dy), PLAYER_RADIUS);
    Ok(())
}
