//! Orchestration-level tests: the game portal flow, the readiness gate on
//! the transport router and server startup/shutdown.

use altruist_server::codec::{JsonCodec, PacketCodec};
use altruist_server::config::Config;
use altruist_server::engine::{ReadyState, Readiness, TickEngine, TickEngineConfig};
use altruist_server::metrics::ServerMetrics;
use altruist_server::portal::PortalRegistry;
use altruist_server::protocol::{
    ConnectionId, FailType, Packet, PacketHeader, SuccessType, TransportKind,
};
use altruist_server::router::Router;
use altruist_server::server::{game_portal, AltruistServer};
use altruist_server::store::{Connection, ConnectionStore};
use altruist_server::transport::{create_router, GatewayContext};
use altruist_server::world::{GameWorldCoordinator, GameWorldManager, World, WorldPartitioner};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Portal flow
// ---------------------------------------------------------------------------

struct Flow {
    store: Arc<ConnectionStore>,
    portal: Arc<altruist_server::portal::Portal>,
}

fn flow_harness() -> Flow {
    let store = Arc::new(ConnectionStore::new(4));
    let metrics = Arc::new(ServerMetrics::new());
    let coordinator = Arc::new(GameWorldCoordinator::new());
    coordinator
        .register(GameWorldManager::new(
            World {
                index: 0,
                width: 256.0,
                height: 256.0,
            },
            WorldPartitioner::new(128.0, 128.0, 16.0),
        ))
        .unwrap();

    let engine = TickEngine::new(
        TickEngineConfig::default(),
        Arc::clone(&coordinator),
        Arc::clone(&metrics),
    );
    let router = Arc::new(Router::new(
        Arc::clone(&store),
        Arc::new(JsonCodec),
        None,
        Uuid::new_v4(),
        engine.dynamic_tasks(),
        engine.tick_clock(),
        metrics,
    ));

    let portal = Arc::new(
        game_portal("/game", Arc::clone(&store), router, coordinator).unwrap(),
    );
    Flow { store, portal }
}

async fn attach(store: &ConnectionStore) -> (ConnectionId, mpsc::Receiver<Bytes>) {
    let id = Uuid::new_v4();
    let (tx, rx) = mpsc::channel(32);
    store
        .add(id, Connection::new(id, TransportKind::Ws, tx), None)
        .await;
    (id, rx)
}

fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<Packet> {
    let mut packets = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        packets.push(JsonCodec.decode(&frame).unwrap());
    }
    packets
}

fn join_packet(sender: ConnectionId, room_id: Option<Uuid>) -> Packet {
    Packet::JoinGame {
        header: PacketHeader::from_client(sender),
        room_id,
        player_name: "tess".to_string(),
    }
}

#[tokio::test]
async fn join_flow_answers_success_and_announces() {
    let flow = flow_harness();
    let (client, mut rx) = attach(&flow.store).await;

    flow.portal.dispatch(join_packet(client, None), client).await;

    let packets = drain(&mut rx);
    assert!(packets.iter().any(|p| matches!(
        p,
        Packet::Success {
            success_type: SuccessType::RoomJoined,
            ..
        }
    )));
    assert!(packets
        .iter()
        .any(|p| matches!(p, Packet::Room { .. })), "join announce reaches the joiner too");
    assert!(flow.store.find_room_for_client(&client).is_some());
}

#[tokio::test]
async fn second_join_is_rejected() {
    let flow = flow_harness();
    let (client, mut rx) = attach(&flow.store).await;

    flow.portal.dispatch(join_packet(client, None), client).await;
    drain(&mut rx);

    flow.portal.dispatch(join_packet(client, None), client).await;
    let packets = drain(&mut rx);
    assert!(packets.iter().any(|p| matches!(
        p,
        Packet::Failed {
            fail_type: FailType::AlreadyInRoom,
            ..
        }
    )));
}

#[tokio::test]
async fn join_unknown_room_reports_room_not_found() {
    let flow = flow_harness();
    let (client, mut rx) = attach(&flow.store).await;

    flow.portal
        .dispatch(join_packet(client, Some(Uuid::new_v4())), client)
        .await;
    let packets = drain(&mut rx);
    assert!(packets.iter().any(|p| matches!(
        p,
        Packet::Failed {
            fail_type: FailType::RoomNotFound,
            ..
        }
    )));
}

#[tokio::test]
async fn leave_flow_empties_and_deletes_room() {
    let flow = flow_harness();
    let (client, mut rx) = attach(&flow.store).await;

    flow.portal.dispatch(join_packet(client, None), client).await;
    let room_id = flow.store.find_room_for_client(&client).unwrap();
    drain(&mut rx);

    let leave = Packet::LeaveGame {
        header: PacketHeader::from_client(client),
    };
    flow.portal.dispatch(leave, client).await;

    let packets = drain(&mut rx);
    assert!(packets.iter().any(|p| matches!(
        p,
        Packet::Success {
            success_type: SuccessType::RoomLeft,
            ..
        }
    )));
    assert!(flow.store.get_room(&room_id).await.is_none());
}

#[tokio::test]
async fn room_relay_requires_membership() {
    let flow = flow_harness();
    let (member, mut member_rx) = attach(&flow.store).await;
    let (outsider, mut outsider_rx) = attach(&flow.store).await;

    flow.portal.dispatch(join_packet(member, None), member).await;
    let room_id = flow.store.find_room_for_client(&member).unwrap();
    drain(&mut member_rx);

    let relay = Packet::Room {
        header: PacketHeader::from_client(outsider),
        room_id,
        data: serde_json::json!({"cheat": true}),
    };
    flow.portal.dispatch(relay, outsider).await;

    let outsider_packets = drain(&mut outsider_rx);
    assert!(outsider_packets.iter().any(|p| matches!(
        p,
        Packet::Failed {
            fail_type: FailType::NotInRoom,
            ..
        }
    )));
    assert!(drain(&mut member_rx).is_empty(), "relay must not reach the room");
}

#[tokio::test]
async fn move_intent_for_unknown_world_fails() {
    let flow = flow_harness();
    let (client, mut rx) = attach(&flow.store).await;

    let intent = Packet::MoveIntent {
        header: PacketHeader::from_client(client),
        world_index: 42,
        instance_id: Uuid::new_v4(),
        dx: 1.0,
        dy: 0.0,
    };
    flow.portal.dispatch(intent, client).await;

    let packets = drain(&mut rx);
    assert!(packets.iter().any(|p| matches!(
        p,
        Packet::Failed {
            fail_type: FailType::WorldNotFound,
            ..
        }
    )));
}

// ---------------------------------------------------------------------------
// Readiness gate
// ---------------------------------------------------------------------------

fn gateway(readiness: Readiness) -> axum::Router {
    let store = Arc::new(ConnectionStore::new(4));
    let ctx = Arc::new(GatewayContext {
        store,
        codec: Arc::new(JsonCodec) as Arc<dyn PacketCodec>,
        portals: Arc::new(PortalRegistry::new()),
        readiness,
        metrics: Arc::new(ServerMetrics::new()),
        cancel: CancellationToken::new(),
    });
    create_router(ctx)
}

#[tokio::test]
async fn every_route_returns_503_until_alive() {
    let readiness = Readiness::new();
    let app = gateway(readiness.clone());

    let response = app
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .uri("/readyz")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::SERVICE_UNAVAILABLE);

    readiness.set(ReadyState::Alive);
    let response = app
        .oneshot(
            axum::http::Request::builder()
                .uri("/readyz")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
}

#[tokio::test]
async fn failed_state_gates_again() {
    let readiness = Readiness::new();
    readiness.set(ReadyState::Alive);
    readiness.set(ReadyState::Failed);

    let app = gateway(readiness);
    let response = app
        .oneshot(
            axum::http::Request::builder()
                .uri("/metrics")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::SERVICE_UNAVAILABLE);
}

// ---------------------------------------------------------------------------
// Server lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_starts_ticks_and_shuts_down() {
    let mut config = Config::default();
    config.engine.engine_rate_ms = 5;

    let server = AltruistServer::builder(config)
        .world(GameWorldManager::new(
            World {
                index: 0,
                width: 128.0,
                height: 128.0,
            },
            WorldPartitioner::new(64.0, 64.0, 16.0),
        ))
        .build()
        .unwrap();

    server.start().await.unwrap();
    assert!(server.engine().readiness().is_alive());

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(server.engine().current_tick() > 0);

    server.shutdown();
}

#[tokio::test]
async fn duplicate_portal_paths_fail_at_boot() {
    let server = AltruistServer::builder(Config::default()).build().unwrap();
    let store = Arc::clone(server.store());
    let router = Arc::clone(server.router());
    let coordinator = Arc::clone(server.coordinator());

    let first = game_portal("/game", Arc::clone(&store), Arc::clone(&router), Arc::clone(&coordinator)).unwrap();
    let second = game_portal("/game", store, router, coordinator).unwrap();

    let server = server.with_portal(first).unwrap();
    assert!(server.with_portal(second).is_err());
}
