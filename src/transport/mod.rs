//! WebSocket transport surface.
//!
//! One route per registered portal path. The handshake assigns a fresh
//! connection id, registers it in the store and pushes a `HandshakePacket`;
//! afterwards every frame is a single encoded packet dispatched through the
//! portal's gates. A readiness middleware answers `503 Service Unavailable`
//! on every route while the server is not `Alive`.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codec::PacketCodec;
use crate::engine::Readiness;
use crate::metrics::ServerMetrics;
use crate::portal::{DispatchOutcome, Portal, PortalRegistry};
use crate::protocol::{ConnectionId, FailType, Packet, TransportKind};
use crate::store::{Connection, ConnectionStore};

/// Everything the transport layer needs, shared across sockets.
pub struct GatewayContext {
    pub store: Arc<ConnectionStore>,
    pub codec: Arc<dyn PacketCodec>,
    pub portals: Arc<PortalRegistry>,
    pub readiness: Readiness,
    pub metrics: Arc<ServerMetrics>,
    pub cancel: CancellationToken,
}

/// Build the axum router: one WebSocket route per portal, plus the
/// readiness and metrics endpoints, all behind the readiness gate.
pub fn create_router(ctx: Arc<GatewayContext>) -> axum::Router {
    let mut router = axum::Router::new();

    for path in ctx.portals.paths() {
        let Some(portal) = ctx.portals.get(&path) else {
            continue;
        };
        let ctx = Arc::clone(&ctx);
        router = router.route(
            &path,
            get(move |ws: WebSocketUpgrade| {
                let ctx = Arc::clone(&ctx);
                let portal = Arc::clone(&portal);
                async move { ws.on_upgrade(move |socket| handle_socket(socket, ctx, portal)) }
            }),
        );
    }

    let metrics_ctx = Arc::clone(&ctx);
    router
        // The readiness gate below turns this into a 503 while not Alive.
        .route("/readyz", get(|| async { "OK" }))
        .route(
            "/metrics",
            get(move || {
                let ctx = Arc::clone(&metrics_ctx);
                async move { axum::Json(ctx.metrics.snapshot()).into_response() }
            }),
        )
        .layer(middleware::from_fn_with_state(ctx, readiness_gate))
        .layer(TraceLayer::new_for_http())
}

/// 503 on every route whenever readiness is not `Alive`.
async fn readiness_gate(
    State(ctx): State<Arc<GatewayContext>>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    if !ctx.readiness.is_alive() {
        return (StatusCode::SERVICE_UNAVAILABLE, "service not ready").into_response();
    }
    next.run(request).await
}

/// Bind and serve until the cancellation token fires.
pub async fn serve(ctx: Arc<GatewayContext>, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let cancel = ctx.cancel.clone();
    let router = create_router(ctx);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Transport listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

async fn handle_socket(socket: WebSocket, ctx: Arc<GatewayContext>, portal: Arc<Portal>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Bytes>(64);

    let connection_id: ConnectionId = Uuid::new_v4();
    let connection = Connection::new(connection_id, TransportKind::Ws, tx.clone());
    ctx.store.add(connection_id, connection, None).await;
    ctx.metrics.increment_connections();
    info!(%connection_id, path = portal.path(), "WebSocket connection established");

    // First frame: the assigned connection id.
    let mut handshake = Packet::Handshake {
        header: crate::protocol::PacketHeader::from_server(),
        connection_id,
    };
    handshake.set_receiver(connection_id);
    match ctx.codec.encode(&handshake) {
        Ok(frame) => {
            if send_frame(&mut ws_sender, frame, ctx.codec.is_binary()).await.is_err() {
                ctx.store.remove(&connection_id).await;
                ctx.metrics.decrement_connections();
                return;
            }
        }
        Err(err) => warn!(%connection_id, error = %err, "Failed to encode handshake"),
    }

    // Writer task: drains the connection's outbound queue onto the socket.
    let is_binary = ctx.codec.is_binary();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if send_frame(&mut ws_sender, frame, is_binary).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    // Reader loop: every inbound frame is one encoded packet.
    loop {
        let message = tokio::select! {
            () = ctx.cancel.cancelled() => break,
            message = ws_receiver.next() => message,
        };
        match message {
            Some(Ok(Message::Text(text))) => {
                handle_frame(&ctx, &portal, connection_id, text.as_bytes(), &tx).await;
            }
            Some(Ok(Message::Binary(data))) => {
                handle_frame(&ctx, &portal, connection_id, &data, &tx).await;
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {} // ping/pong handled by axum
            Some(Err(err)) => {
                debug!(%connection_id, error = %err, "WebSocket read error");
                break;
            }
        }
    }

    ctx.store.remove(&connection_id).await;
    ctx.metrics.decrement_connections();
    writer.abort();
    info!(%connection_id, "WebSocket connection closed");
}

async fn handle_frame(
    ctx: &GatewayContext,
    portal: &Portal,
    connection_id: ConnectionId,
    bytes: &[u8],
    reply: &mpsc::Sender<Bytes>,
) {
    ctx.store.touch(&connection_id);

    let packet = match ctx.codec.decode(bytes) {
        Ok(packet) => packet,
        Err(err) => {
            // Malformed frame: drop it, keep the connection.
            ctx.metrics.packets_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(%connection_id, error = %err, "Dropping malformed frame");
            return;
        }
    };

    match portal.dispatch(packet, connection_id).await {
        DispatchOutcome::Handled => {}
        DispatchOutcome::UnknownType(packet_type) => {
            send_failure(
                ctx,
                reply,
                connection_id,
                format!("no handler for {packet_type}"),
                FailType::UnknownPacketType,
            )
            .await;
        }
        DispatchOutcome::HandlerFailed => {
            send_failure(
                ctx,
                reply,
                connection_id,
                "handler failed".to_string(),
                FailType::HandlerFailed,
            )
            .await;
        }
    }
}

async fn send_failure(
    ctx: &GatewayContext,
    reply: &mpsc::Sender<Bytes>,
    connection_id: ConnectionId,
    reason: String,
    fail_type: FailType,
) {
    let mut packet = Packet::failed(reason, fail_type);
    packet.set_receiver(connection_id);
    if let Ok(frame) = ctx.codec.encode(&packet) {
        let _ = reply.send(frame).await;
    }
}

async fn send_frame(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    frame: Bytes,
    is_binary: bool,
) -> Result<(), axum::Error> {
    if is_binary {
        sender.send(Message::Binary(frame)).await
    } else {
        match String::from_utf8(frame.to_vec()) {
            Ok(text) => sender.send(Message::Text(text.into())).await,
            Err(_) => sender.send(Message::Binary(frame)).await,
        }
    }
}
