//! The message plane: unicast, room-cast, broadcast and delta-sync senders
//! layered on the connection store.

mod broadcast;
mod client;
mod engine_routed;
mod room;
mod sync;

pub use broadcast::BroadcastSender;
pub use client::ClientSender;
pub use engine_routed::EngineRoutedSender;
pub use room::RoomSender;
pub use sync::ClientSynchronizator;

use std::sync::Arc;

use crate::bridge::InterprocessBridge;
use crate::codec::{CodecError, PacketCodec};
use crate::engine::{DynamicTaskTable, TickClock};
use crate::metrics::ServerMetrics;
use crate::protocol::{ConnectionId, ProcessId, RoomId};
use crate::store::ConnectionStore;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("client {0} is not attached to any reachable process")]
    UnknownClient(ConnectionId),
    #[error("client {0} went away mid-send")]
    ClientGone(ConnectionId),
    #[error("room {0} does not exist")]
    RoomNotFound(RoomId),
    #[error("bridge push failed: {0}")]
    Bridge(#[source] anyhow::Error),
}

/// All sender primitives wired over one store/codec pair.
pub struct Router {
    pub client: Arc<ClientSender>,
    pub room: RoomSender,
    pub broadcast: Arc<BroadcastSender>,
    pub sync: ClientSynchronizator,
    pub engine_routed: EngineRoutedSender,
}

impl Router {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<ConnectionStore>,
        codec: Arc<dyn PacketCodec>,
        bridge: Option<Arc<dyn InterprocessBridge>>,
        process_id: ProcessId,
        dynamic: Arc<DynamicTaskTable>,
        tick: TickClock,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        let client = Arc::new(ClientSender::new(
            Arc::clone(&store),
            codec,
            bridge,
            process_id,
            Arc::clone(&metrics),
        ));
        let broadcast = Arc::new(BroadcastSender::new(
            Arc::clone(&store),
            Arc::clone(&client),
        ));

        Self {
            room: RoomSender::new(store, Arc::clone(&client)),
            sync: ClientSynchronizator::new(Arc::clone(&broadcast), tick, metrics),
            engine_routed: EngineRoutedSender::new(Arc::clone(&client), dynamic),
            client,
            broadcast,
        }
    }
}
