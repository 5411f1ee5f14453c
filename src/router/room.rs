use smallvec::SmallVec;
use std::sync::Arc;
use tracing::warn;

use super::client::ClientSender;
use super::RouterError;
use crate::protocol::{ConnectionId, Packet, RoomId};
use crate::store::ConnectionStore;

/// Recipient lists are stack-allocated up to typical room sizes.
const TYPICAL_ROOM_SIZE: usize = 8;

/// Room-scoped fan-out: one send attempt per member, each outbound header
/// stamped with that recipient's id.
pub struct RoomSender {
    store: Arc<ConnectionStore>,
    client: Arc<ClientSender>,
}

impl RoomSender {
    pub fn new(store: Arc<ConnectionStore>, client: Arc<ClientSender>) -> Self {
        Self { store, client }
    }

    /// Returns the number of send attempts (one per room member).
    pub async fn send(&self, room_id: RoomId, packet: Packet) -> Result<usize, RouterError> {
        if self.store.get_room(&room_id).await.is_none() {
            return Err(RouterError::RoomNotFound(room_id));
        }

        let members: SmallVec<[ConnectionId; TYPICAL_ROOM_SIZE]> =
            self.store.connections_in_room(&room_id).await.into();

        let mut attempts = 0;
        for member in members {
            attempts += 1;
            if let Err(err) = self.client.send(member, packet.clone()).await {
                warn!(%room_id, %member, error = %err, "Room-cast delivery failed");
            }
        }
        Ok(attempts)
    }
}
