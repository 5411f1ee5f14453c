use std::sync::Arc;
use tracing::warn;

use super::client::ClientSender;
use crate::protocol::{ConnectionId, Packet};
use crate::store::ConnectionStore;

/// Server-wide fan-out with optional exclusion of one client.
pub struct BroadcastSender {
    store: Arc<ConnectionStore>,
    client: Arc<ClientSender>,
}

impl BroadcastSender {
    pub fn new(store: Arc<ConnectionStore>, client: Arc<ClientSender>) -> Self {
        Self { store, client }
    }

    /// Returns the number of send attempts; the excluded client never
    /// receives.
    pub async fn send(&self, packet: Packet, exclude: Option<ConnectionId>) -> usize {
        let mut attempts = 0;
        for connection_id in self.store.all_ids() {
            if Some(connection_id) == exclude {
                continue;
            }
            attempts += 1;
            if let Err(err) = self.client.send(connection_id, packet.clone()).await {
                warn!(%connection_id, error = %err, "Broadcast delivery failed");
            }
        }
        attempts
    }
}
