use std::sync::Arc;
use tracing::warn;

use super::client::ClientSender;
use crate::engine::{dynamic_task_key, DynamicTaskTable};
use crate::protocol::{ConnectionId, Packet};

/// Engine-routed unicast: instead of writing immediately, the send is
/// enqueued as a dynamic task keyed by `(client id, packet type)`.
///
/// The key makes the engine deduplicate: within one tick the latest enqueue
/// for a key wins, and while a key's previous send is still in flight new
/// enqueues are dropped. A movement stream that outruns the engine collapses
/// to its freshest packet per client.
pub struct EngineRoutedSender {
    client: Arc<ClientSender>,
    dynamic: Arc<DynamicTaskTable>,
}

impl EngineRoutedSender {
    pub fn new(client: Arc<ClientSender>, dynamic: Arc<DynamicTaskTable>) -> Self {
        Self { client, dynamic }
    }

    pub fn send(&self, client_id: ConnectionId, packet: Packet) {
        let key = dynamic_task_key((client_id, packet.type_name()));
        let client = Arc::clone(&self.client);
        self.dynamic.send_task(key, move || async move {
            if let Err(err) = client.send(client_id, packet).await {
                warn!(%client_id, error = %err, "Engine-routed send failed");
            }
        });
    }
}
