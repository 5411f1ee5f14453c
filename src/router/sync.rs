use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::trace;

use super::broadcast::BroadcastSender;
use super::RouterError;
use crate::engine::TickClock;
use crate::metrics::ServerMetrics;
use crate::protocol::{Packet, PacketHeader};
use crate::sync::{SyncTracker, Synchronizable};

/// Delta-sync sender.
///
/// Computes the entity's changed-field set against the owning client's delta
/// context (keyed by the entity's connection id) and broadcasts a
/// `SyncPacket` carrying only those fields; a call with nothing changed
/// emits nothing.
pub struct ClientSynchronizator {
    broadcast: Arc<BroadcastSender>,
    tick: TickClock,
    metrics: Arc<ServerMetrics>,
}

impl ClientSynchronizator {
    pub fn new(broadcast: Arc<BroadcastSender>, tick: TickClock, metrics: Arc<ServerMetrics>) -> Self {
        Self {
            broadcast,
            tick,
            metrics,
        }
    }

    /// Returns whether a packet was emitted.
    pub async fn send<E: Synchronizable>(
        &self,
        tracker: &SyncTracker<E>,
        entity: &E,
        force_all: bool,
    ) -> Result<bool, RouterError> {
        let current_tick = self.tick.current();
        let (mask, data) =
            tracker.changed_data(entity, entity.connection_id(), current_tick, force_all);

        if !mask.any() {
            self.metrics.sync_calls_empty.fetch_add(1, Ordering::Relaxed);
            trace!(
                entity_type = tracker.schema().entity_type(),
                current_tick,
                "Sync call produced no changes"
            );
            return Ok(false);
        }

        let packet = Packet::Sync {
            header: PacketHeader::from_server(),
            entity_type: tracker.schema().entity_type().to_string(),
            data,
        };
        self.broadcast.send(packet, None).await;
        self.metrics.sync_packets_emitted.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }
}
