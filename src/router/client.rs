use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{trace, warn};

use super::RouterError;
use crate::bridge::InterprocessBridge;
use crate::codec::PacketCodec;
use crate::metrics::ServerMetrics;
use crate::protocol::{ConnectionId, Packet, PacketHeader, ProcessId};
use crate::store::{Connection, ConnectionStore};

/// Unicast sender.
///
/// A locally attached target gets the encoded frame on its transport writer
/// queue; anything else is wrapped in an `InterprocessPacket` and pushed to
/// the bridge for whichever process holds the client.
pub struct ClientSender {
    store: Arc<ConnectionStore>,
    codec: Arc<dyn PacketCodec>,
    bridge: Option<Arc<dyn InterprocessBridge>>,
    process_id: ProcessId,
    metrics: Arc<ServerMetrics>,
}

impl ClientSender {
    pub fn new(
        store: Arc<ConnectionStore>,
        codec: Arc<dyn PacketCodec>,
        bridge: Option<Arc<dyn InterprocessBridge>>,
        process_id: ProcessId,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            store,
            codec,
            bridge,
            process_id,
            metrics,
        }
    }

    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    pub async fn send(&self, client_id: ConnectionId, mut packet: Packet) -> Result<(), RouterError> {
        packet.set_receiver(client_id);

        if let Some(connection) = self.store.get_local(&client_id) {
            if connection.is_connected && connection.is_local() {
                return self.write_local(&connection, &packet).await;
            }
        }

        let Some(bridge) = &self.bridge else {
            self.metrics.packets_dropped.fetch_add(1, Ordering::Relaxed);
            return Err(RouterError::UnknownClient(client_id));
        };

        let envelope = Packet::Interprocess {
            header: PacketHeader::from_server(),
            process_id: self.process_id,
            inner: Box::new(packet),
        };
        let frame = self.codec.encode(&envelope)?;
        bridge.push(frame).await.map_err(RouterError::Bridge)?;
        self.metrics.bridge_pushes.fetch_add(1, Ordering::Relaxed);
        trace!(%client_id, "Pushed packet to inter-process bridge");
        Ok(())
    }

    /// Deliver a packet popped from the bridge to its locally attached
    /// receiver. Never re-enters the bridge; a receiver unknown to this
    /// process is dropped.
    pub async fn deliver_local(&self, packet: Packet) -> Result<(), RouterError> {
        let Some(receiver) = packet.header().receiver else {
            self.metrics.packets_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                packet_type = packet.type_name(),
                "Bridge packet without receiver dropped"
            );
            return Ok(());
        };

        match self.store.get_local(&receiver) {
            Some(connection) if connection.is_connected && connection.is_local() => {
                self.write_local(&connection, &packet).await?;
                self.metrics.bridge_deliveries.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            _ => {
                trace!(%receiver, "Bridge packet for non-local client ignored");
                Ok(())
            }
        }
    }

    async fn write_local(&self, connection: &Connection, packet: &Packet) -> Result<(), RouterError> {
        let frame = self.codec.encode(packet)?;
        let Some(outbound) = &connection.outbound else {
            return Err(RouterError::ClientGone(connection.connection_id));
        };

        if outbound.send(frame).await.is_err() {
            // Writer task is gone; flag for the cleanup sweep.
            self.store.mark_disconnected(&connection.connection_id);
            self.metrics.packets_dropped.fetch_add(1, Ordering::Relaxed);
            return Err(RouterError::ClientGone(connection.connection_id));
        }

        self.metrics.packets_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
