use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{BridgeSubscription, InterprocessBridge};
use crate::codec::PacketCodec;
use crate::metrics::ServerMetrics;
use crate::protocol::{Packet, ProcessId};
use crate::router::ClientSender;

/// Subscribe to the bridge and drain on every wake: pop until empty,
/// decode, discard own echoes by process id, hand the rest to the local
/// unicast sender.
pub fn spawn_bridge_pump(
    bridge: Arc<dyn InterprocessBridge>,
    codec: Arc<dyn PacketCodec>,
    client: Arc<ClientSender>,
    process_id: ProcessId,
    metrics: Arc<ServerMetrics>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let mut subscription = bridge.subscribe();
    tokio::spawn(async move {
        loop {
            drain(&subscription, &*codec, &client, process_id, &metrics).await;

            tokio::select! {
                () = cancel.cancelled() => return,
                alive = subscription.wait_wake() => {
                    if !alive {
                        return;
                    }
                }
            }
        }
    })
}

async fn drain(
    subscription: &BridgeSubscription,
    codec: &dyn PacketCodec,
    client: &ClientSender,
    process_id: ProcessId,
    metrics: &ServerMetrics,
) {
    while let Some(frame) = subscription.pop().await {
        let packet = match codec.decode(&frame) {
            Ok(packet) => packet,
            Err(err) => {
                metrics.packets_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "Dropping undecodable bridge frame");
                continue;
            }
        };

        match packet {
            Packet::Interprocess {
                process_id: origin,
                inner,
                ..
            } => {
                if origin == process_id {
                    // Own message echoed back through the queue.
                    metrics
                        .bridge_loopbacks_discarded
                        .fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                if let Err(err) = client.deliver_local(*inner).await {
                    warn!(error = %err, "Bridge delivery to local client failed");
                }
            }
            other => {
                metrics.packets_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    packet_type = other.type_name(),
                    "Dropping non-interprocess frame from bridge"
                );
            }
        }
    }
}
