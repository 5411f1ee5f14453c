//! Inter-process message bridge.
//!
//! When several processes cooperatively serve one logical game, a packet
//! addressed to a client attached elsewhere is ferried across two well-known
//! channels: the durable message queue and the ephemeral message-distribute
//! wake topic. Every subscribing process drains its view of the queue on
//! wake and discards messages it originated. Delivery is best-effort;
//! per-queue FIFO between a push and its pop is the only ordering claim.

mod memory;
mod pump;

pub use memory::InMemoryBridge;
pub use pump::spawn_bridge_pump;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// One process's view of the bridge: a drainable message queue plus the
/// wake notifications. Messages pushed after `subscribe` fan out to every
/// live subscription.
pub struct BridgeSubscription {
    queue: Arc<Mutex<VecDeque<Bytes>>>,
    wake: broadcast::Receiver<()>,
}

impl BridgeSubscription {
    pub(crate) fn new(queue: Arc<Mutex<VecDeque<Bytes>>>, wake: broadcast::Receiver<()>) -> Self {
        Self { queue, wake }
    }

    /// Oldest undrained frame, `None` when the queue is empty.
    pub async fn pop(&self) -> Option<Bytes> {
        self.queue.lock().await.pop_front()
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Wait for the next wake. Returns false when the bridge is gone; a
    /// lagged wake still means "drain now".
    pub async fn wait_wake(&mut self) -> bool {
        match self.wake.recv().await {
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => true,
            Err(broadcast::error::RecvError::Closed) => false,
        }
    }
}

/// Contract over any backend offering ordered list operations plus pub/sub.
#[async_trait]
pub trait InterprocessBridge: Send + Sync {
    /// Push an encoded `InterprocessPacket` frame onto the message queue
    /// and publish an empty wake. While the backend is unreachable the
    /// frame is held locally and flushed when the connection is restored.
    async fn push(&self, frame: Bytes) -> Result<()>;

    /// Register this process's drain view.
    fn subscribe(&self) -> BridgeSubscription;

    /// Liveness probe used by the startup sequence and readiness.
    async fn health_check(&self) -> bool;
}
