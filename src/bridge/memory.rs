use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use super::{BridgeSubscription, InterprocessBridge};

type SubscriberQueue = Arc<Mutex<VecDeque<Bytes>>>;

/// In-memory bridge backend: the single-host stand-in for a shared KV with
/// list + pub/sub operations. Multiple processes are modelled by handing
/// the same instance to several routers; each subscription drains its own
/// view of the queue.
pub struct InMemoryBridge {
    subscribers: std::sync::Mutex<Vec<Weak<Mutex<VecDeque<Bytes>>>>>,
    wake: broadcast::Sender<()>,
    connected: AtomicBool,
    /// Outbound frames held while the backend is "unreachable".
    held: Mutex<VecDeque<Bytes>>,
}

impl InMemoryBridge {
    pub fn new() -> Self {
        let (wake, _) = broadcast::channel(64);
        Self {
            subscribers: std::sync::Mutex::new(Vec::new()),
            wake,
            connected: AtomicBool::new(true),
            held: Mutex::new(VecDeque::new()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Simulate losing the shared infrastructure; pushes are held locally.
    pub fn set_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        debug!("Bridge marked disconnected; holding outbound messages");
    }

    /// Reconnect event: flush every held frame onto the queue and wake the
    /// subscribers again.
    pub async fn set_reconnected(&self) {
        self.connected.store(true, Ordering::SeqCst);
        let held: Vec<Bytes> = {
            let mut held = self.held.lock().await;
            held.drain(..).collect()
        };
        let flushed = held.len();
        for frame in held {
            self.fan_out(frame).await;
        }
        info!(flushed, "Bridge reconnected");
        let _ = self.wake.send(());
    }

    pub async fn held_count(&self) -> usize {
        self.held.lock().await.len()
    }

    async fn fan_out(&self, frame: Bytes) {
        let queues: Vec<SubscriberQueue> = {
            let mut subscribers = self.subscribers.lock().expect("bridge subscribers lock");
            subscribers.retain(|weak| weak.strong_count() > 0);
            subscribers.iter().filter_map(Weak::upgrade).collect()
        };
        for queue in queues {
            queue.lock().await.push_back(frame.clone());
        }
    }
}

impl Default for InMemoryBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InterprocessBridge for InMemoryBridge {
    async fn push(&self, frame: Bytes) -> Result<()> {
        if !self.is_connected() {
            self.held.lock().await.push_back(frame);
            return Ok(());
        }

        self.fan_out(frame).await;
        let _ = self.wake.send(());
        Ok(())
    }

    fn subscribe(&self) -> BridgeSubscription {
        let queue: SubscriberQueue = Arc::new(Mutex::new(VecDeque::new()));
        self.subscribers
            .lock()
            .expect("bridge subscribers lock")
            .push(Arc::downgrade(&queue));
        BridgeSubscription::new(queue, self.wake.subscribe())
    }

    async fn health_check(&self) -> bool {
        self.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_sees_every_push_in_order() {
        let bridge = InMemoryBridge::new();
        let sub_a = bridge.subscribe();
        let sub_b = bridge.subscribe();

        bridge.push(Bytes::from_static(b"first")).await.unwrap();
        bridge.push(Bytes::from_static(b"second")).await.unwrap();

        for sub in [&sub_a, &sub_b] {
            assert_eq!(sub.pop().await, Some(Bytes::from_static(b"first")));
            assert_eq!(sub.pop().await, Some(Bytes::from_static(b"second")));
            assert_eq!(sub.pop().await, None);
        }
    }

    #[tokio::test]
    async fn push_publishes_a_wake() {
        let bridge = InMemoryBridge::new();
        let mut sub = bridge.subscribe();
        bridge.push(Bytes::from_static(b"x")).await.unwrap();
        assert!(sub.wait_wake().await);
        assert_eq!(sub.queue_len().await, 1);
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_pushes() {
        let bridge = InMemoryBridge::new();
        bridge.push(Bytes::from_static(b"early")).await.unwrap();

        let sub = bridge.subscribe();
        assert_eq!(sub.pop().await, None);
    }

    #[tokio::test]
    async fn disconnect_holds_then_reconnect_flushes() {
        let bridge = InMemoryBridge::new();
        let sub = bridge.subscribe();
        bridge.set_disconnected();

        bridge.push(Bytes::from_static(b"held-1")).await.unwrap();
        bridge.push(Bytes::from_static(b"held-2")).await.unwrap();
        assert_eq!(bridge.held_count().await, 2);
        assert_eq!(sub.queue_len().await, 0);
        assert!(!bridge.health_check().await);

        bridge.set_reconnected().await;
        assert_eq!(bridge.held_count().await, 0);
        assert_eq!(sub.pop().await, Some(Bytes::from_static(b"held-1")));
        assert_eq!(sub.pop().await, Some(Bytes::from_static(b"held-2")));
    }
}
