use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::Room;
use crate::protocol::{ConnectionId, ConnectionState, RoomId, TransportKind};

/// Serializable snapshot of a connection, as stored in the shared tier.
///
/// The outbound channel is deliberately absent: a record read back from the
/// shared tier describes a client attached to some process, not necessarily
/// this one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionRecord {
    pub connection_id: ConnectionId,
    pub transport_kind: TransportKind,
    pub is_connected: bool,
    pub last_activity: chrono::DateTime<chrono::Utc>,
    pub state: ConnectionState,
}

/// Shared storage tier for cross-process deployments.
///
/// Every local mutation is written through; write failures are logged by the
/// store and the local tier stays authoritative for this process. No strong
/// cross-process consistency is claimed.
#[async_trait]
pub trait SharedTier: Send + Sync {
    async fn put_connection(&self, record: &ConnectionRecord) -> Result<()>;
    async fn remove_connection(&self, id: &ConnectionId) -> Result<()>;
    async fn get_connection(&self, id: &ConnectionId) -> Result<Option<ConnectionRecord>>;

    async fn put_room(&self, room: &Room) -> Result<()>;
    async fn remove_room(&self, id: &RoomId) -> Result<()>;
    async fn get_room(&self, id: &RoomId) -> Result<Option<Room>>;

    async fn put_room_assignment(&self, connection_id: &ConnectionId, room_id: &RoomId)
        -> Result<()>;
    async fn remove_room_assignment(&self, connection_id: &ConnectionId) -> Result<()>;

    /// Liveness probe used by the startup sequence.
    async fn health_check(&self) -> bool;
}

/// In-memory shared tier, the single-process stand-in for an external KV.
#[derive(Default)]
pub struct InMemorySharedTier {
    connections: RwLock<HashMap<ConnectionId, ConnectionRecord>>,
    rooms: RwLock<HashMap<RoomId, Room>>,
    assignments: RwLock<HashMap<ConnectionId, RoomId>>,
}

impl InMemorySharedTier {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedTier for InMemorySharedTier {
    async fn put_connection(&self, record: &ConnectionRecord) -> Result<()> {
        self.connections
            .write()
            .await
            .insert(record.connection_id, record.clone());
        Ok(())
    }

    async fn remove_connection(&self, id: &ConnectionId) -> Result<()> {
        self.connections.write().await.remove(id);
        Ok(())
    }

    async fn get_connection(&self, id: &ConnectionId) -> Result<Option<ConnectionRecord>> {
        Ok(self.connections.read().await.get(id).cloned())
    }

    async fn put_room(&self, room: &Room) -> Result<()> {
        self.rooms.write().await.insert(room.id, room.clone());
        Ok(())
    }

    async fn remove_room(&self, id: &RoomId) -> Result<()> {
        self.rooms.write().await.remove(id);
        Ok(())
    }

    async fn get_room(&self, id: &RoomId) -> Result<Option<Room>> {
        Ok(self.rooms.read().await.get(id).cloned())
    }

    async fn put_room_assignment(
        &self,
        connection_id: &ConnectionId,
        room_id: &RoomId,
    ) -> Result<()> {
        self.assignments
            .write()
            .await
            .insert(*connection_id, *room_id);
        Ok(())
    }

    async fn remove_room_assignment(&self, connection_id: &ConnectionId) -> Result<()> {
        self.assignments.write().await.remove(connection_id);
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }
}
