//! Authoritative registry of live client sessions and rooms.
//!
//! A process-local map backs every operation; when a shared tier is enabled,
//! every mutation writes through and reads fall back to it, rehydrating the
//! local copy. Write-through errors are logged and retried implicitly by the
//! next mutation; the local tier stays the source of truth for this process.

mod shared;

pub use shared::{ConnectionRecord, InMemorySharedTier, SharedTier};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::protocol::{ConnectionId, ConnectionState, RoomId, TransportKind};

/// A live client session.
#[derive(Debug, Clone)]
pub struct Connection {
    pub connection_id: ConnectionId,
    pub transport_kind: TransportKind,
    pub is_connected: bool,
    pub last_activity: DateTime<Utc>,
    pub state: ConnectionState,
    /// Outbound frame queue of the local transport writer. `None` when the
    /// record was rehydrated from the shared tier, i.e. the client is
    /// attached to another process.
    pub outbound: Option<mpsc::Sender<Bytes>>,
}

impl Connection {
    pub fn new(
        connection_id: ConnectionId,
        transport_kind: TransportKind,
        outbound: mpsc::Sender<Bytes>,
    ) -> Self {
        Self {
            connection_id,
            transport_kind,
            is_connected: true,
            last_activity: Utc::now(),
            state: ConnectionState::Connected,
            outbound: Some(outbound),
        }
    }

    /// Whether this client is attached to this process.
    pub fn is_local(&self) -> bool {
        self.outbound.is_some()
    }

    fn record(&self) -> ConnectionRecord {
        ConnectionRecord {
            connection_id: self.connection_id,
            transport_kind: self.transport_kind,
            is_connected: self.is_connected,
            last_activity: self.last_activity,
            state: self.state,
        }
    }

    fn from_record(record: ConnectionRecord) -> Self {
        Self {
            connection_id: record.connection_id,
            transport_kind: record.transport_kind,
            is_connected: record.is_connected,
            last_activity: record.last_activity,
            state: record.state,
            outbound: None,
        }
    }
}

/// A named collection of connections used for scoped broadcast.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct Room {
    pub id: RoomId,
    pub max_capacity: usize,
    pub connection_ids: HashSet<ConnectionId>,
}

impl Room {
    pub fn new(id: RoomId, max_capacity: usize) -> Self {
        Self {
            id,
            max_capacity,
            connection_ids: HashSet::new(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.connection_ids.len() >= self.max_capacity
    }

    pub fn is_empty(&self) -> bool {
        self.connection_ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.connection_ids.len()
    }
}

/// Registry of connections and rooms with a memory tier and an optional
/// write-through shared tier.
pub struct ConnectionStore {
    connections: DashMap<ConnectionId, Connection>,
    rooms: DashMap<RoomId, Room>,
    /// Reverse index; a client belongs to at most one room.
    room_index: DashMap<ConnectionId, RoomId>,
    default_capacity: usize,
    shared: Option<Arc<dyn SharedTier>>,
}

impl ConnectionStore {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            rooms: DashMap::new(),
            room_index: DashMap::new(),
            default_capacity,
            shared: None,
        }
    }

    pub fn with_shared_tier(default_capacity: usize, shared: Arc<dyn SharedTier>) -> Self {
        Self {
            shared: Some(shared),
            ..Self::new(default_capacity)
        }
    }

    pub fn shared_tier(&self) -> Option<&Arc<dyn SharedTier>> {
        self.shared.as_ref()
    }

    /// Save a connection, optionally placing it into `room_id`.
    ///
    /// Returns false without registering anything when the requested room
    /// does not exist or is already full.
    pub async fn add(
        &self,
        connection_id: ConnectionId,
        connection: Connection,
        room_id: Option<RoomId>,
    ) -> bool {
        if let Some(room_id) = room_id {
            if self.add_client_to_room_local(&connection_id, &room_id).is_none() {
                return false;
            }
            self.write_through_room(&room_id).await;
            self.write_through_assignment(&connection_id, &room_id).await;
        }

        let record = connection.record();
        self.connections.insert(connection_id, connection);
        if let Some(shared) = &self.shared {
            if let Err(err) = shared.put_connection(&record).await {
                warn!(%connection_id, error = %err, "Shared-tier connection write failed");
            }
        }
        true
    }

    /// Delete a connection and pull it out of its room; an emptied room is
    /// deleted from the store.
    pub async fn remove(&self, connection_id: &ConnectionId) {
        self.connections.remove(connection_id);

        let mut emptied_room = None;
        if let Some((_, room_id)) = self.room_index.remove(connection_id) {
            if let Some(mut room) = self.rooms.get_mut(&room_id) {
                room.connection_ids.remove(connection_id);
                if room.is_empty() {
                    emptied_room = Some(room_id);
                }
            }
            if let Some(room_id) = emptied_room {
                self.rooms.remove(&room_id);
                debug!(%room_id, "Deleted empty room");
            }

            if let Some(shared) = &self.shared {
                if let Err(err) = shared.remove_room_assignment(connection_id).await {
                    warn!(%connection_id, error = %err, "Shared-tier assignment delete failed");
                }
                let result = match emptied_room {
                    Some(room_id) => shared.remove_room(&room_id).await,
                    None => match self.rooms.get(&room_id).map(|entry| entry.value().clone()) {
                        Some(room) => shared.put_room(&room).await,
                        None => Ok(()),
                    },
                };
                if let Err(err) = result {
                    warn!(%room_id, error = %err, "Shared-tier room write failed");
                }
            }
        }

        if let Some(shared) = &self.shared {
            if let Err(err) = shared.remove_connection(connection_id).await {
                warn!(%connection_id, error = %err, "Shared-tier connection delete failed");
            }
        }
    }

    /// Local-tier read with shared-tier fallback; a hit from the shared tier
    /// is rehydrated into the local map (without a local attachment).
    pub async fn get(&self, connection_id: &ConnectionId) -> Option<Connection> {
        if let Some(entry) = self.connections.get(connection_id) {
            return Some(entry.value().clone());
        }

        let shared = self.shared.as_ref()?;
        match shared.get_connection(connection_id).await {
            Ok(Some(record)) => {
                let conn = Connection::from_record(record);
                self.connections.insert(*connection_id, conn.clone());
                Some(conn)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(%connection_id, error = %err, "Shared-tier connection read failed");
                None
            }
        }
    }

    /// Local-tier-only lookup, used on the send hot path to decide between
    /// socket write and bridge fan-out.
    pub fn get_local(&self, connection_id: &ConnectionId) -> Option<Connection> {
        self.connections
            .get(connection_id)
            .map(|entry| entry.value().clone())
    }

    pub fn exists(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    pub fn all_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    pub fn all_connections(&self) -> Vec<Connection> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub async fn get_room(&self, room_id: &RoomId) -> Option<Room> {
        if let Some(entry) = self.rooms.get(room_id) {
            return Some(entry.value().clone());
        }

        let shared = self.shared.as_ref()?;
        match shared.get_room(room_id).await {
            Ok(Some(room)) => {
                self.rooms.insert(*room_id, room.clone());
                Some(room)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(%room_id, error = %err, "Shared-tier room read failed");
                None
            }
        }
    }

    pub fn all_rooms(&self) -> Vec<Room> {
        self.rooms.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub async fn connections_in_room(&self, room_id: &RoomId) -> Vec<ConnectionId> {
        match self.get_room(room_id).await {
            Some(room) => room.connection_ids.into_iter().collect(),
            None => Vec::new(),
        }
    }

    pub fn find_room_for_client(&self, connection_id: &ConnectionId) -> Option<RoomId> {
        self.room_index.get(connection_id).map(|entry| *entry.value())
    }

    /// First room with free capacity, or a freshly created one.
    ///
    /// Linear scan; adequate for small fleets.
    pub async fn find_available_room(&self) -> Room {
        let available = self
            .rooms
            .iter()
            .find(|entry| !entry.value().is_full())
            .map(|entry| entry.value().clone());

        match available {
            Some(room) => room,
            None => self.create_room().await,
        }
    }

    /// Add a client to an existing room. Returns `None` when the room does
    /// not exist or is full.
    pub async fn add_client_to_room(
        &self,
        connection_id: &ConnectionId,
        room_id: &RoomId,
    ) -> Option<Room> {
        let room = self.add_client_to_room_local(connection_id, room_id)?;
        self.write_through_room(room_id).await;
        self.write_through_assignment(connection_id, room_id).await;

        if let Some(mut conn) = self.connections.get_mut(connection_id) {
            conn.state = ConnectionState::Joined;
        }
        Some(room)
    }

    fn add_client_to_room_local(
        &self,
        connection_id: &ConnectionId,
        room_id: &RoomId,
    ) -> Option<Room> {
        let mut room = self.rooms.get_mut(room_id)?;
        if room.is_full() && !room.connection_ids.contains(connection_id) {
            return None;
        }
        room.connection_ids.insert(*connection_id);
        let snapshot = room.clone();
        drop(room);

        self.room_index.insert(*connection_id, *room_id);
        Some(snapshot)
    }

    /// Pull a still-connected client out of its room; an emptied room is
    /// deleted. Returns the left room's id.
    pub async fn remove_client_from_room(&self, connection_id: &ConnectionId) -> Option<RoomId> {
        let (_, room_id) = self.room_index.remove(connection_id)?;

        let mut emptied = false;
        if let Some(mut room) = self.rooms.get_mut(&room_id) {
            room.connection_ids.remove(connection_id);
            emptied = room.is_empty();
        }
        if emptied {
            self.rooms.remove(&room_id);
            debug!(%room_id, "Deleted empty room");
        }

        if let Some(mut conn) = self.connections.get_mut(connection_id) {
            conn.state = ConnectionState::Connected;
        }

        if let Some(shared) = &self.shared {
            if let Err(err) = shared.remove_room_assignment(connection_id).await {
                warn!(%connection_id, error = %err, "Shared-tier assignment delete failed");
            }
            let result = if emptied {
                shared.remove_room(&room_id).await
            } else {
                match self.rooms.get(&room_id).map(|entry| entry.value().clone()) {
                    Some(room) => shared.put_room(&room).await,
                    None => Ok(()),
                }
            };
            if let Err(err) = result {
                warn!(%room_id, error = %err, "Shared-tier room write failed");
            }
        }

        Some(room_id)
    }

    /// Create an empty room with the default capacity under a fresh id.
    pub async fn create_room(&self) -> Room {
        let room = Room::new(Uuid::new_v4(), self.default_capacity);
        self.rooms.insert(room.id, room.clone());
        self.write_through_room(&room.id).await;
        room
    }

    /// Remove every connection whose transport has gone away.
    pub async fn cleanup(&self) -> usize {
        let stale: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| !entry.value().is_connected)
            .map(|entry| *entry.key())
            .collect();

        let removed = stale.len();
        for connection_id in stale {
            debug!(%connection_id, "Removing disconnected client");
            self.remove(&connection_id).await;
        }
        removed
    }

    /// Refresh the activity timestamp on an inbound frame.
    pub fn touch(&self, connection_id: &ConnectionId) {
        if let Some(mut conn) = self.connections.get_mut(connection_id) {
            conn.last_activity = Utc::now();
        }
    }

    /// Flag a connection as gone; the cleanup sweep removes it.
    pub fn mark_disconnected(&self, connection_id: &ConnectionId) {
        if let Some(mut conn) = self.connections.get_mut(connection_id) {
            conn.is_connected = false;
            conn.outbound = None;
        }
    }

    async fn write_through_room(&self, room_id: &RoomId) {
        let Some(shared) = &self.shared else { return };
        let Some(room) = self.rooms.get(room_id).map(|entry| entry.value().clone()) else {
            return;
        };
        if let Err(err) = shared.put_room(&room).await {
            warn!(%room_id, error = %err, "Shared-tier room write failed");
        }
    }

    async fn write_through_assignment(&self, connection_id: &ConnectionId, room_id: &RoomId) {
        let Some(shared) = &self.shared else { return };
        if let Err(err) = shared.put_room_assignment(connection_id, room_id).await {
            warn!(%connection_id, %room_id, error = %err, "Shared-tier assignment write failed");
        }
    }
}
