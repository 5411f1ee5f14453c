use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default room capacity when none is configured.
pub const DEFAULT_ROOM_CAPACITY: usize = 100;

/// Sender label used by server-originated packets.
pub const SERVER_SENDER: &str = "server";

/// Unique identifier for client connections, assigned at accept time.
pub type ConnectionId = Uuid;
/// Unique identifier for rooms.
pub type RoomId = Uuid;
/// Unique identifier for a server process participating in a shared deployment.
pub type ProcessId = Uuid;
/// Index of a registered world.
pub type WorldIndex = u32;

/// Wire protocol a connection was accepted on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Ws,
    Tcp,
    Udp,
}

/// Lifecycle state of a client connection.
///
/// `Connected` is the post-handshake state; `Joined` means the client has
/// entered a room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Connected = 0,
    Joined = 1,
}

/// Header carried by every packet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PacketHeader {
    pub timestamp: DateTime<Utc>,
    /// Originating party: a connection id string, or [`SERVER_SENDER`].
    pub sender: String,
    /// Target connection, filled in by the router before delivery.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub receiver: Option<ConnectionId>,
}

impl PacketHeader {
    /// Header for a server-originated packet with no receiver yet.
    pub fn from_server() -> Self {
        Self {
            timestamp: Utc::now(),
            sender: SERVER_SENDER.to_string(),
            receiver: None,
        }
    }

    /// Header for a client-originated packet.
    pub fn from_client(sender: ConnectionId) -> Self {
        Self {
            timestamp: Utc::now(),
            sender: sender.to_string(),
            receiver: None,
        }
    }
}
