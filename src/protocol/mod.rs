// Protocol module: packet model, headers, and result codes

pub mod codes;
pub mod packets;
pub mod types;

pub use codes::{FailType, SuccessType};
pub use packets::Packet;
pub use types::{
    ConnectionId, ConnectionState, PacketHeader, ProcessId, RoomId, TransportKind, WorldIndex,
    DEFAULT_ROOM_CAPACITY, SERVER_SENDER,
};
