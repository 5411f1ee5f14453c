use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure codes carried by `FailedPacket` for programmatic handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailType {
    // Room errors
    RoomNotFound,
    RoomFull,
    AlreadyInRoom,
    NotInRoom,

    // Dispatch errors
    UnknownPacketType,
    MalformedPacket,
    HandlerFailed,

    // World errors
    WorldNotFound,

    // Everything else
    Internal,
}

impl fmt::Display for FailType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RoomNotFound => "ROOM_NOT_FOUND",
            Self::RoomFull => "ROOM_FULL",
            Self::AlreadyInRoom => "ALREADY_IN_ROOM",
            Self::NotInRoom => "NOT_IN_ROOM",
            Self::UnknownPacketType => "UNKNOWN_PACKET_TYPE",
            Self::MalformedPacket => "MALFORMED_PACKET",
            Self::HandlerFailed => "HANDLER_FAILED",
            Self::WorldNotFound => "WORLD_NOT_FOUND",
            Self::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}

/// Success codes carried by `SuccessPacket`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuccessType {
    Handshake,
    RoomJoined,
    RoomLeft,
    Generic,
}
